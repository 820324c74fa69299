use crate::domain::entities::{LedgerSnapshot, LedgerTransaction};
use crate::domain::value_objects::{LedgerChannel, UserId};
use crate::shared::error::AppError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// 残高の読み取り
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn fetch_snapshot(&self, user_id: &UserId) -> Result<LedgerSnapshot, AppError>;
}

/// 境界で検証済みのプッシュ通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerPush {
    BalanceChanged { user_id: UserId, new_balance: i64 },
    TransactionInserted(LedgerTransaction),
}

impl LedgerPush {
    pub fn user_id(&self) -> &UserId {
        match self {
            LedgerPush::BalanceChanged { user_id, .. } => user_id,
            LedgerPush::TransactionInserted(tx) => &tx.user_id,
        }
    }

    pub fn channel(&self) -> LedgerChannel {
        match self {
            LedgerPush::BalanceChanged { .. } => LedgerChannel::BalanceRow,
            LedgerPush::TransactionInserted(_) => LedgerChannel::TransactionLog,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeMessage {
    Push(LedgerPush),
    /// トランスポート側のエラー。受信側は購読を非アクティブ扱いにする。
    Error(String),
}

pub type LedgerEventStream = mpsc::Receiver<RealtimeMessage>;

/// ユーザー単位のプッシュ購読
///
/// 返されたストリームが閉じた（`None`）場合も購読は失われたものとして扱う。
#[async_trait]
pub trait LedgerPushChannel: Send + Sync {
    async fn subscribe(&self, user_id: &UserId) -> Result<LedgerEventStream, AppError>;
}

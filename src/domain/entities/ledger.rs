use crate::domain::value_objects::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const COIN_LABEL: &str = "PandaCoins";

/// 残高から導出される会員ランク
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerLevel {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl LedgerLevel {
    const THRESHOLDS: [(i64, LedgerLevel); 4] = [
        (10_000, LedgerLevel::Diamond),
        (5_000, LedgerLevel::Platinum),
        (2_000, LedgerLevel::Gold),
        (500, LedgerLevel::Silver),
    ];

    pub fn from_balance(balance: i64) -> Self {
        Self::THRESHOLDS
            .iter()
            .find(|(min, _)| balance >= *min)
            .map(|(_, level)| *level)
            .unwrap_or(LedgerLevel::Bronze)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerLevel::Bronze => "bronze",
            LedgerLevel::Silver => "silver",
            LedgerLevel::Gold => "gold",
            LedgerLevel::Platinum => "platinum",
            LedgerLevel::Diamond => "diamond",
        }
    }
}

impl fmt::Display for LedgerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// サーバーが返す残高のスナップショット
///
/// `balance` は常にサーバー値をそのまま保持する。クライアント側で加減算はしない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub user_id: UserId,
    pub balance: i64,
    pub total_earned: i64,
    pub total_spent: i64,
    pub level: LedgerLevel,
}

impl LedgerSnapshot {
    pub fn new(user_id: UserId, balance: i64, total_earned: i64, total_spent: i64) -> Self {
        Self {
            user_id,
            balance,
            total_earned,
            total_spent,
            level: LedgerLevel::from_balance(balance),
        }
    }

    /// 残高だけが変わった通知を反映したコピー
    pub fn with_balance(&self, balance: i64) -> Self {
        Self {
            balance,
            level: LedgerLevel::from_balance(balance),
            ..self.clone()
        }
    }
}

/// 取引ログの一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub user_id: UserId,
    pub amount: i64,
    pub description: Option<String>,
}

/// 残高増加時にユーザーへ返すフィードバック（ハプティクス・読み上げ・トースト）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoinFeedback {
    pub user_id: UserId,
    pub delta: i64,
    pub balance: i64,
    pub description: Option<String>,
    pub level_up: Option<LedgerLevel>,
}

impl CoinFeedback {
    pub fn message(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(description) if !description.is_empty() => {
                format!("+{} {COIN_LABEL}: {description}", self.delta)
            }
            _ => format!("+{} {COIN_LABEL}", self.delta),
        }
    }
}

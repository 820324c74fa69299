use super::payload::parse_change_for;
use crate::application::ports::ledger_gateway::{
    LedgerEventStream, LedgerPushChannel, RealtimeMessage,
};
use crate::domain::value_objects::UserId;
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone)]
enum HubEvent {
    Change(Value),
    TransportError(String),
}

/// トランスポートから届いた変更通知を購読者へ配る
///
/// 受信側が追いつけずに取りこぼした場合は購読エラーとして通知し、
/// 上位に再同期させる。
pub struct RealtimeHub {
    sender: broadcast::Sender<HubEvent>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 生の変更通知を流す。受け取った購読数を返す。
    pub fn publish_change(&self, raw: Value) -> usize {
        self.sender.send(HubEvent::Change(raw)).unwrap_or(0)
    }

    /// 接続断などを全購読者へ伝える
    pub fn report_error(&self, message: impl Into<String>) -> usize {
        self.sender
            .send(HubEvent::TransportError(message.into()))
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl LedgerPushChannel for RealtimeHub {
    async fn subscribe(&self, user_id: &UserId) -> Result<LedgerEventStream, AppError> {
        let mut receiver = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let user_id = user_id.clone();

        tokio::spawn(async move {
            loop {
                // 購読側が手放したら次の通知を待たずに受信者を返す
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = receiver.recv() => event,
                };
                let message = match event {
                    Ok(HubEvent::Change(raw)) => match parse_change_for(&raw, &user_id) {
                        Ok(Some(push)) => RealtimeMessage::Push(push),
                        Ok(None) => continue,
                        Err(err) => {
                            warn!(target: "realtime", user_id = %user_id, error = %err, "dropping invalid change payload");
                            continue;
                        }
                    },
                    Ok(HubEvent::TransportError(message)) => RealtimeMessage::Error(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        RealtimeMessage::Error(format!("subscriber lagged by {skipped} messages"))
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let terminal = matches!(message, RealtimeMessage::Error(_));
                if tx.send(message).await.is_err() || terminal {
                    break;
                }
            }
            debug!(target: "realtime", user_id = %user_id, "realtime forwarder stopped");
        });

        debug!(target: "realtime", "ledger channels subscribed");
        Ok(rx)
    }
}

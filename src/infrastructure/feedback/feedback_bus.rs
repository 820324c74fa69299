use crate::application::ports::feedback::CoinFeedbackSink;
use crate::domain::entities::CoinFeedback;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 残高増加フィードバックを UI 側のリスナーへ配る
pub struct FeedbackBus {
    sender: broadcast::Sender<CoinFeedback>,
}

impl FeedbackBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoinFeedback> {
        self.sender.subscribe()
    }
}

impl Default for FeedbackBus {
    fn default() -> Self {
        Self::new(32)
    }
}

impl CoinFeedbackSink for FeedbackBus {
    fn emit(&self, feedback: CoinFeedback) {
        info!(
            target: "feedback",
            user_id = %feedback.user_id,
            delta = feedback.delta,
            message = %feedback.message(),
            "coin feedback"
        );
        if let Some(level) = feedback.level_up {
            info!(target: "feedback", user_id = %feedback.user_id, level = %level, "level up");
        }

        if self.sender.send(feedback).is_err() {
            debug!(target: "feedback", "no feedback listeners");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::LedgerLevel;
    use crate::domain::value_objects::UserId;

    fn feedback(delta: i64) -> CoinFeedback {
        CoinFeedback {
            user_id: UserId::parse("buyer-1").unwrap(),
            delta,
            balance: 500 + delta,
            description: None,
            level_up: Some(LedgerLevel::Silver),
        }
    }

    #[tokio::test]
    async fn every_listener_receives_feedback() {
        let bus = FeedbackBus::default();
        let mut toast = bus.subscribe();
        let mut haptics = bus.subscribe();

        bus.emit(feedback(50));

        assert_eq!(toast.recv().await.unwrap().delta, 50);
        assert_eq!(haptics.recv().await.unwrap().message(), "+50 PandaCoins");
    }

    #[test]
    fn emitting_without_listeners_is_harmless() {
        let bus = FeedbackBus::new(1);
        bus.emit(feedback(10));
    }
}

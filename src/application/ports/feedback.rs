use crate::domain::entities::CoinFeedback;

/// 残高増加のフィードバック出力先（ハプティクス・音声・トーストは UI 側）
pub trait CoinFeedbackSink: Send + Sync {
    fn emit(&self, feedback: CoinFeedback);
}

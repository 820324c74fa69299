use crate::domain::entities::AnalyticsRecord;
use crate::shared::error::AppError;
use async_trait::async_trait;

/// 分析イベントの一括登録先
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// `records` の順序のまま登録する。失敗時は一件も登録されていない前提で再送される。
    async fn insert_events(&self, records: &[AnalyticsRecord]) -> Result<(), AppError>;
}

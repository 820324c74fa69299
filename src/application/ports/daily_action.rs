use crate::domain::value_objects::UserId;
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::Value;

/// 一日一回だけ意味を持つリモート処理（ログインボーナスなど）
#[async_trait]
pub trait DailyActionInvoker: Send + Sync {
    async fn invoke_daily_action(&self, function: &str, user_id: &UserId)
    -> Result<Value, AppError>;
}

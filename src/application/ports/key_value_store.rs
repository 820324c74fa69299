use crate::shared::error::AppError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

/// 端末ローカルの永続キーバリューストア（プロセス再起動後も残る）
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
    async fn remove(&self, key: &str) -> Result<(), AppError>;
}

pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, AppError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| AppError::DeserializationError(format!("{key}: {err}")))
}

pub async fn save_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), AppError> {
    let json =
        serde_json::to_string(value).map_err(|err| AppError::SerializationError(err.to_string()))?;
    store.set(key, &json).await
}

use crate::shared::clock::{Clock, SystemClock};
use crate::shared::error::AppError;
use regex::RegexBuilder;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone)]
struct CacheEntry<T> {
    data: T,
    stored_at_ms: i64,
    ttl_ms: i64,
}

impl<T> CacheEntry<T> {
    /// `now - stored_at >= ttl` で期限切れ
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.stored_at_ms) >= self.ttl_ms
    }
}

/// メモリキャッシュサービス
///
/// 期限切れのエントリは存在しないものとして扱い、次の参照か `cleanup_expired` で物理削除する。
#[derive(Clone)]
pub struct MemoryCacheService<T: Clone> {
    cache: Arc<RwLock<HashMap<String, CacheEntry<T>>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<T> MemoryCacheService<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 新しいキャッシュサービスを作成
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
            clock,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// キャッシュにデータを保存（既存エントリは上書き）
    pub async fn set(&self, key: impl Into<String>, value: T) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    /// 指定したTTLでキャッシュに保存
    pub async fn set_with_ttl(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let entry = CacheEntry {
            data: value,
            stored_at_ms: self.clock.now_ms(),
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        };

        let mut cache = self.cache.write().await;
        cache.insert(key.into(), entry);
    }

    /// キャッシュからデータを取得（期限切れならその場で削除して None）
    pub async fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now_ms();
        {
            let cache = self.cache.read().await;
            match cache.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.data.clone()),
                Some(_) => {}
            }
        }

        let mut cache = self.cache.write().await;
        // 読み取りロックを離している間に再設定されている可能性がある
        match cache.get(key) {
            Some(entry) if entry.is_expired(now) => {
                cache.remove(key);
                debug!(key, "purged expired cache entry");
                None
            }
            Some(entry) => Some(entry.data.clone()),
            None => None,
        }
    }

    /// 複数のキーからデータを取得
    pub async fn get_many(&self, keys: &[String]) -> HashMap<String, T> {
        let cache = self.cache.read().await;
        let now = self.clock.now_ms();

        let mut results = HashMap::new();
        for key in keys {
            if let Some(entry) = cache.get(key) {
                if !entry.is_expired(now) {
                    results.insert(key.clone(), entry.data.clone());
                }
            }
        }

        results
    }

    /// ヒットすればそれを返し、ミスなら `fetch` の結果を保存して返す。エラーはキャッシュしない。
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let value = fetch().await?;
        self.set_with_ttl(key, value.clone(), ttl.unwrap_or(self.default_ttl))
            .await;
        Ok(value)
    }

    /// キャッシュから削除
    pub async fn invalidate(&self, key: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(key);
    }

    /// 正規表現にマッチするキーを削除し、削除件数を返す
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, AppError> {
        let regex = RegexBuilder::new(pattern)
            .size_limit(1 << 20)
            .build()
            .map_err(|err| AppError::InvalidInput(format!("invalid cache pattern: {err}")))?;

        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|key, _| !regex.is_match(key));
        let removed = before - cache.len();

        debug!(pattern, removed, "invalidated cache entries by pattern");
        Ok(removed)
    }

    /// キャッシュをクリア
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }

    /// 期限切れのエントリを削除し、削除件数を返す
    pub async fn cleanup_expired(&self) -> usize {
        let mut cache = self.cache.write().await;
        let now = self.clock.now_ms();
        let before = cache.len();

        cache.retain(|_, entry| !entry.is_expired(now));
        before - cache.len()
    }

    /// キャッシュサイズを取得（未掃除の期限切れエントリも含む）
    pub async fn size(&self) -> usize {
        let cache = self.cache.read().await;
        cache.len()
    }
}

/// 任意のシリアライズ可能な値を保持するキャッシュ
pub type JsonCache = MemoryCacheService<Value>;

impl MemoryCacheService<Value> {
    pub async fn set_json<S: Serialize>(
        &self,
        key: impl Into<String>,
        value: &S,
        ttl: Option<Duration>,
    ) -> Result<(), AppError> {
        let value = serde_json::to_value(value)
            .map_err(|err| AppError::SerializationError(err.to_string()))?;
        self.set_with_ttl(key, value, ttl.unwrap_or(self.default_ttl))
            .await;
        Ok(())
    }

    /// 型が合わない場合はミスとして扱い、エントリを捨てる
    pub async fn get_json<D: DeserializeOwned>(&self, key: &str) -> Option<D> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                debug!(key, error = %err, "cached value has unexpected shape");
                self.invalidate(key).await;
                None
            }
        }
    }
}

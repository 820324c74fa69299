use super::memory_cache::MemoryCacheService;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// 期限切れエントリを定期的に掃除するバックグラウンドタスク
///
/// 再参照されないまま期限切れになったエントリでメモリが膨らむのを防ぐ。
pub struct CacheJanitor {
    handle: JoinHandle<()>,
}

impl CacheJanitor {
    pub fn spawn<T>(cache: MemoryCacheService<T>, interval: Duration) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 初回の tick は即時に返るので読み捨てる
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = cache.cleanup_expired().await;
                if removed > 0 {
                    let remaining = cache.size().await;
                    tracing::debug!(
                        target: "cache::janitor",
                        removed,
                        remaining,
                        "swept expired cache entries"
                    );
                }
            }
        });

        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for CacheJanitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

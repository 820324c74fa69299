use crate::application::ports::analytics_sink::AnalyticsSink;
use crate::application::ports::key_value_store::{KeyValueStore, load_json, save_json};
use crate::application::services::session::SessionState;
use crate::domain::entities::{AnalyticsRecord, EventProperties, QueuedEvent};
use crate::domain::value_objects::EventName;
use crate::shared::clock::Clock;
use crate::shared::config::AnalyticsConfig;
use crate::shared::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 送信失敗時に溜め込むイベント数の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsRetryPolicy {
    /// 送れるまで全件保持する
    Unbounded,
    /// 上限を超えたら古いものから捨てる
    Capped { max_pending: usize },
}

impl AnalyticsRetryPolicy {
    pub fn from_config(config: &AnalyticsConfig) -> Self {
        match config.max_pending {
            Some(max_pending) => AnalyticsRetryPolicy::Capped { max_pending },
            None => AnalyticsRetryPolicy::Unbounded,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyticsSettings {
    pub flush_threshold: usize,
    pub flush_timeout: Duration,
    pub retry_policy: AnalyticsRetryPolicy,
    pub storage_key: String,
}

impl AnalyticsSettings {
    fn inflight_key(&self) -> String {
        format!("{}.inflight", self.storage_key)
    }
}

impl From<&AnalyticsConfig> for AnalyticsSettings {
    fn from(config: &AnalyticsConfig) -> Self {
        Self {
            flush_threshold: config.flush_threshold.max(1),
            flush_timeout: config.flush_timeout(),
            retry_policy: AnalyticsRetryPolicy::from_config(config),
            storage_key: config.storage_key.clone(),
        }
    }
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self::from(&AnalyticsConfig::default())
    }
}

/// 分析イベントのバッファ
///
/// `track` のたびにキュー全体を永続化し、閾値到達・バックグラウンド移行・明示要求で
/// まとめて送信する。送信中のバッチは別キーにも保存しておき、送信中にプロセスが
/// 落ちても失われないようにしている。送信に失敗したバッチは送信中に積まれた
/// イベントより前に戻す。
#[derive(Clone)]
pub struct AnalyticsService {
    queue: Arc<Mutex<Vec<QueuedEvent>>>,
    flush_gate: Arc<Mutex<()>>,
    store: Arc<dyn KeyValueStore>,
    sink: Arc<dyn AnalyticsSink>,
    session: Arc<SessionState>,
    clock: Arc<dyn Clock>,
    settings: AnalyticsSettings,
}

impl AnalyticsService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn AnalyticsSink>,
        session: Arc<SessionState>,
        clock: Arc<dyn Clock>,
        settings: AnalyticsSettings,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Vec::new())),
            flush_gate: Arc::new(Mutex::new(())),
            store,
            sink,
            session,
            clock,
            settings,
        }
    }

    /// 永続化されたキュー（送信途中だったバッチを含む）を読み戻す
    pub async fn restore(&self) -> Result<usize, AppError> {
        let inflight_key = self.settings.inflight_key();
        let inflight = self.load_persisted(&inflight_key).await;
        let persisted = self.load_persisted(&self.settings.storage_key).await;

        let mut queue = self.queue.lock().await;
        let tracked_before_restore = std::mem::take(&mut *queue);

        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(inflight.len() + persisted.len());
        for event in inflight
            .into_iter()
            .chain(persisted)
            .chain(tracked_before_restore)
        {
            if seen.insert(event.id()) {
                merged.push(event);
            }
        }

        *queue = merged;
        self.enforce_retry_policy(&mut queue);
        self.persist(&queue).await;
        if let Err(err) = self.store.remove(&inflight_key).await {
            warn!(target: "analytics", error = %err, "failed to clear in-flight analytics batch");
        }

        debug!(target: "analytics", pending = queue.len(), "analytics queue restored");
        Ok(queue.len())
    }

    /// イベントを積む。閾値に達したら送信を試みる。
    pub async fn track(
        &self,
        name: &str,
        properties: Option<EventProperties>,
    ) -> Result<(), AppError> {
        let name = EventName::new(name).map_err(AppError::ValidationError)?;
        let actor_id = self.session.current_user().await;
        let event = QueuedEvent::new(name, properties, self.clock.now_ms(), actor_id)
            .map_err(AppError::ValidationError)?;

        let should_flush = {
            let mut queue = self.queue.lock().await;
            queue.push(event);
            self.enforce_retry_policy(&mut queue);
            self.persist(&queue).await;
            queue.len() >= self.settings.flush_threshold
        };

        if should_flush {
            self.flush_if_idle().await;
        }

        Ok(())
    }

    /// キューを送信する。送信件数を返す（空なら 0）。
    ///
    /// 失敗したバッチはキューの先頭に戻され、エラーが返る。
    pub async fn flush(&self) -> Result<usize, AppError> {
        let _gate = self.flush_gate.lock().await;
        self.flush_locked().await
    }

    /// 他の送信が進行中なら何もしない
    pub async fn flush_if_idle(&self) {
        let Ok(_gate) = self.flush_gate.try_lock() else {
            debug!(target: "analytics", "flush already in progress; skipping trigger");
            return;
        };
        if let Err(err) = self.flush_locked().await {
            warn!(target: "analytics", error = %err, "analytics flush failed; events kept for retry");
        }
    }

    async fn flush_locked(&self) -> Result<usize, AppError> {
        let inflight_key = self.settings.inflight_key();

        let batch = {
            let mut queue = self.queue.lock().await;
            if queue.is_empty() {
                return Ok(0);
            }
            let batch = std::mem::take(&mut *queue);
            if let Err(err) = save_json(self.store.as_ref(), &inflight_key, &batch).await {
                warn!(target: "analytics", error = %err, "failed to persist in-flight analytics batch");
            }
            self.persist(&queue).await;
            batch
        };

        let records: Vec<AnalyticsRecord> = batch.iter().map(QueuedEvent::to_record).collect();
        let timeout = self.settings.flush_timeout;
        let result = match tokio::time::timeout(timeout, self.sink.insert_events(&records)).await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::timeout("analytics flush", timeout)),
        };

        match result {
            Ok(()) => {
                if let Err(err) = self.store.remove(&inflight_key).await {
                    warn!(target: "analytics", error = %err, "failed to clear in-flight analytics batch");
                }
                info!(target: "analytics", sent = batch.len(), "analytics batch flushed");
                Ok(batch.len())
            }
            Err(err) => {
                let requeued = batch.len();
                {
                    let mut queue = self.queue.lock().await;
                    let arrived_during_flush = std::mem::take(&mut *queue);
                    let mut merged = batch;
                    merged.extend(arrived_during_flush);
                    *queue = merged;
                    self.enforce_retry_policy(&mut queue);
                    self.persist(&queue).await;
                }
                if let Err(remove_err) = self.store.remove(&inflight_key).await {
                    warn!(target: "analytics", error = %remove_err, "failed to clear in-flight analytics batch");
                }
                warn!(target: "analytics", requeued, error = %err, "analytics batch requeued");
                Err(err)
            }
        }
    }

    /// 送信待ちのイベント（古い順）
    pub async fn pending(&self) -> Vec<QueuedEvent> {
        self.queue.lock().await.clone()
    }

    pub async fn pending_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// 一定間隔で送信するタスクを起動する
    pub fn spawn_periodic_flush(&self, interval: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                service.flush_if_idle().await;
            }
        })
    }

    fn enforce_retry_policy(&self, queue: &mut Vec<QueuedEvent>) {
        let AnalyticsRetryPolicy::Capped { max_pending } = self.settings.retry_policy else {
            return;
        };
        if queue.len() <= max_pending {
            return;
        }

        let overflow = queue.len() - max_pending;
        queue.drain(..overflow);
        warn!(
            target: "analytics",
            dropped = overflow,
            max_pending,
            "analytics queue over capacity; dropped oldest events"
        );
    }

    async fn persist(&self, queue: &[QueuedEvent]) {
        if let Err(err) = save_json(self.store.as_ref(), &self.settings.storage_key, &queue).await
        {
            warn!(target: "analytics", error = %err, "failed to persist analytics queue");
        }
    }

    async fn load_persisted(&self, key: &str) -> Vec<QueuedEvent> {
        match load_json::<Vec<QueuedEvent>>(self.store.as_ref(), key).await {
            Ok(events) => events.unwrap_or_default(),
            Err(err) => {
                warn!(target: "analytics", key, error = %err, "discarding unreadable analytics queue");
                Vec::new()
            }
        }
    }
}

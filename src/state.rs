use crate::application::ports::{
    AnalyticsSink, DailyActionInvoker, KeyValueStore, LedgerGateway, LedgerPushChannel,
};
use crate::application::services::{
    AnalyticsService, AnalyticsSettings, DailyActionGuard, DailyActionOutcome,
    DeliveryEstimator, DeliveryPolicy, LedgerSubscriptionRegistry, LedgerSyncService,
    SessionState,
};
use crate::domain::entities::{Coordinates, DeliveryEstimate, ZoneTable};
use crate::domain::value_objects::{CacheKey, UserId};
use crate::infrastructure::backend::BackendClient;
use crate::infrastructure::cache::{CacheJanitor, JsonCache};
use crate::infrastructure::database::ConnectionPool;
use crate::infrastructure::feedback::FeedbackBus;
use crate::infrastructure::realtime::RealtimeHub;
use crate::infrastructure::storage::SqliteKeyValueStore;
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DAILY_REWARD_ACTION: &str = "login_reward";

/// アプリのライフサイクル通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycleEvent {
    Foreground,
    Background,
}

/// 外部とつながるコンポーネント一式（テストでは差し替える）
pub struct AppDependencies {
    pub store: Arc<dyn KeyValueStore>,
    pub ledger: Arc<dyn LedgerGateway>,
    pub push_channel: Arc<dyn LedgerPushChannel>,
    pub analytics_sink: Arc<dyn AnalyticsSink>,
    pub daily_invoker: Arc<dyn DailyActionInvoker>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct BackgroundJobs {
    janitor: Option<CacheJanitor>,
    periodic_flush: Option<JoinHandle<()>>,
}

impl Drop for BackgroundJobs {
    fn drop(&mut self) {
        if let Some(handle) = self.periodic_flush.take() {
            handle.abort();
        }
    }
}

/// アプリケーション全体の状態を管理する構造体
pub struct AppState {
    pub config: AppConfig,
    pub session: Arc<SessionState>,
    pub cache: JsonCache,
    pub analytics: AnalyticsService,
    pub ledger_subscriptions: Arc<LedgerSubscriptionRegistry>,
    pub daily_reward: Arc<DailyActionGuard>,
    pub feedback: Arc<FeedbackBus>,
    pub delivery: DeliveryEstimator,
    pub zones: ZoneTable,
    daily_invoker: Arc<dyn DailyActionInvoker>,
    realtime: Option<Arc<RealtimeHub>>,
    pool: Option<ConnectionPool>,
    background: Mutex<BackgroundJobs>,
}

impl AppState {
    /// SQLite とバックエンドに接続して起動する
    pub async fn new(config: AppConfig) -> Result<Self, AppError> {
        config.validate().map_err(AppError::ConfigurationError)?;

        let pool = ConnectionPool::new(&config.database.url, config.database.max_connections).await?;
        pool.migrate().await?;

        let session = Arc::new(SessionState::new());
        let backend = Arc::new(BackendClient::new(&config.backend)?.with_session(session.clone()));
        let realtime = Arc::new(RealtimeHub::default());
        let deps = AppDependencies {
            store: Arc::new(SqliteKeyValueStore::new(pool.clone())),
            ledger: backend.clone(),
            push_channel: realtime.clone(),
            analytics_sink: backend.clone(),
            daily_invoker: backend,
            clock: Arc::new(SystemClock),
        };

        let mut state = Self::assemble(config, deps, session);
        state.realtime = Some(realtime);
        state.pool = Some(pool);

        state.start().await;
        info!(target: "app", "panda-sync state initialized");
        Ok(state)
    }

    pub fn from_parts(config: AppConfig, deps: AppDependencies) -> Self {
        Self::assemble(config, deps, Arc::new(SessionState::new()))
    }

    fn assemble(config: AppConfig, deps: AppDependencies, session: Arc<SessionState>) -> Self {
        let feedback = Arc::new(FeedbackBus::default());

        let cache = JsonCache::with_clock(config.cache.default_ttl(), deps.clock.clone());
        let analytics = AnalyticsService::new(
            deps.store.clone(),
            deps.analytics_sink,
            session.clone(),
            deps.clock.clone(),
            AnalyticsSettings::from(&config.analytics),
        );
        let ledger_subscriptions = Arc::new(LedgerSubscriptionRegistry::new(
            deps.ledger,
            deps.push_channel,
            feedback.clone(),
            deps.clock.clone(),
            config.ledger.load_timeout(),
        ));
        let daily_reward = Arc::new(DailyActionGuard::new(
            DAILY_REWARD_ACTION,
            deps.store,
            deps.clock,
        ));
        let delivery = DeliveryEstimator::new(DeliveryPolicy::from(&config.delivery));

        Self {
            config,
            session,
            cache,
            analytics,
            ledger_subscriptions,
            daily_reward,
            feedback,
            delivery,
            zones: ZoneTable::builtin(),
            daily_invoker: deps.daily_invoker,
            realtime: None,
            pool: None,
            background: Mutex::new(BackgroundJobs::default()),
        }
    }

    /// 永続キューの復元とバックグラウンドジョブの起動
    pub async fn start(&self) {
        match self.analytics.restore().await {
            Ok(pending) if pending > 0 => {
                info!(target: "app", pending, "restored pending analytics events");
            }
            Ok(_) => {}
            Err(err) => warn!(target: "app", error = %err, "failed to restore analytics queue"),
        }

        let mut jobs = self.background.lock().await;
        if jobs.janitor.is_none() {
            jobs.janitor = Some(CacheJanitor::spawn(
                self.cache.clone(),
                self.config.cache.cleanup_interval(),
            ));
        }
        if jobs.periodic_flush.is_none() {
            if let Some(interval) = self.config.analytics.flush_interval() {
                jobs.periodic_flush = Some(self.analytics.spawn_periodic_flush(interval));
            }
        }
    }

    /// 変更通知の流し込み口（トランスポート側が使う）
    pub fn realtime_hub(&self) -> Option<Arc<RealtimeHub>> {
        self.realtime.clone()
    }

    /// セッションを張り、残高の購読を始める
    ///
    /// トークンはバックエンドへの要求に使う。`None` なら API キーで認可する。
    pub async fn login(
        &self,
        user_id: UserId,
        access_token: Option<String>,
    ) -> Arc<LedgerSyncService> {
        let previous = self.session.set_user(user_id.clone()).await;
        self.session.set_access_token(access_token).await;

        if previous.as_ref() == Some(&user_id) {
            if let Some(service) = self.ledger_subscriptions.service(&user_id).await {
                return service;
            }
        } else if let Some(previous) = previous {
            self.ledger_subscriptions.release(&previous).await;
            debug!(target: "app", previous = %previous, "switched user");
        }

        info!(target: "app", user_id = %user_id, "user logged in");
        self.ledger_subscriptions.acquire(&user_id).await
    }

    /// 購読を外し、未送信イベントを送ってからセッションを閉じる
    pub async fn logout(&self) -> Option<UserId> {
        let user_id = self.session.current_user().await?;

        self.ledger_subscriptions.release(&user_id).await;
        if let Err(err) = self.analytics.flush().await {
            warn!(target: "app", error = %err, "analytics flush on logout failed; events kept");
        }
        for key in [
            CacheKey::User(user_id.to_string()),
            CacheKey::Ledger(user_id.to_string()),
        ] {
            self.cache.invalidate(&key.to_string()).await;
        }

        self.session.clear().await;
        info!(target: "app", user_id = %user_id, "user logged out");
        Some(user_id)
    }

    pub async fn handle_lifecycle(&self, event: AppLifecycleEvent) {
        debug!(target: "app", ?event, "lifecycle event");
        match event {
            AppLifecycleEvent::Background => {
                if let Err(err) = self.analytics.flush().await {
                    warn!(target: "app", error = %err, "analytics flush on background failed");
                }
            }
            AppLifecycleEvent::Foreground => {
                let resynced = self.ledger_subscriptions.resync_inactive().await;
                if resynced > 0 {
                    info!(target: "app", resynced, "ledger subscriptions resynced");
                }
            }
        }
    }

    /// ログインボーナスを一日一回だけ受け取る（未ログインなら `None`）
    pub async fn claim_daily_reward(&self) -> Result<Option<DailyActionOutcome<Value>>, AppError> {
        let Some(user_id) = self.session.current_user().await else {
            debug!(target: "app", "daily reward skipped without session");
            return Ok(None);
        };

        let function = self.config.backend.daily_reward_function.as_str();
        let timeout = self.config.backend.request_timeout();
        let invoker = Arc::clone(&self.daily_invoker);
        let actor = user_id.clone();
        let outcome = self
            .daily_reward
            .check_and_run(&user_id, || async move {
                match tokio::time::timeout(timeout, invoker.invoke_daily_action(function, &actor))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::timeout("daily reward", timeout)),
                }
            })
            .await?;

        Ok(Some(outcome))
    }

    pub fn estimate_delivery(
        &self,
        origin: Option<&Coordinates>,
        destination: Option<&Coordinates>,
    ) -> DeliveryEstimate {
        self.delivery.estimate(origin, destination, &self.zones)
    }

    /// バックグラウンドジョブを止め、残りのイベントを送ってから閉じる
    pub async fn shutdown(&self) {
        {
            let mut jobs = self.background.lock().await;
            if let Some(janitor) = jobs.janitor.take() {
                janitor.stop();
            }
            if let Some(handle) = jobs.periodic_flush.take() {
                handle.abort();
            }
        }

        if let Err(err) = self.analytics.flush().await {
            warn!(target: "app", error = %err, "final analytics flush failed; events persisted");
        }
        self.ledger_subscriptions.shutdown().await;
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        info!(target: "app", "panda-sync state shut down");
    }
}

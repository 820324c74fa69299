mod common;

use common::stub_backend::StubBackend;
use panda_sync::application::ports::KeyValueStore;
use panda_sync::application::services::{AnalyticsService, AnalyticsSettings, SessionState};
use panda_sync::infrastructure::database::ConnectionPool;
use panda_sync::infrastructure::storage::SqliteKeyValueStore;
use panda_sync::shared::AppConfig;
use panda_sync::shared::clock::SystemClock;
use panda_sync::state::AppState;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tempfile::tempdir;

fn database_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

async fn open_store(url: &str) -> (ConnectionPool, Arc<SqliteKeyValueStore>) {
    let pool = ConnectionPool::new(url, 2).await.expect("open sqlite");
    pool.migrate().await.expect("migrate");
    let store = Arc::new(SqliteKeyValueStore::new(pool.clone()));
    (pool, store)
}

fn analytics(store: Arc<SqliteKeyValueStore>, backend: Arc<StubBackend>) -> AnalyticsService {
    AnalyticsService::new(
        store,
        backend,
        Arc::new(SessionState::new()),
        Arc::new(SystemClock),
        AnalyticsSettings::default(),
    )
}

#[tokio::test]
async fn unsent_events_survive_a_restart() {
    let dir = tempdir().unwrap();
    let url = database_url(&dir.path().join("panda.db"));

    {
        let (pool, store) = open_store(&url).await;
        let backend = Arc::new(StubBackend::default());
        backend.fail_inserts.store(true, Ordering::SeqCst);

        let service = analytics(store, backend.clone());
        service
            .track("product_viewed", json!({"productId": "p-1"}).as_object().cloned())
            .await
            .unwrap();
        service.track("cart_opened", None).await.unwrap();
        assert!(service.flush().await.is_err());
        assert_eq!(service.pending_len().await, 2);
        pool.close().await;
    }

    let (pool, store) = open_store(&url).await;
    let backend = Arc::new(StubBackend::default());
    let service = analytics(store, backend.clone());

    assert_eq!(service.restore().await.unwrap(), 2);
    service.track("checkout_started", None).await.unwrap();
    assert_eq!(service.flush().await.unwrap(), 3);
    assert_eq!(
        backend.inserted_names(),
        vec!["product_viewed", "cart_opened", "checkout_started"]
    );
    pool.close().await;
}

#[tokio::test]
async fn corrupt_persisted_queue_is_discarded() {
    let dir = tempdir().unwrap();
    let url = database_url(&dir.path().join("panda.db"));
    let (pool, store) = open_store(&url).await;

    store.set("analytics_queue", "{not json").await.unwrap();
    let service = analytics(store.clone(), Arc::new(StubBackend::default()));

    assert_eq!(service.restore().await.unwrap(), 0);
    service.track("app_opened", None).await.unwrap();
    assert_eq!(service.pending_len().await, 1);
    pool.close().await;
}

#[tokio::test]
async fn app_state_restores_queue_from_disk() {
    let dir = tempdir().unwrap();
    let mut config = AppConfig::default();
    config.database.url = database_url(&dir.path().join("panda.db"));
    // 接続できないバックエンド（送信は必ず失敗する）
    config.backend.base_url = "http://127.0.0.1:9".to_string();
    config.backend.request_timeout_secs = 1;

    {
        let state = AppState::new(config.clone()).await.unwrap();
        state.analytics.track("app_opened", None).await.unwrap();
        state.analytics.track("search_used", None).await.unwrap();
        state.shutdown().await;
    }

    let state = AppState::new(config).await.unwrap();
    let names: Vec<_> = state
        .analytics
        .pending()
        .await
        .iter()
        .map(|event| event.name().to_string())
        .collect();
    assert_eq!(names, vec!["app_opened", "search_used"]);
    state.shutdown().await;
}

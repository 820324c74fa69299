#![allow(dead_code)]

pub mod mock_http;
pub mod stub_backend;

use panda_sync::domain::value_objects::UserId;
use panda_sync::shared::AppConfig;
use panda_sync::shared::clock::ManualClock;
use panda_sync::state::{AppDependencies, AppState};
use panda_sync::infrastructure::realtime::RealtimeHub;
use panda_sync::infrastructure::storage::MemoryKeyValueStore;
use std::sync::Arc;
use stub_backend::StubBackend;

// 2026-03-01T23:30:00Z
pub const LATE_EVENING_UTC: i64 = 1_772_407_800_000;

pub fn user(name: &str) -> UserId {
    UserId::parse(name).expect("valid user id")
}

pub struct TestApp {
    pub state: AppState,
    pub backend: Arc<StubBackend>,
    pub hub: Arc<RealtimeHub>,
    pub store: Arc<MemoryKeyValueStore>,
    pub clock: Arc<ManualClock>,
}

/// インメモリの依存だけで組んだアプリ
pub async fn test_app(config: AppConfig) -> TestApp {
    let backend = Arc::new(StubBackend::default());
    let hub = Arc::new(RealtimeHub::default());
    let store = Arc::new(MemoryKeyValueStore::new());
    let clock = Arc::new(ManualClock::with_utc_offset(LATE_EVENING_UTC, 0));

    let state = AppState::from_parts(
        config,
        AppDependencies {
            store: store.clone(),
            ledger: backend.clone(),
            push_channel: hub.clone(),
            analytics_sink: backend.clone(),
            daily_invoker: backend.clone(),
            clock: clock.clone(),
        },
    );
    state.start().await;

    TestApp {
        state,
        backend,
        hub,
        store,
        clock,
    }
}

pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

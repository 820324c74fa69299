use async_trait::async_trait;
use panda_sync::application::ports::{AnalyticsSink, DailyActionInvoker, LedgerGateway};
use panda_sync::domain::entities::{AnalyticsRecord, LedgerSnapshot};
use panda_sync::domain::value_objects::UserId;
use panda_sync::shared::AppError;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 残高表・分析イベント表・RPC をまとめたインメモリのバックエンド
#[derive(Default)]
pub struct StubBackend {
    balances: Mutex<HashMap<String, i64>>,
    inserted: Mutex<Vec<AnalyticsRecord>>,
    pub fail_inserts: AtomicBool,
    pub daily_calls: AtomicUsize,
    pub ledger_loads: AtomicUsize,
}

impl StubBackend {
    pub fn set_balance(&self, user_id: &UserId, balance: i64) {
        self.balances
            .lock()
            .unwrap()
            .insert(user_id.to_string(), balance);
    }

    pub fn inserted_names(&self) -> Vec<String> {
        self.inserted
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.event_name.clone())
            .collect()
    }
}

#[async_trait]
impl LedgerGateway for StubBackend {
    async fn fetch_snapshot(&self, user_id: &UserId) -> Result<LedgerSnapshot, AppError> {
        self.ledger_loads.fetch_add(1, Ordering::SeqCst);
        let balance = self
            .balances
            .lock()
            .unwrap()
            .get(user_id.as_str())
            .copied()
            .unwrap_or(0);
        Ok(LedgerSnapshot::new(user_id.clone(), balance, balance, 0))
    }
}

#[async_trait]
impl AnalyticsSink for StubBackend {
    async fn insert_events(&self, records: &[AnalyticsRecord]) -> Result<(), AppError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Network("analytics endpoint unavailable".into()));
        }
        self.inserted.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}

#[async_trait]
impl DailyActionInvoker for StubBackend {
    async fn invoke_daily_action(
        &self,
        function: &str,
        user_id: &UserId,
    ) -> Result<Value, AppError> {
        self.daily_calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "function": function, "user": user_id.as_str(), "awarded": 10 }))
    }
}

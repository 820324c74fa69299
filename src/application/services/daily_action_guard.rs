use crate::application::ports::key_value_store::KeyValueStore;
use crate::domain::value_objects::UserId;
use crate::shared::clock::Clock;
use crate::shared::error::AppError;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DailyActionOutcome<T> {
    /// 今日はもう実行済み
    AlreadyDone,
    Completed(T),
}

impl<T> DailyActionOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, DailyActionOutcome::Completed(_))
    }
}

/// ユーザーのローカル暦日につき一回だけ処理を走らせる
///
/// 成功した日付だけを記録するので、失敗した場合は同じ日に再試行できる。
/// 永続化に失敗してもメモリ上の記録でプロセス内の重複は防ぐ。
pub struct DailyActionGuard {
    action_name: String,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// ユーザーごとにチェックから記録までを直列化する
    gates: Mutex<HashMap<UserId, Arc<Mutex<Option<NaiveDate>>>>>,
}

impl DailyActionGuard {
    pub fn new(
        action_name: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            action_name: action_name.into(),
            store,
            clock,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage_key(&self, user_id: &UserId) -> String {
        format!("daily_action:{}:{}", self.action_name, user_id)
    }

    pub async fn check_and_run<T, F, Fut>(
        &self,
        user_id: &UserId,
        action: F,
    ) -> Result<DailyActionOutcome<T>, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let gate = {
            let mut gates = self.gates.lock().await;
            Arc::clone(gates.entry(user_id.clone()).or_default())
        };
        let mut last_success = gate.lock().await;
        let today = self.clock.today_local();

        if self.already_done(*last_success, user_id, today).await {
            debug!(
                target: "daily_action",
                action = %self.action_name,
                user_id = %user_id,
                date = %today,
                "daily action already done"
            );
            return Ok(DailyActionOutcome::AlreadyDone);
        }

        let value = match action().await {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    target: "daily_action",
                    action = %self.action_name,
                    user_id = %user_id,
                    error = %err,
                    "daily action failed; will retry on next check"
                );
                return Err(err);
            }
        };

        *last_success = Some(today);
        let key = self.storage_key(user_id);
        if let Err(err) = self
            .store
            .set(&key, &today.format(DATE_FORMAT).to_string())
            .await
        {
            warn!(
                target: "daily_action",
                action = %self.action_name,
                user_id = %user_id,
                error = %err,
                "failed to persist daily action date"
            );
        }

        info!(
            target: "daily_action",
            action = %self.action_name,
            user_id = %user_id,
            date = %today,
            "daily action completed"
        );
        Ok(DailyActionOutcome::Completed(value))
    }

    async fn already_done(
        &self,
        last_success: Option<NaiveDate>,
        user_id: &UserId,
        today: NaiveDate,
    ) -> bool {
        if last_success == Some(today) {
            return true;
        }

        match self.store.get(&self.storage_key(user_id)).await {
            Ok(Some(raw)) => match NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT) {
                Ok(date) => date == today,
                Err(err) => {
                    warn!(
                        target: "daily_action",
                        action = %self.action_name,
                        value = %raw,
                        error = %err,
                        "ignoring unreadable daily action date"
                    );
                    false
                }
            },
            Ok(None) => false,
            Err(err) => {
                warn!(
                    target: "daily_action",
                    action = %self.action_name,
                    error = %err,
                    "failed to read daily action date"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::MemoryKeyValueStore;
    use crate::shared::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // 2026-03-01T23:30:00Z
    const LATE_EVENING_UTC: i64 = 1_772_407_800_000;
    const HOUR_MS: i64 = 60 * 60 * 1_000;

    fn user() -> UserId {
        UserId::parse("buyer-1").unwrap()
    }

    fn guard(store: Arc<MemoryKeyValueStore>, clock: Arc<ManualClock>) -> DailyActionGuard {
        DailyActionGuard::new("login_reward", store, clock)
    }

    #[tokio::test]
    async fn runs_once_per_day() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let clock = Arc::new(ManualClock::with_utc_offset(LATE_EVENING_UTC - 10 * HOUR_MS, 0));
        let guard = guard(store.clone(), clock.clone());
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let first = guard
            .check_and_run(&user(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(50)
            })
            .await
            .unwrap();
        assert_eq!(first, DailyActionOutcome::Completed(50));

        clock.advance_ms(2 * HOUR_MS);
        let second = guard
            .check_and_run(&user(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(50)
            })
            .await
            .unwrap();
        assert_eq!(second, DailyActionOutcome::AlreadyDone);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get("daily_action:login_reward:buyer-1").await.unwrap(),
            Some("2026-03-01".to_string())
        );
    }

    #[tokio::test]
    async fn local_midnight_starts_a_new_day() {
        let store = Arc::new(MemoryKeyValueStore::new());
        // UTC+9 では 2026-03-02 08:30
        let clock = Arc::new(ManualClock::with_utc_offset(LATE_EVENING_UTC, 9 * 3600));
        let guard = guard(store.clone(), clock.clone());

        assert!(
            guard
                .check_and_run(&user(), || async { Ok::<_, AppError>(()) })
                .await
                .unwrap()
                .is_completed()
        );
        assert_eq!(
            store.get("daily_action:login_reward:buyer-1").await.unwrap(),
            Some("2026-03-02".to_string())
        );

        clock.advance_ms(16 * HOUR_MS);
        assert!(
            guard
                .check_and_run(&user(), || async { Ok::<_, AppError>(()) })
                .await
                .unwrap()
                .is_completed()
        );
    }

    #[tokio::test]
    async fn failure_allows_retry_same_day() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let clock = Arc::new(ManualClock::with_utc_offset(LATE_EVENING_UTC, 0));
        let guard = guard(store.clone(), clock);

        let failed = guard
            .check_and_run(&user(), || async {
                Err::<(), _>(AppError::Network("offline".into()))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(store.len().await, 0);

        let retried = guard
            .check_and_run(&user(), || async { Ok::<_, AppError>(()) })
            .await
            .unwrap();
        assert!(retried.is_completed());
    }

    #[tokio::test]
    async fn concurrent_checks_run_the_action_once() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let clock = Arc::new(ManualClock::with_utc_offset(LATE_EVENING_UTC, 0));
        let guard = Arc::new(guard(store, clock));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let guard = Arc::clone(&guard);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                guard
                    .check_and_run(&user(), || async move {
                        tokio::task::yield_now().await;
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, AppError>(())
                    })
                    .await
            }));
        }

        let mut completed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_completed() {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_action_does_not_hold_other_users() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let clock = Arc::new(ManualClock::with_utc_offset(LATE_EVENING_UTC, 0));
        let guard = Arc::new(guard(store, clock));
        let release = Arc::new(tokio::sync::Notify::new());

        let slow = {
            let guard = Arc::clone(&guard);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                guard
                    .check_and_run(&user(), || async move {
                        release.notified().await;
                        Ok::<_, AppError>(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let other = UserId::parse("buyer-2").unwrap();
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            guard.check_and_run(&other, || async { Ok::<_, AppError>(()) }),
        )
        .await
        .expect("other user waited on a slow action")
        .unwrap();
        assert!(outcome.is_completed());

        release.notify_one();
        assert!(slow.await.unwrap().unwrap().is_completed());
    }

    #[tokio::test]
    async fn persisted_date_survives_restart() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let clock = Arc::new(ManualClock::with_utc_offset(LATE_EVENING_UTC, 0));

        guard(store.clone(), clock.clone())
            .check_and_run(&user(), || async { Ok::<_, AppError>(()) })
            .await
            .unwrap();

        let restarted = guard(store, clock);
        let outcome = restarted
            .check_and_run(&user(), || async { Ok::<_, AppError>(()) })
            .await
            .unwrap();
        assert_eq!(outcome, DailyActionOutcome::AlreadyDone);
    }

    #[tokio::test]
    async fn users_are_tracked_separately() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let clock = Arc::new(ManualClock::with_utc_offset(LATE_EVENING_UTC, 0));
        let guard = guard(store, clock);

        for name in ["buyer-1", "buyer-2"] {
            let user = UserId::parse(name).unwrap();
            let outcome = guard
                .check_and_run(&user, || async { Ok::<_, AppError>(()) })
                .await
                .unwrap();
            assert!(outcome.is_completed());
        }
    }
}

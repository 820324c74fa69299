use crate::application::ports::feedback::CoinFeedbackSink;
use crate::application::ports::ledger_gateway::{LedgerGateway, LedgerPush};
use crate::domain::entities::{CoinFeedback, LedgerLevel, LedgerSnapshot, LedgerTransaction};
use crate::domain::value_objects::UserId;
use crate::shared::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct LedgerState {
    snapshot: Option<LedgerSnapshot>,
    /// 最後に観測した残高。差分の算出にだけ使う。
    previous_balance: Option<i64>,
}

/// 一人分の残高をサーバー値に追従させる
///
/// 残高行の更新通知はその値を直接反映し、取引ログの挿入通知は全件再取得する。
/// どちらの経路でも差分は常に `previous_balance` から求めるので、二つの通知が前後したり
/// 重複したりしてもフィードバックは一度しか出ない。
pub struct LedgerSyncService {
    user_id: UserId,
    gateway: Arc<dyn LedgerGateway>,
    feedback: Arc<dyn CoinFeedbackSink>,
    state: Mutex<LedgerState>,
    /// 再取得どうしの順序だけを揃える。状態のロックは取得中に握らない。
    reload_gate: Mutex<()>,
    load_timeout: Duration,
}

impl LedgerSyncService {
    pub fn new(
        user_id: UserId,
        gateway: Arc<dyn LedgerGateway>,
        feedback: Arc<dyn CoinFeedbackSink>,
        load_timeout: Duration,
    ) -> Self {
        Self {
            user_id,
            gateway,
            feedback,
            state: Mutex::new(LedgerState::default()),
            reload_gate: Mutex::new(()),
            load_timeout,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub async fn snapshot(&self) -> Option<LedgerSnapshot> {
        self.state.lock().await.snapshot.clone()
    }

    pub async fn previous_balance(&self) -> Option<i64> {
        self.state.lock().await.previous_balance
    }

    /// サーバーから取り直してローカル状態を丸ごと置き換える（フィードバックなし）
    pub async fn load(&self) -> Result<LedgerSnapshot, AppError> {
        let _reload = self.reload_gate.lock().await;
        let snapshot = self.fetch().await?;

        let mut state = self.state.lock().await;
        state.previous_balance = Some(snapshot.balance);
        state.snapshot = Some(snapshot.clone());
        drop(state);
        debug!(
            target: "ledger",
            user_id = %self.user_id,
            balance = snapshot.balance,
            level = %snapshot.level,
            "ledger snapshot loaded"
        );
        Ok(snapshot)
    }

    /// 残高行の更新通知
    pub async fn on_remote_change(&self, new_balance: i64) -> Option<CoinFeedback> {
        let mut state = self.state.lock().await;

        let Some(previous) = state.previous_balance else {
            // 初回ロード前の通知は基準値としてだけ使う
            state.previous_balance = Some(new_balance);
            debug!(target: "ledger", user_id = %self.user_id, new_balance, "baseline set from push before load");
            return None;
        };

        state.snapshot = state
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.with_balance(new_balance));
        state.previous_balance = Some(new_balance);

        let feedback = self.feedback_for(previous, new_balance, None);
        drop(state);

        if let Some(feedback) = &feedback {
            self.feedback.emit(feedback.clone());
        } else {
            debug!(target: "ledger", user_id = %self.user_id, previous, new_balance, "balance changed without gain");
        }
        feedback
    }

    /// 取引ログの挿入通知。差分を足し込まずに全件再取得する。
    pub async fn on_transaction_inserted(
        &self,
        transaction: LedgerTransaction,
    ) -> Result<Option<CoinFeedback>, AppError> {
        let _reload = self.reload_gate.lock().await;
        let snapshot = self.fetch().await?;

        // 取得中に届いた残高通知も反映済みの値と比べる
        let mut state = self.state.lock().await;
        let previous = state.previous_balance;
        state.previous_balance = Some(snapshot.balance);
        state.snapshot = Some(snapshot.clone());
        drop(state);

        if let Some(previous) = previous {
            if snapshot.balance - previous != transaction.amount {
                debug!(
                    target: "ledger",
                    user_id = %self.user_id,
                    amount = transaction.amount,
                    observed = snapshot.balance - previous,
                    "transaction amount differs from observed delta"
                );
            }
        }

        let feedback = previous.and_then(|previous| {
            self.feedback_for(previous, snapshot.balance, transaction.description.clone())
        });
        if let Some(feedback) = &feedback {
            self.feedback.emit(feedback.clone());
        }
        Ok(feedback)
    }

    /// 検証済みのプッシュ通知を振り分ける
    pub async fn apply(&self, push: LedgerPush) -> Result<Option<CoinFeedback>, AppError> {
        if push.user_id() != &self.user_id {
            warn!(
                target: "ledger",
                expected = %self.user_id,
                received = %push.user_id(),
                "ignoring ledger push for another user"
            );
            return Ok(None);
        }

        match push {
            LedgerPush::BalanceChanged { new_balance, .. } => {
                Ok(self.on_remote_change(new_balance).await)
            }
            LedgerPush::TransactionInserted(transaction) => {
                self.on_transaction_inserted(transaction).await
            }
        }
    }

    async fn fetch(&self) -> Result<LedgerSnapshot, AppError> {
        let snapshot =
            match tokio::time::timeout(self.load_timeout, self.gateway.fetch_snapshot(&self.user_id))
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(AppError::timeout("ledger load", self.load_timeout)),
            };

        if snapshot.user_id != self.user_id {
            return Err(AppError::ValidationError(format!(
                "ledger snapshot belongs to {} instead of {}",
                snapshot.user_id, self.user_id
            )));
        }
        Ok(snapshot)
    }

    fn feedback_for(
        &self,
        previous: i64,
        balance: i64,
        description: Option<String>,
    ) -> Option<CoinFeedback> {
        let delta = balance - previous;
        if delta <= 0 {
            return None;
        }

        let old_level = LedgerLevel::from_balance(previous);
        let new_level = LedgerLevel::from_balance(balance);
        let level_up = (new_level > old_level).then_some(new_level);

        info!(
            target: "ledger",
            user_id = %self.user_id,
            delta,
            balance,
            level_up = level_up.map(|l| l.as_str()),
            "coins gained"
        );

        Some(CoinFeedback {
            user_id: self.user_id.clone(),
            delta,
            balance,
            description,
            level_up,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    struct StubGateway {
        balance: AtomicI64,
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    impl StubGateway {
        fn with_balance(balance: i64) -> Self {
            Self {
                balance: AtomicI64::new(balance),
                calls: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl LedgerGateway for StubGateway {
        async fn fetch_snapshot(&self, user_id: &UserId) -> Result<LedgerSnapshot, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Network("backend unreachable".into()));
            }
            let balance = self.balance.load(Ordering::SeqCst);
            Ok(LedgerSnapshot::new(user_id.clone(), balance, balance + 100, 100))
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        emitted: StdMutex<Vec<CoinFeedback>>,
    }

    impl CoinFeedbackSink for CollectingSink {
        fn emit(&self, feedback: CoinFeedback) {
            self.emitted.lock().unwrap().push(feedback);
        }
    }

    impl CollectingSink {
        fn count(&self) -> usize {
            self.emitted.lock().unwrap().len()
        }
    }

    fn user() -> UserId {
        UserId::parse("buyer-1").unwrap()
    }

    fn service(gateway: Arc<StubGateway>, sink: Arc<CollectingSink>) -> LedgerSyncService {
        LedgerSyncService::new(user(), gateway, sink, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn load_sets_baseline_without_feedback() {
        let gateway = Arc::new(StubGateway::with_balance(100));
        let sink = Arc::new(CollectingSink::default());
        let service = service(gateway, sink.clone());

        let snapshot = service.load().await.unwrap();
        assert_eq!(snapshot.balance, 100);
        assert_eq!(service.previous_balance().await, Some(100));
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn increase_emits_once_and_duplicate_is_silent() {
        let gateway = Arc::new(StubGateway::with_balance(100));
        let sink = Arc::new(CollectingSink::default());
        let service = service(gateway, sink.clone());
        service.load().await.unwrap();

        let feedback = service.on_remote_change(130).await.unwrap();
        assert_eq!(feedback.delta, 30);
        assert_eq!(sink.count(), 1);

        assert!(service.on_remote_change(130).await.is_none());
        assert_eq!(sink.count(), 1);
        assert_eq!(service.snapshot().await.unwrap().balance, 130);
    }

    #[tokio::test]
    async fn decrease_updates_silently() {
        let gateway = Arc::new(StubGateway::with_balance(100));
        let sink = Arc::new(CollectingSink::default());
        let service = service(gateway, sink.clone());
        service.load().await.unwrap();

        assert!(service.on_remote_change(80).await.is_none());
        assert_eq!(service.snapshot().await.unwrap().balance, 80);
        assert_eq!(service.previous_balance().await, Some(80));
        assert_eq!(sink.count(), 0);

        // 次の増加は 80 から数える
        let feedback = service.on_remote_change(90).await.unwrap();
        assert_eq!(feedback.delta, 10);
    }

    #[tokio::test]
    async fn transaction_insert_reloads_and_reports_description() {
        let gateway = Arc::new(StubGateway::with_balance(500));
        let sink = Arc::new(CollectingSink::default());
        let service = service(gateway.clone(), sink.clone());
        service.load().await.unwrap();

        gateway.balance.store(550, Ordering::SeqCst);
        let feedback = service
            .on_transaction_inserted(LedgerTransaction {
                user_id: user(),
                amount: 50,
                description: Some("purchase reward".into()),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(feedback.message(), "+50 PandaCoins: purchase reward");
        assert_eq!(feedback.level_up, None);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);

        // 同じ変化を残高行の通知が後追いしても二重には出ない
        assert!(service.on_remote_change(550).await.is_none());
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn balance_push_before_transaction_insert_is_not_double_counted() {
        let gateway = Arc::new(StubGateway::with_balance(500));
        let sink = Arc::new(CollectingSink::default());
        let service = service(gateway.clone(), sink.clone());
        service.load().await.unwrap();

        gateway.balance.store(550, Ordering::SeqCst);
        assert!(service.on_remote_change(550).await.is_some());
        let second = service
            .on_transaction_inserted(LedgerTransaction {
                user_id: user(),
                amount: 50,
                description: Some("purchase reward".into()),
            })
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_state() {
        let gateway = Arc::new(StubGateway::with_balance(200));
        let sink = Arc::new(CollectingSink::default());
        let service = service(gateway.clone(), sink.clone());
        service.load().await.unwrap();

        gateway.fail.store(true, Ordering::SeqCst);
        let result = service
            .on_transaction_inserted(LedgerTransaction {
                user_id: user(),
                amount: 10,
                description: None,
            })
            .await;
        assert!(result.is_err());
        assert_eq!(service.previous_balance().await, Some(200));
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn push_before_load_only_sets_baseline() {
        let gateway = Arc::new(StubGateway::with_balance(0));
        let sink = Arc::new(CollectingSink::default());
        let service = service(gateway, sink.clone());

        assert!(service.on_remote_change(300).await.is_none());
        assert_eq!(service.previous_balance().await, Some(300));
        assert!(service.snapshot().await.is_none());
        assert_eq!(sink.count(), 0);
    }

    struct SlowGateway {
        balance: AtomicI64,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl LedgerGateway for SlowGateway {
        async fn fetch_snapshot(&self, user_id: &UserId) -> Result<LedgerSnapshot, AppError> {
            self.release.notified().await;
            let balance = self.balance.load(Ordering::SeqCst);
            Ok(LedgerSnapshot::new(user_id.clone(), balance, balance, 0))
        }
    }

    #[tokio::test]
    async fn slow_reload_does_not_block_balance_pushes() {
        let gateway = Arc::new(SlowGateway {
            balance: AtomicI64::new(500),
            release: tokio::sync::Notify::new(),
        });
        let sink = Arc::new(CollectingSink::default());
        let service = Arc::new(LedgerSyncService::new(
            user(),
            gateway.clone(),
            sink.clone(),
            Duration::from_secs(5),
        ));
        assert!(service.on_remote_change(500).await.is_none());

        let reloading = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .on_transaction_inserted(LedgerTransaction {
                        user_id: user(),
                        amount: 50,
                        description: Some("purchase reward".into()),
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        // 取得待ちの間も残高行の通知はすぐ処理される
        let pushed = tokio::time::timeout(Duration::from_secs(1), service.on_remote_change(550))
            .await
            .expect("balance push blocked by reload");
        assert_eq!(pushed.unwrap().delta, 50);

        gateway.balance.store(550, Ordering::SeqCst);
        gateway.release.notify_one();
        let reloaded = reloading.await.unwrap().unwrap();
        assert!(reloaded.is_none());
        assert_eq!(sink.count(), 1);
        assert_eq!(service.snapshot().await.unwrap().balance, 550);
    }

    #[tokio::test]
    async fn pushes_for_other_users_are_ignored() {
        let gateway = Arc::new(StubGateway::with_balance(100));
        let sink = Arc::new(CollectingSink::default());
        let service = service(gateway, sink.clone());
        service.load().await.unwrap();

        let result = service
            .apply(LedgerPush::BalanceChanged {
                user_id: UserId::parse("someone-else").unwrap(),
                new_balance: 9_999,
            })
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(service.previous_balance().await, Some(100));
    }
}

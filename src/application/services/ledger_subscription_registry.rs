use super::ledger_sync_service::LedgerSyncService;
use crate::application::ports::feedback::CoinFeedbackSink;
use crate::application::ports::ledger_gateway::{
    LedgerEventStream, LedgerGateway, LedgerPushChannel, RealtimeMessage,
};
use crate::domain::value_objects::{SubscriptionRecord, SubscriptionStatus, UserId};
use crate::shared::clock::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct RegistryEntry {
    ref_count: usize,
    service: Arc<LedgerSyncService>,
    record: Arc<RwLock<SubscriptionRecord>>,
    task: Option<JoinHandle<()>>,
}

impl RegistryEntry {
    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn task_alive(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// ユーザーごとのリアルタイム購読を参照カウントで共有する
///
/// 同じユーザーを表示する画面が複数あっても購読は一本だけ張る。
/// 最後の参照が外れた時点で購読タスクを止める。
pub struct LedgerSubscriptionRegistry {
    gateway: Arc<dyn LedgerGateway>,
    push_channel: Arc<dyn LedgerPushChannel>,
    feedback: Arc<dyn CoinFeedbackSink>,
    clock: Arc<dyn Clock>,
    load_timeout: Duration,
    entries: Mutex<HashMap<UserId, RegistryEntry>>,
}

impl LedgerSubscriptionRegistry {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        push_channel: Arc<dyn LedgerPushChannel>,
        feedback: Arc<dyn CoinFeedbackSink>,
        clock: Arc<dyn Clock>,
        load_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            push_channel,
            feedback,
            clock,
            load_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 購読を取得する。初回は購読を張ってから残高をロードする。
    ///
    /// ロードや購読に失敗しても `Err` にはせず、状態を `NeedsResync` にして返す。
    pub async fn acquire(&self, user_id: &UserId) -> Arc<LedgerSyncService> {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(user_id) {
            entry.ref_count += 1;
            debug!(
                target: "ledger::subscription",
                user_id = %user_id,
                ref_count = entry.ref_count,
                "ledger subscription shared"
            );
            return Arc::clone(&entry.service);
        }

        let service = Arc::new(LedgerSyncService::new(
            user_id.clone(),
            Arc::clone(&self.gateway),
            Arc::clone(&self.feedback),
            self.load_timeout,
        ));
        let mut entry = RegistryEntry {
            ref_count: 1,
            service: Arc::clone(&service),
            record: Arc::new(RwLock::new(SubscriptionRecord::new(user_id.clone()))),
            task: None,
        };
        self.connect(&mut entry).await;
        entries.insert(user_id.clone(), entry);

        service
    }

    /// 参照を一つ外す。残り参照数を返す。
    pub async fn release(&self, user_id: &UserId) -> usize {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(user_id) else {
            return 0;
        };

        entry.ref_count = entry.ref_count.saturating_sub(1);
        let remaining = entry.ref_count;
        if remaining == 0 {
            if let Some(mut entry) = entries.remove(user_id) {
                entry.stop_task();
            }
            info!(target: "ledger::subscription", user_id = %user_id, "ledger subscription closed");
        }
        remaining
    }

    /// 非アクティブな購読を張り直す（フォアグラウンド復帰時）
    pub async fn resync_inactive(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let mut reconnected = 0;

        for (user_id, entry) in entries.iter_mut() {
            let status = entry.record.read().await.status;
            if status.is_active() && entry.task_alive() {
                continue;
            }

            info!(
                target: "ledger::subscription",
                user_id = %user_id,
                status = status.as_str(),
                "resyncing ledger subscription"
            );
            entry.stop_task();
            if self.connect(entry).await {
                reconnected += 1;
            }
        }

        reconnected
    }

    pub async fn status(&self, user_id: &UserId) -> Option<SubscriptionRecord> {
        let entries = self.entries.lock().await;
        match entries.get(user_id) {
            Some(entry) => Some(entry.record.read().await.clone()),
            None => None,
        }
    }

    /// 参照を増やさずに既存の同期サービスを返す
    pub async fn service(&self, user_id: &UserId) -> Option<Arc<LedgerSyncService>> {
        self.entries
            .lock()
            .await
            .get(user_id)
            .map(|entry| Arc::clone(&entry.service))
    }

    pub async fn ref_count(&self, user_id: &UserId) -> usize {
        self.entries
            .lock()
            .await
            .get(user_id)
            .map(|entry| entry.ref_count)
            .unwrap_or(0)
    }

    /// 全購読を止める（ログアウト時）
    pub async fn shutdown(&self) {
        let mut entries = self.entries.lock().await;
        for (_, mut entry) in entries.drain() {
            entry.stop_task();
        }
    }

    async fn connect(&self, entry: &mut RegistryEntry) -> bool {
        let user_id = entry.service.user_id().clone();
        entry
            .record
            .write()
            .await
            .mark_requested(self.clock.now_ms());

        // ロード中の通知を取りこぼさないよう、購読を先に張る。
        // 届いた通知はストリームに溜まり、ロード後に順に反映される。
        let subscribed = self.push_channel.subscribe(&user_id).await;
        let load_error = entry.service.load().await.err();
        if let Some(err) = &load_error {
            warn!(
                target: "ledger::subscription",
                user_id = %user_id,
                error = %err,
                "initial ledger load failed"
            );
        }

        let stream = match subscribed {
            Ok(stream) => stream,
            Err(err) => {
                warn!(
                    target: "ledger::subscription",
                    user_id = %user_id,
                    error = %err,
                    "ledger subscription failed"
                );
                entry
                    .record
                    .write()
                    .await
                    .mark_failure(self.clock.now_ms(), err.to_string());
                return false;
            }
        };

        {
            let mut record = entry.record.write().await;
            match load_error {
                // 購読は張れたが基準値が無いので次の復帰時に取り直す
                Some(err) => record.mark_failure(self.clock.now_ms(), err.to_string()),
                None => record.mark_subscribed(self.clock.now_ms()),
            }
        }

        entry.task = Some(tokio::spawn(run_dispatch(
            Arc::clone(&entry.service),
            Arc::clone(&entry.record),
            Arc::clone(&self.clock),
            stream,
        )));
        true
    }
}

impl Drop for LedgerSubscriptionRegistry {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().values_mut() {
            entry.stop_task();
        }
    }
}

async fn run_dispatch(
    service: Arc<LedgerSyncService>,
    record: Arc<RwLock<SubscriptionRecord>>,
    clock: Arc<dyn Clock>,
    mut stream: LedgerEventStream,
) {
    while let Some(message) = stream.recv().await {
        match message {
            RealtimeMessage::Push(push) => {
                let channel = push.channel();
                if let Err(err) = service.apply(push).await {
                    warn!(
                        target: "ledger::subscription",
                        user_id = %service.user_id(),
                        channel = channel.as_str(),
                        error = %err,
                        "failed to apply ledger push"
                    );
                    // 通信系の失敗は次の通知で取り直せるので購読は維持する
                    if !err.is_transient() {
                        record.write().await.mark_failure(clock.now_ms(), err.to_string());
                    }
                }
            }
            RealtimeMessage::Error(message) => {
                warn!(
                    target: "ledger::subscription",
                    user_id = %service.user_id(),
                    error = %message,
                    "realtime channel error"
                );
                record.write().await.mark_failure(clock.now_ms(), message);
                return;
            }
        }
    }

    let mut record = record.write().await;
    if record.status != SubscriptionStatus::NeedsResync {
        warn!(
            target: "ledger::subscription",
            user_id = %service.user_id(),
            "realtime stream closed"
        );
        record.mark_failure(clock.now_ms(), "realtime stream closed");
    }
}

use crate::domain::value_objects::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerChannel {
    /// 残高行の UPDATE
    BalanceRow,
    /// 取引ログの INSERT
    TransactionLog,
}

impl LedgerChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerChannel::BalanceRow => "balance_row",
            LedgerChannel::TransactionLog => "transaction_log",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Pending,
    Subscribed,
    NeedsResync,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Subscribed => "subscribed",
            SubscriptionStatus::NeedsResync => "needs_resync",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionStatus::Subscribed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub user_id: UserId,
    pub status: SubscriptionStatus,
    pub last_synced_at: Option<i64>,
    pub last_attempt_at: Option<i64>,
    pub failure_count: i64,
    pub error_message: Option<String>,
}

impl SubscriptionRecord {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            status: SubscriptionStatus::Pending,
            last_synced_at: None,
            last_attempt_at: None,
            failure_count: 0,
            error_message: None,
        }
    }

    pub fn mark_requested(&mut self, attempt_ts: i64) {
        self.status = SubscriptionStatus::Pending;
        self.last_attempt_at = Some(attempt_ts);
        self.error_message = None;
    }

    pub fn mark_subscribed(&mut self, synced_at: i64) {
        self.status = SubscriptionStatus::Subscribed;
        self.last_synced_at = Some(synced_at);
        self.failure_count = 0;
        self.error_message = None;
    }

    pub fn mark_failure(&mut self, attempt_ts: i64, error_message: impl Into<String>) {
        self.status = SubscriptionStatus::NeedsResync;
        self.last_attempt_at = Some(attempt_ts);
        self.failure_count += 1;
        self.error_message = Some(error_message.into());
    }
}

pub mod analytics_service;
pub mod daily_action_guard;
pub mod delivery_estimator;
pub mod ledger_subscription_registry;
pub mod ledger_sync_service;
pub mod session;

pub use analytics_service::{AnalyticsRetryPolicy, AnalyticsService, AnalyticsSettings};
pub use daily_action_guard::{DailyActionGuard, DailyActionOutcome};
pub use delivery_estimator::{DeliveryEstimator, DeliveryPolicy};
pub use ledger_subscription_registry::LedgerSubscriptionRegistry;
pub use ledger_sync_service::LedgerSyncService;
pub use session::SessionState;

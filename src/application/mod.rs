pub mod ports;
pub mod services;

pub use services::{
    AnalyticsService,
    DailyActionGuard,
    DeliveryEstimator,
    LedgerSubscriptionRegistry,
    LedgerSyncService,
    SessionState,
};

pub mod analytics_event;
pub mod delivery;
pub mod ledger;

pub use analytics_event::{AnalyticsRecord, EventProperties, QueuedEvent};
pub use delivery::{
    Coordinates, DeliveryEstimate, DeliveryQuote, DeliveryZone, FeeTier, SpeedClass,
    UndeliverableReason, ZoneTable,
};
pub use ledger::{
    COIN_LABEL, CoinFeedback, LedgerLevel, LedgerSnapshot, LedgerTransaction,
};

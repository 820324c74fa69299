pub mod entities;
pub mod value_objects;

pub use entities::{CoinFeedback, DeliveryEstimate, LedgerSnapshot, QueuedEvent};
pub use value_objects::{CacheKey, EventName, UserId};

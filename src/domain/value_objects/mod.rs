pub mod cache_key;
pub mod event_name;
pub mod subscription;
pub mod user_id;

pub use cache_key::{CacheFamily, CacheKey};
pub use event_name::EventName;
pub use subscription::{LedgerChannel, SubscriptionRecord, SubscriptionStatus};
pub use user_id::UserId;

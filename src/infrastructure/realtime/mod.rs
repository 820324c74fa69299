pub mod hub;
pub mod payload;

pub use hub::RealtimeHub;
pub use payload::{RealtimePayloadError, parse_change, parse_change_for};

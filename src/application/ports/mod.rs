pub mod analytics_sink;
pub mod daily_action;
pub mod feedback;
pub mod key_value_store;
pub mod ledger_gateway;

pub use analytics_sink::AnalyticsSink;
pub use daily_action::DailyActionInvoker;
pub use feedback::CoinFeedbackSink;
pub use key_value_store::KeyValueStore;
pub use ledger_gateway::{
    LedgerEventStream, LedgerGateway, LedgerPush, LedgerPushChannel, RealtimeMessage,
};

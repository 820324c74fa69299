pub mod feedback_bus;

pub use feedback_bus::FeedbackBus;

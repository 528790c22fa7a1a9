pub mod configuration;
pub mod event_logger;
pub mod store;
pub mod time;

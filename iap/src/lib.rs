pub mod cache;
pub mod config;
pub mod dedupe;
pub mod event;
pub mod logger;
pub mod names;
pub mod observer;
pub mod resolver;
pub mod services;
pub mod storefront;
pub mod test_utils;
pub mod timer;
pub mod transaction;

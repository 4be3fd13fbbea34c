pub mod availability;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod model;
pub mod notify;
pub mod observability;
pub mod segment;
pub mod store;
pub mod wal;

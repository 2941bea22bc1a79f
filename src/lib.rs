pub mod config;
pub mod engine;
pub mod interval;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod server;
pub mod token;
pub mod wal;

pub mod config;
pub mod context;
pub mod coordinator;
pub mod decider;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod instance;
pub mod journal;
pub mod location;
pub mod log_io;
pub mod model;
pub mod sounds;
pub mod store;

pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod limits;
pub mod local_store;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod session;
pub mod wal;
pub mod wire;
pub mod workflow;

pub use error::{Error, Result};

//! InnoFlow execution worker.
//!
//! Polls Postgres for pending workflow executions and runs them with the
//! engine from `innoflow-workflow`.

pub mod config;
pub mod db;
pub mod worker;

pub use config::WorkerConfig;
pub use db::PgStore;
pub use worker::{Outcome, Worker};

pub mod common;
pub mod config;
pub mod coordinator;
pub mod datasource;
pub mod error;
pub mod execution;
pub mod record;
pub mod schedule;
pub mod state;
pub mod stats;
pub mod task;

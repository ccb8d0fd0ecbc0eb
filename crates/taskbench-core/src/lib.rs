pub mod agent;
pub mod config;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod session;
pub mod sqlite;
pub mod task;

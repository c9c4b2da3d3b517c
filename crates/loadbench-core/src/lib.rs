pub mod config;
pub mod deployment;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod plugins;
pub mod settings;
pub mod sqlite;

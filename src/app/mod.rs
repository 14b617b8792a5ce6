pub mod adb;
pub mod commands;
pub mod compat;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod scrcpy;
pub mod session;
pub mod state;

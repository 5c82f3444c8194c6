pub mod config;
pub mod ipc;

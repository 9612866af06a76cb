pub mod config;
pub mod error;
pub mod magnet;
pub mod models;
pub mod storage;

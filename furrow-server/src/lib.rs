pub mod api;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod mqtt;
pub mod storage;

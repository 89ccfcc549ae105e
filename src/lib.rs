pub mod app;
pub mod call;
pub mod config;
pub mod handler;
pub mod version;

#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod article;
pub mod config;
pub mod data;
pub mod guardian;
pub mod loader;
pub mod query;
pub mod settings;
pub mod storage;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};

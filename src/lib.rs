pub mod app;
pub mod config;
pub mod context;
pub mod error;
pub mod gemini;
pub mod history;
pub mod logging;
pub mod page;
pub mod persistence;
pub mod render;
pub mod settings;
pub mod status;
pub mod store;
pub mod theme;

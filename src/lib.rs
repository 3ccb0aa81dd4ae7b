pub mod app;
pub mod cache;
pub mod chart;
pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod go;
pub mod importer;
pub mod output;
pub mod source;
pub mod store;
pub mod tui;

pub mod aggregate;
pub mod artifacts;
pub mod cli;
pub mod config;
pub mod core;
pub mod csv;
pub mod email;
pub mod engine;
pub mod exit;
pub mod mapper;
pub mod narrative;
pub mod oracle;
pub mod platform;
pub mod registry;
pub mod sink;
pub mod source;
pub mod ui;

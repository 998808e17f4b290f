pub mod artifacts;
pub mod broadcast;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod phases;
pub mod registry;
pub mod scanner;
pub mod server;
pub mod subprocess;
pub mod ui;

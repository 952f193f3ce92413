pub mod app;
pub mod compose;
pub mod config;
pub mod engine;
pub mod logging;
pub mod reference;
pub mod update;
pub mod version;

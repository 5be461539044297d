pub mod config;
pub mod content;
pub mod error;
pub mod script;
pub mod speakers;

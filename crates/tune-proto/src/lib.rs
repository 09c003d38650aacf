pub mod catalog;
pub mod config;
pub mod display;
pub mod intent;
pub mod platform;
pub mod protocol;
pub mod state;

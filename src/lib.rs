pub mod config;
pub mod cpu;
pub mod decoder;
pub mod loader;
pub mod memory;
pub mod monitor;

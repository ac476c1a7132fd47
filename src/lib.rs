pub mod config;
pub mod daemon;
pub mod index;
pub mod sync;
pub mod types;

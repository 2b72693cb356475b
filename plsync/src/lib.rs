pub mod config;
pub mod lock;
pub mod logging;
pub mod runner;
pub mod sync;

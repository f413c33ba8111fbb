// Library module for assetsync
// Re-exports modules for use in integration tests and the command line front end

pub mod config;
pub mod logging;
pub mod sync;

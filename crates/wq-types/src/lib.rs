pub mod config;
pub mod errors;
pub mod logging;

#[cfg(feature = "test-support")]
pub mod testing;

pub use config::*;
pub use errors::*;

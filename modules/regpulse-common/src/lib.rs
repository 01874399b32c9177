pub mod config;
pub mod error;
pub mod identity;
pub mod types;

pub use config::Config;
pub use error::RegPulseError;
pub use identity::*;
pub use types::*;

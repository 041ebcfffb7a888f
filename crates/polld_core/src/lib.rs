pub mod config;
pub mod directory;
pub mod entities;
pub mod error;
pub mod notification;
pub mod ports;
pub mod registry;
pub mod session;
pub mod use_cases;

#[cfg(test)]
mod testing;

pub use error::{Error, ErrorKind, FailureKind, LoginFailure};
pub use use_cases::AccountWatcher;

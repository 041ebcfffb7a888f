pub mod configuration;
pub mod file_directory;
pub mod keyring_sessions;
pub mod telemetry;

// Re-exports for convenience
pub use file_directory::FileAccountDirectory;
pub use keyring_sessions::{KeyringSessionProvider, KeyringStore, SecretStore};

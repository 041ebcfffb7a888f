mod reconcile;
mod watch_accounts;

pub use watch_accounts::AccountWatcher;

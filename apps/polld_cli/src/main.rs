use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use polld_adapters::configuration;
use polld_adapters::file_directory::{AccountRecord, AuthRecord, ServiceBinding, ServiceRecord};
use polld_adapters::telemetry;
use polld_adapters::{FileAccountDirectory, KeyringSessionProvider};
use polld_core::config::{DirectorySettings, Settings, WatchStrategy};
use polld_core::entities::{AccountId, AccountState, ServiceId, SessionData, SupportedServices};
use polld_core::AccountWatcher;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval_at, Instant, Interval};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Reactive,
    Poll,
}

impl From<StrategyArg> for WatchStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Reactive => WatchStrategy::Reactive,
            StrategyArg::Poll => WatchStrategy::Poll,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    // --- Watcher ---
    /// Watch accounts and print one JSON line per credential change
    Watch {
        /// Service identifiers to watch (defaults to the configured list)
        services: Vec<String>,

        /// Watch every service of this type instead
        #[arg(long, conflicts_with = "services")]
        service_type: Option<String>,

        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Re-scan the directory every SECS seconds
        #[arg(long, value_name = "SECS")]
        rescan_interval: Option<u64>,
    },

    // --- Directory commands ---
    /// List configured accounts
    Accounts,

    /// Add a service to the catalogue
    AddService {
        id: String,
        service_type: String,
    },

    /// Add or replace an account
    AddAccount {
        id: u32,

        /// Credentials record the account's secrets are stored under
        #[arg(long)]
        credentials_id: Option<u32>,

        #[arg(long)]
        display_name: Option<String>,

        #[arg(long, default_value = "oauth2")]
        method: String,

        #[arg(long, default_value = "web_server")]
        mechanism: String,

        /// Login parameter as KEY=VALUE (e.g. ClientId=abc), repeatable
        #[arg(short, long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,

        /// Service to configure on the account (disabled), repeatable
        #[arg(short, long = "service")]
        services: Vec<String>,
    },

    /// Enable a service on an account
    Enable { account: u32, service: String },

    /// Disable a service on an account
    Disable { account: u32, service: String },

    /// Remove an account
    RemoveAccount {
        account: u32,

        /// Keep the stored secret of its credentials record
        #[arg(long, default_value = "false")]
        keep_secret: bool,
    },

    // --- Secret commands ---
    /// Store the secret for a credentials record in the keyring
    StoreSecret {
        credentials_id: u32,

        /// Store a user name and password instead of an access token
        #[arg(long)]
        user_name: Option<String>,
    },

    /// Delete the stored secret of a credentials record
    ClearSecret { credentials_id: u32 },

    /// Test credential storage (keyring)
    TestKeyring,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

/// Control line read from stdin while watching
#[derive(Debug, PartialEq, Eq)]
enum ControlLine {
    Rescan,
    Refresh(AccountId, String),
}

fn parse_control_line(line: &str) -> Result<Option<ControlLine>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => Ok(None),
        ["rescan"] => Ok(Some(ControlLine::Rescan)),
        ["refresh", account, service] => {
            let account = account
                .parse::<u32>()
                .map_err(|_| format!("invalid account id '{}'", account))?;
            Ok(Some(ControlLine::Refresh(
                AccountId::new(account),
                service.to_string(),
            )))
        }
        _ => Err(format!(
            "unknown command '{}' (expected 'rescan' or 'refresh <account> <service>')",
            line.trim()
        )),
    }
}

fn get_data_dir() -> PathBuf {
    configuration::project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("account-polld")
        })
}

fn open_directory(settings: &DirectorySettings) -> FileAccountDirectory {
    let directory = match &settings.path {
        Some(path) => FileAccountDirectory::from_path(path.clone()),
        None => FileAccountDirectory::new(get_data_dir()),
    };
    directory.with_poll_interval(Duration::from_millis(settings.poll_interval_ms))
}

fn print_state(state: &AccountState) {
    match serde_json::to_string(state) {
        Ok(line) => println!("{}", line),
        Err(e) => error!(error = %e, "failed to encode account state"),
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn watch(
    settings: &Settings,
    services: Vec<String>,
    service_type: Option<String>,
    strategy: Option<StrategyArg>,
    rescan_interval: Option<u64>,
) -> anyhow::Result<()> {
    let supported = match (service_type, services.is_empty()) {
        (Some(service_type), _) => SupportedServices::service_type(service_type),
        (None, false) => SupportedServices::ids(services),
        (None, true) => settings.watcher.supported_services(),
    };
    let strategy = strategy
        .map(WatchStrategy::from)
        .unwrap_or(settings.watcher.strategy);
    let rescan_interval = rescan_interval.or(settings.watcher.rescan_interval_secs);

    let directory = Arc::new(open_directory(&settings.directory));
    info!(path = %directory.store_path().display(), ?strategy, "watching accounts");

    let watcher = AccountWatcher::new(
        directory,
        Arc::new(KeyringSessionProvider::new()),
        supported,
        strategy,
        print_state,
    )?;
    watcher.run()?;

    let mut rescan = rescan_interval.filter(|secs| *secs > 0).map(|secs| {
        let period = Duration::from_secs(secs);
        interval_at(Instant::now() + period, period)
    });
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            _ = next_tick(&mut rescan) => watcher.run()?,
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match parse_control_line(&line) {
                    Ok(Some(ControlLine::Rescan)) => watcher.run()?,
                    Ok(Some(ControlLine::Refresh(account, service))) => {
                        watcher.refresh(account, service)?
                    }
                    Ok(None) => {}
                    Err(message) => eprintln!("{}", message),
                },
                None => stdin_open = false,
            },
        }
    }

    watcher.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = match configuration::get_configuration() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return Err(anyhow::anyhow!("configuration loading failed"));
        }
    };

    let _guard = telemetry::init_subscriber("polld", &settings.log_level)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            services,
            service_type,
            strategy,
            rescan_interval,
        } => {
            watch(&settings, services, service_type, strategy, rescan_interval).await?;
        }

        // --- Directory commands ---
        Commands::Accounts => {
            let directory = open_directory(&settings.directory);
            let provider = KeyringSessionProvider::new();
            let document = directory.document().await?;

            if document.accounts.is_empty() {
                println!("No accounts configured.");
                println!("Use 'polld add-account <id>' to add one.");
            } else {
                println!("Accounts in {}:", directory.store_path().display());
                for account in &document.accounts {
                    let has_secret = provider
                        .read_secret(account.credentials_id)
                        .await
                        .map(|s| s.is_some())
                        .unwrap_or(false);
                    println!(
                        "  {} {} (credentials {}, {}) {}",
                        account.id,
                        account.display_name.as_deref().unwrap_or("-"),
                        account.credentials_id,
                        account.auth.method,
                        if has_secret { "[secret stored]" } else { "" },
                    );
                    for binding in &account.services {
                        println!(
                            "      {} {}",
                            if binding.enabled { "+" } else { "-" },
                            binding.service
                        );
                    }
                }
            }
        }

        Commands::AddService { id, service_type } => {
            let directory = open_directory(&settings.directory);
            directory
                .save_service(ServiceRecord {
                    id: id.clone(),
                    service_type: service_type.clone(),
                })
                .await?;
            println!("Service '{}' ({}) added.", id, service_type);
        }

        Commands::AddAccount {
            id,
            credentials_id,
            display_name,
            method,
            mechanism,
            params,
            services,
        } => {
            let directory = open_directory(&settings.directory);
            let account = AccountRecord {
                id,
                display_name,
                credentials_id: credentials_id.unwrap_or(id),
                auth: AuthRecord {
                    method,
                    mechanism,
                    parameters: params.into_iter().collect::<BTreeMap<_, _>>(),
                },
                services: services
                    .into_iter()
                    .map(|service| ServiceBinding {
                        service,
                        enabled: false,
                        auth: None,
                    })
                    .collect(),
            };
            let credentials = account.credentials_id;
            directory
                .save_account(account)
                .await
                .context("services must be added with 'polld add-service' first")?;

            println!("Account {} saved (credentials {}).", id, credentials);
            println!("Use 'polld store-secret {}' to store its secret.", credentials);
        }

        Commands::Enable { account, service } => {
            let directory = open_directory(&settings.directory);
            directory
                .set_enabled(AccountId::new(account), &ServiceId::new(service.clone()), true)
                .await
                .with_context(|| format!("cannot enable '{}' on account {}", service, account))?;
            println!("Enabled '{}' on account {}.", service, account);
        }

        Commands::Disable { account, service } => {
            let directory = open_directory(&settings.directory);
            directory
                .set_enabled(AccountId::new(account), &ServiceId::new(service.clone()), false)
                .await?;
            println!("Disabled '{}' on account {}.", service, account);
        }

        Commands::RemoveAccount {
            account,
            keep_secret,
        } => {
            let directory = open_directory(&settings.directory);
            let document = directory.document().await?;
            let credentials_id = document
                .accounts
                .iter()
                .find(|a| a.id == account)
                .map(|a| a.credentials_id);

            if !directory.delete_account(AccountId::new(account)).await? {
                println!("Account {} not found.", account);
                return Ok(());
            }
            println!("Account {} removed.", account);

            if let (Some(credentials_id), false) = (credentials_id, keep_secret) {
                let provider = KeyringSessionProvider::new();
                match provider.delete_secret(credentials_id).await {
                    Ok(()) => println!("Secret for credentials {} deleted.", credentials_id),
                    Err(e) => warn!(error = %e, "failed to delete secret"),
                }
            }
        }

        // --- Secret commands ---
        Commands::StoreSecret {
            credentials_id,
            user_name,
        } => {
            let data = match user_name {
                Some(user_name) => SessionData {
                    user_name: Some(user_name),
                    secret: Some(rpassword::prompt_password("Password: ")?),
                    ..SessionData::default()
                },
                None => {
                    let token = rpassword::prompt_password("Access token: ")?;
                    let token_secret =
                        rpassword::prompt_password("Token secret (empty for none): ")?;
                    SessionData {
                        access_token: Some(token),
                        token_secret: Some(token_secret).filter(|s| !s.is_empty()),
                        ..SessionData::default()
                    }
                }
            };

            KeyringSessionProvider::new()
                .store_secret(credentials_id, &data)
                .await?;
            println!("Secret for credentials {} saved to keyring.", credentials_id);
        }

        Commands::ClearSecret { credentials_id } => {
            KeyringSessionProvider::new()
                .delete_secret(credentials_id)
                .await?;
            println!("Secret for credentials {} cleared.", credentials_id);
        }

        Commands::TestKeyring => {
            println!("Testing keyring integration...");

            let provider = KeyringSessionProvider::new();
            let test_id = u32::MAX;
            let test_data = SessionData::default().with_access_token("test_token_12345");

            // Test store
            print!("  Storing test secret... ");
            match provider.store_secret(test_id, &test_data).await {
                Ok(()) => println!("OK"),
                Err(e) => {
                    println!("FAILED: {}", e);
                    return Ok(());
                }
            }

            // Test retrieve
            print!("  Retrieving test secret... ");
            match provider.read_secret(test_id).await {
                Ok(Some(data)) if data == test_data => println!("OK"),
                Ok(Some(_)) => println!("FAILED: wrong value"),
                Ok(None) => println!("FAILED: not found"),
                Err(e) => println!("FAILED: {}", e),
            }

            // Test delete
            print!("  Deleting test secret... ");
            match provider.delete_secret(test_id).await {
                Ok(()) => println!("OK"),
                Err(e) => println!("FAILED: {}", e),
            }

            // Verify deleted
            print!("  Verifying deletion... ");
            match provider.read_secret(test_id).await {
                Ok(None) => println!("OK"),
                Ok(Some(_)) => println!("FAILED: still exists"),
                Err(e) => println!("FAILED: {}", e),
            }

            println!("Keyring test complete.");
        }
    }

    Ok(())
}

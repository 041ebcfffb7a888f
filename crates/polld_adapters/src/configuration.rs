use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use polld_core::config::{
    Settings, SERVICENAME_GCALENDAR, SERVICENAME_GMAIL, SERVICENAME_TWITTER,
};

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "ubuntu", "account-polld")
}

pub fn get_configuration_with_paths(
    current_dir_path: Option<PathBuf>,
    system_config_dir_path: Option<PathBuf>,
) -> Result<Settings, config::ConfigError> {
    let config_directory = current_dir_path.unwrap_or_else(|| {
        std::env::current_dir()
            .map(|p| p.join("config"))
            .unwrap_or_else(|_| PathBuf::from("config"))
    });

    let system_config_dir = if let Some(path) = system_config_dir_path {
        path
    } else {
        project_dirs()
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("config"))
    };

    let settings = Config::builder()
        .set_default(
            "watcher.services",
            vec![SERVICENAME_GMAIL, SERVICENAME_GCALENDAR, SERVICENAME_TWITTER],
        )?
        .set_default("watcher.strategy", "reactive")?
        .set_default("directory.poll_interval_ms", 2000)?
        .set_default("log_level", "info")?
        .add_source(File::from(system_config_dir.join("config.toml")).required(false))
        .add_source(File::from(config_directory.join("config.toml")).required(false))
        .add_source(Environment::with_prefix("POLLD").separator("__"))
        .build()?;

    settings.try_deserialize::<Settings>()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    get_configuration_with_paths(None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polld_core::config::WatchStrategy;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::tempdir;

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with("POLLD__") {
                std::env::remove_var(&key);
            }
        }
    }

    fn nowhere() -> Option<PathBuf> {
        Some(PathBuf::from("/nonexistent"))
    }

    fn write_config(dir: &std::path::Path, content: &str) {
        let mut file = std::fs::File::create(dir.join("config.toml")).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[serial]
    #[test]
    fn test_get_configuration_defaults() {
        clear_env();
        let settings = get_configuration_with_paths(nowhere(), nowhere()).unwrap();

        assert_eq!(
            settings.watcher.services,
            vec![SERVICENAME_GMAIL, SERVICENAME_GCALENDAR, SERVICENAME_TWITTER]
        );
        assert!(settings.watcher.service_type.is_none());
        assert_eq!(settings.watcher.strategy, WatchStrategy::Reactive);
        assert!(settings.watcher.rescan_interval_secs.is_none());
        assert!(settings.directory.path.is_none());
        assert_eq!(settings.directory.poll_interval_ms, 2000);
        assert_eq!(settings.log_level, "info");
    }

    #[serial]
    #[test]
    fn test_get_configuration_file_override() {
        clear_env();
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
            log_level = "debug"

            [watcher]
            services = ["sso"]
            strategy = "poll"
            rescan_interval_secs = 300

            [directory]
            path = "/var/lib/polld/accounts.json"
            "#,
        );

        let settings =
            get_configuration_with_paths(Some(dir.path().to_path_buf()), nowhere()).unwrap();

        assert_eq!(settings.watcher.services, vec!["sso"]);
        assert_eq!(settings.watcher.strategy, WatchStrategy::Poll);
        assert_eq!(settings.watcher.rescan_interval_secs, Some(300));
        assert_eq!(
            settings.directory.path,
            Some(PathBuf::from("/var/lib/polld/accounts.json"))
        );
        assert_eq!(settings.directory.poll_interval_ms, 2000);
        assert_eq!(settings.log_level, "debug");
    }

    #[serial]
    #[test]
    fn test_get_configuration_env_override() {
        clear_env();
        std::env::set_var("POLLD__WATCHER__SERVICE_TYPE", "calendar");
        std::env::set_var("POLLD__LOG_LEVEL", "trace");

        let settings = get_configuration_with_paths(nowhere(), nowhere()).unwrap();

        assert_eq!(settings.watcher.service_type.as_deref(), Some("calendar"));
        assert_eq!(settings.log_level, "trace");

        std::env::remove_var("POLLD__WATCHER__SERVICE_TYPE");
        std::env::remove_var("POLLD__LOG_LEVEL");
    }

    #[serial]
    #[test]
    fn test_get_configuration_precedence_env_over_file() {
        clear_env();
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
            log_level = "debug"

            [watcher]
            strategy = "poll"
            "#,
        );

        std::env::set_var("POLLD__WATCHER__STRATEGY", "reactive");
        std::env::set_var("POLLD__LOG_LEVEL", "trace");

        let settings =
            get_configuration_with_paths(Some(dir.path().to_path_buf()), nowhere()).unwrap();

        assert_eq!(settings.watcher.strategy, WatchStrategy::Reactive);
        assert_eq!(settings.log_level, "trace");

        std::env::remove_var("POLLD__WATCHER__STRATEGY");
        std::env::remove_var("POLLD__LOG_LEVEL");
    }
}

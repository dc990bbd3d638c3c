//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Engagement thresholds that decide when a quiz or practice prompt is surfaced.
///
/// Values live in the `settings` table rather than in code so deployments can
/// tune them without a rebuild.
#[derive(Debug, Clone, Copy)]
pub struct TriggerPolicy {
    /// Engagement score at which the quiz trigger fires
    pub quiz_threshold: i64,
    /// Engagement score at which the practice trigger fires
    pub practice_threshold: i64,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            quiz_threshold: 40,
            practice_threshold: 25,
        }
    }
}

impl TriggerPolicy {
    /// Load the trigger policy from the settings table, falling back to
    /// defaults for missing or malformed values.
    pub async fn load(pool: &sqlx::SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        let quiz_threshold = read_setting_i64(pool, "engagement_quiz_threshold")
            .await?
            .unwrap_or(defaults.quiz_threshold);
        let practice_threshold = read_setting_i64(pool, "engagement_practice_threshold")
            .await?
            .unwrap_or(defaults.practice_threshold);

        Ok(Self {
            quiz_threshold,
            practice_threshold,
        })
    }
}

async fn read_setting_i64(pool: &sqlx::SqlitePool, key: &str) -> Result<Option<i64>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value.and_then(|v| v.parse::<i64>().ok()))
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = locate_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(root_folder));
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_root_folder())
}

/// Get default configuration file path for the platform
fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir()
        .map(|d| d.join("abtutor").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if user_config.exists() {
        return Ok(user_config);
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/abtutor/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config(format!(
        "Config file not found: {:?}",
        user_config
    )))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("abtutor"))
        .unwrap_or_else(|| PathBuf::from("./abtutor_data"))
}

/// Database file path within the root folder
pub fn database_path(root_folder: &std::path::Path) -> PathBuf {
    root_folder.join("abtutor.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_cli_arg_wins() {
        let path = resolve_root_folder(Some("/tmp/explicit"), "ABTUTOR_TEST_UNSET").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/explicit"));
    }

    #[test]
    #[serial]
    fn test_env_var_beats_default() {
        std::env::set_var("ABTUTOR_TEST_ROOT", "/tmp/from-env");
        let path = resolve_root_folder(None, "ABTUTOR_TEST_ROOT").unwrap();
        std::env::remove_var("ABTUTOR_TEST_ROOT");
        assert_eq!(path, PathBuf::from("/tmp/from-env"));
    }

    #[test]
    fn test_default_policy_values() {
        let policy = TriggerPolicy::default();
        assert!(policy.practice_threshold < policy.quiz_threshold);
    }
}

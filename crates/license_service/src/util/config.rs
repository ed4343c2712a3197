//! Operator configuration read once from the process environment.

use crate::util::errors::{Error, Result, StdError};
use crate::util::telemetry::LogFormat;
use std::path::PathBuf;

pub const OPERATOR_NAMESPACE_VAR: &str = "OPERATOR_NAMESPACE";
pub const WATCH_NAMESPACE_VAR: &str = "WATCH_NAMESPACE";
pub const RECEIVER_IMAGE_VAR: &str = "IBM_LICENSE_SERVICE_REPORTER_IMAGE";
pub const REPORTER_UI_IMAGE_VAR: &str = "IBM_LICENSE_SERVICE_REPORTER_UI_IMAGE";
pub const DATABASE_IMAGE_VAR: &str = "IBM_POSTGRESQL_IMAGE";
pub const AUTH_IMAGE_VAR: &str = "IBM_LICENSE_SERVICE_REPORTER_AUTH_IMAGE";
pub const SCANNER_IMAGE_VAR: &str = "IBM_LICENSE_SERVICE_SCANNER_OPERAND_IMAGE";
pub const VAULT_SCRIPT_PATH_VAR: &str = "VAULT_CONNECTOR_SCRIPT_PATH";

const DEFAULT_POSTGRES_USER_FILE: &str = "/tmp/POSTGRES_USER";
const DEFAULT_REPORTER_USER_FILE: &str = "/tmp/REPORTER_USER";

/// A full image reference taken from an environment variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageVar {
    pub var: &'static str,
    pub value: Option<String>,
}

impl ImageVar {
    pub fn new(var: &'static str, value: Option<String>) -> Self {
        ImageVar { var, value }
    }

    /// The reference, or an error naming the unset variable.
    pub fn require(&self) -> Result<&str> {
        match self.value.as_deref() {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(Error::StdError(StdError::ConfigError(format!(
                "{} env var must be set and not empty",
                self.var
            )))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub operator_namespace: Option<String>,
    pub watch_namespace: Option<String>,
    pub receiver_image: ImageVar,
    pub reporter_ui_image: ImageVar,
    pub database_image: ImageVar,
    pub auth_image: ImageVar,
    pub scanner_image: ImageVar,
    pub vault_script_path: Option<PathBuf>,
    pub postgres_user_file: PathBuf,
    pub reporter_user_file: PathBuf,
    pub enable_reporter: bool,
    pub enable_scanner: bool,
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        OperatorConfig::from_lookup(|_| None)
    }
}

impl OperatorConfig {
    pub fn from_env() -> Self {
        OperatorConfig::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| {
            non_empty(key)
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(true)
        };
        OperatorConfig {
            operator_namespace: non_empty(OPERATOR_NAMESPACE_VAR),
            watch_namespace: non_empty(WATCH_NAMESPACE_VAR),
            receiver_image: ImageVar::new(RECEIVER_IMAGE_VAR, lookup(RECEIVER_IMAGE_VAR)),
            reporter_ui_image: ImageVar::new(REPORTER_UI_IMAGE_VAR, lookup(REPORTER_UI_IMAGE_VAR)),
            database_image: ImageVar::new(DATABASE_IMAGE_VAR, lookup(DATABASE_IMAGE_VAR)),
            auth_image: ImageVar::new(AUTH_IMAGE_VAR, lookup(AUTH_IMAGE_VAR)),
            scanner_image: ImageVar::new(SCANNER_IMAGE_VAR, lookup(SCANNER_IMAGE_VAR)),
            vault_script_path: non_empty(VAULT_SCRIPT_PATH_VAR).map(PathBuf::from),
            postgres_user_file: non_empty("POSTGRES_USER_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_POSTGRES_USER_FILE)),
            reporter_user_file: non_empty("REPORTER_USER_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORTER_USER_FILE)),
            enable_reporter: flag("ENABLE_REPORTER_CONTROLLER"),
            enable_scanner: flag("ENABLE_SCANNER_CONTROLLER"),
            log_format: LogFormat::from_env_value(lookup("LOG_FORMAT").as_deref()),
        }
    }

    pub fn operator_namespace(&self) -> Result<&str> {
        self.operator_namespace.as_deref().ok_or_else(|| {
            Error::StdError(StdError::ConfigError(format!(
                "{OPERATOR_NAMESPACE_VAR} env var must be set and not empty"
            )))
        })
    }

    /// Namespaces listed in `WATCH_NAMESPACE`; empty means cluster scope.
    pub fn watch_namespaces(&self) -> Vec<String> {
        self.watch_namespace
            .as_deref()
            .map(|ns| {
                ns.split(',')
                    .map(str::trim)
                    .filter(|ns| !ns.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn postgres_user(&self) -> Result<String> {
        read_user_file(&self.postgres_user_file).await
    }

    pub async fn reporter_user(&self) -> Result<String> {
        read_user_file(&self.reporter_user_file).await
    }

    pub async fn vault_script(&self) -> Result<String> {
        let path = self.vault_script_path.as_ref().ok_or_else(|| {
            Error::StdError(StdError::ConfigError(format!(
                "{VAULT_SCRIPT_PATH_VAR} env var must be set and not empty"
            )))
        })?;
        tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::StdError(StdError::ConfigError(format!(
                "failed to read vault connector script {}: {e}",
                path.display()
            )))
        })
    }
}

async fn read_user_file(path: &PathBuf) -> Result<String> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::StdError(StdError::ConfigError(format!(
            "failed to read user name from {}: {e}",
            path.display()
        )))
    })?;
    Ok(content.trim_end_matches(['\n', '\r']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| env.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = OperatorConfig::default();
        assert!(config.operator_namespace().is_err());
        assert_eq!(config.postgres_user_file, PathBuf::from("/tmp/POSTGRES_USER"));
        assert!(config.enable_reporter);
        assert!(config.enable_scanner);
        assert!(config.scanner_image.require().is_err());
    }

    #[test]
    fn empty_operator_namespace_is_rejected() {
        let config = OperatorConfig::from_lookup(lookup(&[(OPERATOR_NAMESPACE_VAR, "  ")]));
        let err = config.operator_namespace().unwrap_err();
        assert!(err
            .to_string()
            .contains("OPERATOR_NAMESPACE env var must be set and not empty"));
    }

    #[test]
    fn reads_images_and_flags() {
        let config = OperatorConfig::from_lookup(lookup(&[
            (OPERATOR_NAMESPACE_VAR, "ibm-licensing"),
            (RECEIVER_IMAGE_VAR, "icr.io/cpopen/receiver:4.2.10"),
            ("ENABLE_SCANNER_CONTROLLER", "false"),
        ]));
        assert_eq!(config.operator_namespace().unwrap(), "ibm-licensing");
        assert_eq!(config.receiver_image.require().unwrap(), "icr.io/cpopen/receiver:4.2.10");
        assert!(config.enable_reporter);
        assert!(!config.enable_scanner);
    }

    #[test]
    fn watch_namespace_is_a_list() {
        let config = OperatorConfig::from_lookup(lookup(&[(WATCH_NAMESPACE_VAR, "lsr, team-a,")]));
        assert_eq!(config.watch_namespaces(), ["lsr", "team-a"]);
        assert!(OperatorConfig::default().watch_namespaces().is_empty());
    }

    #[tokio::test]
    async fn user_file_is_trimmed() {
        let path = std::env::temp_dir().join(format!("lsr-user-{}", std::process::id()));
        tokio::fs::write(&path, "reporter\n").await.unwrap();
        let config = OperatorConfig {
            reporter_user_file: path.clone(),
            ..OperatorConfig::default()
        };
        assert_eq!(config.reporter_user().await.unwrap(), "reporter");
        tokio::fs::remove_file(path).await.unwrap();
    }
}

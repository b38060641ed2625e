use std::str::FromStr;
use std::time::Duration;

use gcx_connector_entra::{DelegatedAccount, EntraCloudEnvironment};
use gcx_onboard::{DEFAULT_BATCH_SIZE, DEFAULT_WELCOME_GROUP_LIMIT};
use secrecy::SecretString;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("expected json or pretty, got '{other}'")),
        }
    }
}

/// Configuration for the onboarding sync service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Entra tenant the app registration lives in.
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub cloud: EntraCloudEnvironment,

    /// Account that reads source groups. Client credentials when absent.
    pub onboard_account: Option<DelegatedAccount>,
    /// Account that patches the assigned and welcome groups.
    pub welcome_account: Option<DelegatedAccount>,

    pub assigned_group_id: String,
    /// Welcome groups in allocation order.
    pub welcome_group_ids: Vec<String>,
    pub welcome_group_limit: u64,
    pub batch_size: usize,
    pub max_concurrent_departments: usize,

    /// SharePoint site holding the synced-department list.
    pub site_id: String,
    pub department_list_id: String,

    /// Blob container holding per-department sync documents.
    pub sync_container_url: String,
    pub sync_container_sas: Option<SecretString>,
    pub sync_file_suffix: String,

    /// Mailbox that sends failure notifications.
    pub notify_sender: Option<String>,
    /// Empty means notifications are only logged.
    pub notify_recipients: Vec<String>,

    /// Time between runs. A single run when absent.
    pub sync_interval: Option<Duration>,

    pub log_filter: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            reader(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingVar(key.into()))
        };
        let optional = |key: &str| -> Option<String> {
            reader(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let tenant_id = required("GRAPH_TENANT_ID")?;
        let client_id = required("GRAPH_CLIENT_ID")?;
        let client_secret = SecretString::from(required("GRAPH_CLIENT_SECRET")?);

        let cloud = match optional("GRAPH_CLOUD") {
            Some(raw) => raw
                .parse::<EntraCloudEnvironment>()
                .map_err(|e| ConfigError::InvalidValue("GRAPH_CLOUD".into(), e.to_string()))?,
            None => EntraCloudEnvironment::default(),
        };

        let onboard_account =
            delegated_account(&optional, "ONBOARD_USER_NAME", "ONBOARD_USER_SECRET")?;
        let welcome_account =
            delegated_account(&optional, "WELCOME_USER_NAME", "WELCOME_USER_SECRET")?;

        let assigned_group_id = required("ASSIGNED_GROUP_ID")?;
        let welcome_group_ids = split_list(&required("WELCOME_GROUP_IDS")?);
        if welcome_group_ids.is_empty() {
            return Err(ConfigError::InvalidValue(
                "WELCOME_GROUP_IDS".into(),
                "at least one group id is required".into(),
            ));
        }

        let welcome_group_limit = parse_or(
            optional("WELCOME_GROUP_MEMBER_LIMIT"),
            "WELCOME_GROUP_MEMBER_LIMIT",
            DEFAULT_WELCOME_GROUP_LIMIT,
        )?;

        let batch_size = parse_or(optional("BATCH_SIZE"), "BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if !(1..=DEFAULT_BATCH_SIZE).contains(&batch_size) {
            return Err(ConfigError::InvalidValue(
                "BATCH_SIZE".into(),
                format!("must be between 1 and {DEFAULT_BATCH_SIZE}"),
            ));
        }

        let max_concurrent_departments = parse_or(
            optional("MAX_CONCURRENT_DEPARTMENTS"),
            "MAX_CONCURRENT_DEPARTMENTS",
            1usize,
        )?;
        if max_concurrent_departments == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENT_DEPARTMENTS".into(),
                "must be at least 1".into(),
            ));
        }

        let site_id = required("SITE_ID")?;
        let department_list_id = required("DEPARTMENT_SYNC_LIST_ID")?;

        let sync_container_url = required("SYNC_CONTAINER_URL")?;
        let sync_container_sas = optional("SYNC_CONTAINER_SAS").map(SecretString::from);
        let sync_file_suffix =
            optional("SYNC_FILE_NAME_SUFFIX").unwrap_or_else(|| "_SyncConfig.json".to_string());

        let notify_recipients = optional("NOTIFY_RECIPIENTS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();
        let notify_sender = optional("NOTIFY_SENDER");
        if !notify_recipients.is_empty() && notify_sender.is_none() {
            return Err(ConfigError::MissingVar("NOTIFY_SENDER".into()));
        }

        let sync_interval = match optional("SYNC_INTERVAL_SECS") {
            Some(raw) => {
                let secs = raw.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidValue("SYNC_INTERVAL_SECS".into(), e.to_string())
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue(
                        "SYNC_INTERVAL_SECS".into(),
                        "must be greater than zero".into(),
                    ));
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        let log_filter = optional("LOG_FILTER")
            .unwrap_or_else(|| "info,gcx_onboard=debug,gcx_connector_entra=info".to_string());
        let log_format = optional("LOG_FORMAT")
            .map(|raw| raw.parse::<LogFormat>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue("LOG_FORMAT".into(), e))?
            .unwrap_or(LogFormat::Json);

        Ok(Self {
            tenant_id,
            client_id,
            client_secret,
            cloud,
            onboard_account,
            welcome_account,
            assigned_group_id,
            welcome_group_ids,
            welcome_group_limit,
            batch_size,
            max_concurrent_departments,
            site_id,
            department_list_id,
            sync_container_url,
            sync_container_sas,
            sync_file_suffix,
            notify_sender,
            notify_recipients,
            sync_interval,
            log_filter,
            log_format,
        })
    }
}

/// Both variables or neither.
fn delegated_account(
    optional: &impl Fn(&str) -> Option<String>,
    user_key: &str,
    secret_key: &str,
) -> Result<Option<DelegatedAccount>, ConfigError> {
    match (optional(user_key), optional(secret_key)) {
        (Some(username), Some(password)) => Ok(Some(DelegatedAccount {
            username,
            password: SecretString::from(password),
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::MissingVar(secret_key.into())),
        (None, Some(_)) => Err(ConfigError::MissingVar(user_key.into())),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.into(), e.to_string())),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

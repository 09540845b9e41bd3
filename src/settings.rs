//! Settings for opening a workflow store
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_payment_terms_days")]
    pub default_payment_terms_days: u32,
    #[serde(default = "default_currency")]
    pub default_currency: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("sales_workflow.db")
}

fn default_payment_terms_days() -> u32 {
    30
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            default_payment_terms_days: default_payment_terms_days(),
            default_currency: default_currency(),
            log_filter: default_log_filter(),
        }
    }
}

impl Settings {
    /// `.env`, then an optional `sales_workflow.toml`, then `SALES_WORKFLOW__*` variables.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("sales_workflow").required(false))
            .add_source(config::Environment::with_prefix("SALES_WORKFLOW").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: Settings = config::Config::builder()
            .set_override("default_currency", "USD")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.default_currency, "USD");
        assert_eq!(settings.default_payment_terms_days, 30);
        assert_eq!(settings.database_path, PathBuf::from("sales_workflow.db"));
    }
}

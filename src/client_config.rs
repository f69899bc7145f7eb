use crate::errors::{AppError, ResultExt};
use crate::exports::{ContactPolicy, ExportCategory};
use crate::models::CanonicalId;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DEFAULT_WON_STATUS: i64 = 142;
const DEFAULT_LOST_STATUS: i64 = 143;

/// One client's settings, read from `{clients_dir}/{client_id}.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// File stem the config was loaded from.
    #[serde(skip)]
    pub client_id: String,
    #[serde(default)]
    pub client_name: String,
    pub kommo: KommoSettings,
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub exports: ExportSettings,
}

impl ClientConfig {
    pub fn display_name(&self) -> &str {
        if self.client_name.trim().is_empty() {
            &self.client_id
        } else {
            &self.client_name
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KommoSettings {
    pub subdomain: String,
    pub pipeline_id: CanonicalId,
    #[serde(default = "default_won_status")]
    pub won_status_id: CanonicalId,
    #[serde(default = "default_lost_status")]
    pub lost_status_id: CanonicalId,
    pub origin_field_id: CanonicalId,
    #[serde(default, rename = "pipeline_followup_id", deserialize_with = "one_or_many")]
    pub followup_pipeline_ids: Vec<CanonicalId>,
    #[serde(default)]
    pub phone_field_id: Option<CanonicalId>,
    #[serde(default)]
    pub email_field_id: Option<CanonicalId>,
    #[serde(default = "enabled")]
    pub include_unsorted: bool,
    #[serde(default = "enabled")]
    pub reconcile_won_with_updated_at: bool,
    /// Overrides `https://{subdomain}.kommo.com/api/v4`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Filled from `{CLIENT_ID}_TOKEN`, never from the file.
    #[serde(skip)]
    pub api_token: String,
}

impl KommoSettings {
    pub fn api_base_url(&self) -> String {
        match self.base_url {
            Some(ref url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => format!("https://{}.kommo.com/api/v4", self.subdomain.trim()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    pub telegram_chat_id: CanonicalId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportSettings {
    #[serde(default)]
    pub policies: HashMap<ExportCategory, ContactPolicy>,
}

impl ExportSettings {
    pub fn policy_for(&self, category: ExportCategory) -> ContactPolicy {
        self.policies
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_policy())
    }
}

fn default_won_status() -> CanonicalId {
    CanonicalId::from(DEFAULT_WON_STATUS)
}

fn default_lost_status() -> CanonicalId {
    CanonicalId::from(DEFAULT_LOST_STATUS)
}

fn enabled() -> bool {
    true
}

/// Accepts `2`, `"2"`, `[2, 3]` or `null`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<CanonicalId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(CanonicalId),
        Many(Vec<CanonicalId>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(id)) => vec![id],
        Some(OneOrMany::Many(ids)) => ids,
        None => Vec::new(),
    })
}

/// Env var holding a client's Kommo token.
pub fn token_env_var(client_id: &str) -> String {
    format!("{}_TOKEN", client_id.to_uppercase())
}

/// Directory of per-client JSON files.
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    dir: PathBuf,
}

impl ClientRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn config_path(&self, client_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", client_id))
    }

    /// Client ids (file stems of `*.json`), sorted.
    pub fn list_client_ids(&self) -> Result<Vec<String>, AppError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            AppError::ConfigError(format!(
                "Clients config dir {} not readable: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Loads a client, taking the token from the process environment.
    pub fn load(&self, client_id: &str) -> Result<ClientConfig, AppError> {
        self.load_with(client_id, |key| std::env::var(key).ok())
    }

    /// Loads a client, resolving the token through `token_lookup`.
    pub fn load_with<F>(&self, client_id: &str, token_lookup: F) -> Result<ClientConfig, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = self.config_path(client_id);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Reading client config {}", path.display()))?;

        let mut config: ClientConfig = serde_json::from_str(&raw).map_err(|e| {
            AppError::ConfigError(format!("Invalid client config {}: {}", path.display(), e))
        })?;
        config.client_id = client_id.to_string();

        let var = token_env_var(client_id);
        config.kommo.api_token = token_lookup(&var)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::ConfigError(format!("{} environment variable required", var)))?;

        Ok(config)
    }

    /// Finds the client whose `notifications.telegram_chat_id` equals `chat_id`.
    ///
    /// Unreadable or malformed files are skipped.
    pub fn find_by_chat_id(&self, chat_id: &CanonicalId) -> Option<String> {
        let ids = match self.list_client_ids() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Failed to resolve chat {}: {}", chat_id, e);
                return None;
            }
        };

        ids.into_iter().find(|client_id| {
            let path = self.config_path(client_id);
            let configured = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                .and_then(|v| v.get("notifications")?.get("telegram_chat_id").cloned())
                .and_then(|v| serde_json::from_value::<CanonicalId>(v).ok());
            configured.as_ref() == Some(chat_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    const ACME: &str = r#"{
        "client_name": "Acme Imóveis",
        "kommo": {
            "subdomain": "acme",
            "pipeline_id": 1001,
            "won_status_id": "142",
            "origin_field_id": 555,
            "pipeline_followup_id": 2002
        },
        "notifications": {"telegram_chat_id": -100123},
        "exports": {"policies": {"won": "require_contact"}}
    }"#;

    #[test]
    fn test_load_applies_defaults_and_token() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "acme.json", ACME);
        let registry = ClientRegistry::new(dir.path());

        let config = registry
            .load_with("acme", |key| (key == "ACME_TOKEN").then(|| "secret".to_string()))
            .unwrap();

        assert_eq!(config.client_id, "acme");
        assert_eq!(config.display_name(), "Acme Imóveis");
        assert_eq!(config.kommo.api_token, "secret");
        assert_eq!(config.kommo.won_status_id, CanonicalId::from(142));
        assert_eq!(config.kommo.lost_status_id, CanonicalId::from(143));
        assert_eq!(config.kommo.followup_pipeline_ids, vec![CanonicalId::from(2002)]);
        assert!(config.kommo.include_unsorted);
        assert!(config.kommo.reconcile_won_with_updated_at);
        assert_eq!(config.kommo.api_base_url(), "https://acme.kommo.com/api/v4");
        assert_eq!(
            config.exports.policy_for(ExportCategory::Won),
            ContactPolicy::RequireContact
        );
        assert_eq!(
            config.exports.policy_for(ExportCategory::Active),
            ContactPolicy::LeadFallback
        );
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "acme.json", ACME);
        let registry = ClientRegistry::new(dir.path());

        let err = registry.load_with("acme", |_| Some("  ".to_string())).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert!(err.to_string().contains("ACME_TOKEN"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ClientRegistry::new(dir.path());
        assert!(registry.load_with("ghost", |_| Some("t".to_string())).is_err());
    }

    #[test]
    fn test_list_and_find_by_chat_id() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "zeta.json", r#"{"notifications": {"telegram_chat_id": "777"}}"#);
        write(dir.path(), "acme.json", ACME);
        write(dir.path(), "broken.json", "{not json");
        write(dir.path(), "notes.txt", "ignored");
        let registry = ClientRegistry::new(dir.path());

        assert_eq!(
            registry.list_client_ids().unwrap(),
            vec!["acme".to_string(), "broken".to_string(), "zeta".to_string()]
        );
        assert_eq!(
            registry.find_by_chat_id(&CanonicalId::from(-100123)),
            Some("acme".to_string())
        );
        assert_eq!(
            registry.find_by_chat_id(&CanonicalId::from(777)),
            Some("zeta".to_string())
        );
        assert_eq!(registry.find_by_chat_id(&CanonicalId::from(1)), None);
    }

    #[test]
    fn test_missing_dir_is_config_error() {
        let registry = ClientRegistry::new("/definitely/not/here");
        assert!(matches!(
            registry.list_client_ids(),
            Err(AppError::ConfigError(_))
        ));
        assert_eq!(registry.find_by_chat_id(&CanonicalId::from(1)), None);
    }
}

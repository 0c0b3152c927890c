use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use blink_core::{Peer, SessionConfig, UserId};
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "blink";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DEFAULT_USER_ID: &str = "me";
pub const DEFAULT_FOLLOW_THRESHOLD: f32 = 50.0;
pub const DEFAULT_BULK_ARRIVAL_THRESHOLD: usize = 10;
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_RELAY_LATENCY_MS: u64 = 150;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSettings {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Backed by a demo responder on the local relay.
    #[serde(default = "default_auto_reply")]
    pub auto_reply: bool,
}

impl ContactSettings {
    fn normalized(mut self) -> Option<Self> {
        self.id = self.id.trim().to_string();
        if self.id.is_empty() {
            return None;
        }

        self.display_name = self.display_name.trim().to_string();
        if self.display_name.is_empty() {
            self.display_name = self.id.clone();
        }
        self.avatar_url = self
            .avatar_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        Some(self)
    }

    pub fn to_peer(&self) -> Option<Peer> {
        let id = UserId::parse(&self.id).ok()?;
        let peer = Peer::new(id, &self.display_name);
        Some(match &self.avatar_url {
            Some(url) => peer.with_avatar(url),
            None => peer,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_contacts")]
    pub contacts: Vec<ContactSettings>,
    #[serde(default = "default_follow_threshold")]
    pub follow_threshold: f32,
    #[serde(default = "default_bulk_arrival_threshold")]
    pub bulk_arrival_threshold: usize,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
    #[serde(default)]
    pub show_online_only: bool,
    #[serde(default = "default_relay_latency_ms")]
    pub relay_latency_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            display_name: String::new(),
            contacts: default_contacts(),
            follow_threshold: default_follow_threshold(),
            bulk_arrival_threshold: default_bulk_arrival_threshold(),
            max_attachment_bytes: default_max_attachment_bytes(),
            show_online_only: false,
            relay_latency_ms: default_relay_latency_ms(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.user_id = if self.user_id.trim().is_empty() {
            default_user_id()
        } else {
            self.user_id.trim().to_string()
        };
        self.display_name = self.display_name.trim().to_string();

        // A contact pointing at ourselves would be a chat with no counterpart.
        let user_id = self.user_id.clone();
        self.contacts = self
            .contacts
            .into_iter()
            .filter_map(ContactSettings::normalized)
            .filter(|contact| contact.id != user_id)
            .collect();

        if !self.follow_threshold.is_finite() || self.follow_threshold <= 0.0 {
            self.follow_threshold = default_follow_threshold();
        }
        self.bulk_arrival_threshold = self.bulk_arrival_threshold.max(1);
        if self.max_attachment_bytes == 0 {
            self.max_attachment_bytes = default_max_attachment_bytes();
        }

        self
    }

    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.user_id
        } else {
            &self.display_name
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            follow_threshold: self.follow_threshold,
            bulk_arrival_threshold: self.bulk_arrival_threshold,
            max_attachment_bytes: self.max_attachment_bytes,
            ..SessionConfig::default()
        }
    }

    pub fn relay_latency(&self) -> Duration {
        Duration::from_millis(self.relay_latency_ms)
    }
}

/// Live client settings backed by one JSON file.
///
/// Edits reach the live value only after the file has been replaced, so a
/// failed save leaves both unchanged.
pub struct SettingsStore {
    current: ArcSwap<ClientSettings>,
    path: PathBuf,
}

impl SettingsStore {
    /// `<config dir>/blink/settings.json`, or `.blink/settings.json` without one.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".blink"))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn open_default() -> Self {
        Self::open(Self::default_path())
    }

    /// Reads `path` over the defaults. A missing file is not an error.
    pub fn open(path: PathBuf) -> Self {
        let settings = read_settings(&path).unwrap_or_else(|error| {
            tracing::warn!(path = ?path, error = %error, "ignoring unreadable settings file");
            ClientSettings::default()
        });
        Self {
            current: ArcSwap::from_pointee(settings),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<ClientSettings> {
        self.current.load_full()
    }

    /// Applies `edit` to a copy of the live settings, saves it, then publishes it.
    pub async fn modify(
        &self,
        edit: impl FnOnce(&mut ClientSettings),
    ) -> Result<Arc<ClientSettings>, SettingsError> {
        let mut next = ClientSettings::clone(&self.current.load());
        edit(&mut next);
        let next = Arc::new(next.normalized());

        self.save(&next).await?;
        self.current.store(next.clone());
        Ok(next)
    }

    async fn save(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
        let content = serde_json::to_vec_pretty(settings).context(EncodeSnafu {
            stage: "encode-settings",
        })?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.context(SaveSnafu {
                stage: "create-settings-directory",
                path: dir.to_path_buf(),
            })?;
        }

        // Readers only ever see the old file or the complete new one.
        let staged = self.path.with_extension("json.tmp");
        tokio::fs::write(&staged, content).await.context(SaveSnafu {
            stage: "stage-settings-file",
            path: staged.clone(),
        })?;
        tokio::fs::rename(&staged, &self.path).await.context(SaveSnafu {
            stage: "replace-settings-file",
            path: self.path.clone(),
        })?;

        tracing::info!(path = ?self.path, "settings saved");
        Ok(())
    }
}

fn read_settings(path: &Path) -> Result<ClientSettings, SettingsError> {
    Figment::from(Serialized::defaults(ClientSettings::default()))
        .merge(Json::file(path))
        .extract::<ClientSettings>()
        .map(ClientSettings::normalized)
        .context(ReadSnafu {
            stage: "read-settings-file",
            path: path.to_path_buf(),
        })
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("settings at {path:?} are invalid on `{stage}`: {source}"))]
    Read {
        stage: &'static str,
        path: PathBuf,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
    #[snafu(display("failed to encode settings on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to save settings at {path:?} on `{stage}`: {source}"))]
    Save {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_user_id() -> String {
    DEFAULT_USER_ID.to_string()
}

fn default_auto_reply() -> bool {
    true
}

fn default_contacts() -> Vec<ContactSettings> {
    [("ada", "Ada Lovelace"), ("grace", "Grace Hopper")]
        .into_iter()
        .map(|(id, display_name)| ContactSettings {
            id: id.to_string(),
            display_name: display_name.to_string(),
            avatar_url: None,
            auto_reply: true,
        })
        .collect()
}

fn default_follow_threshold() -> f32 {
    DEFAULT_FOLLOW_THRESHOLD
}

fn default_bulk_arrival_threshold() -> usize {
    DEFAULT_BULK_ARRIVAL_THRESHOLD
}

fn default_max_attachment_bytes() -> u64 {
    DEFAULT_MAX_ATTACHMENT_BYTES
}

fn default_relay_latency_ms() -> u64 {
    DEFAULT_RELAY_LATENCY_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json"));

        assert_eq!(*store.current(), ClientSettings::default());
    }

    #[test]
    fn partial_file_is_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "user_id": " sam ", "contacts": [{ "id": "kit", "display_name": "" }] }"#,
        )
        .unwrap();

        let settings = SettingsStore::open(path).current();
        assert_eq!(settings.user_id, "sam");
        assert_eq!(settings.contacts.len(), 1);
        assert_eq!(settings.contacts[0].display_name, "kit");
        assert!(settings.contacts[0].auto_reply);
        assert_eq!(settings.follow_threshold, DEFAULT_FOLLOW_THRESHOLD);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(*SettingsStore::open(path).current(), ClientSettings::default());
    }

    #[test]
    fn normalization_drops_blank_and_self_contacts_and_clamps_thresholds() {
        let settings = ClientSettings {
            user_id: "me".to_string(),
            contacts: vec![
                ContactSettings {
                    id: "  ".to_string(),
                    display_name: "Nobody".to_string(),
                    avatar_url: None,
                    auto_reply: false,
                },
                ContactSettings {
                    id: "me".to_string(),
                    display_name: "Myself".to_string(),
                    avatar_url: None,
                    auto_reply: false,
                },
                ContactSettings {
                    id: "ada".to_string(),
                    display_name: "Ada".to_string(),
                    avatar_url: Some(" ".to_string()),
                    auto_reply: false,
                },
            ],
            follow_threshold: -3.0,
            bulk_arrival_threshold: 0,
            max_attachment_bytes: 0,
            ..ClientSettings::default()
        }
        .normalized();

        assert_eq!(settings.contacts.len(), 1);
        assert_eq!(settings.contacts[0].avatar_url, None);
        assert_eq!(settings.follow_threshold, DEFAULT_FOLLOW_THRESHOLD);
        assert_eq!(settings.bulk_arrival_threshold, 1);
        assert_eq!(settings.max_attachment_bytes, DEFAULT_MAX_ATTACHMENT_BYTES);
    }

    #[tokio::test]
    async fn modify_saves_then_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::open(path.clone());

        let saved = store
            .modify(|settings| {
                settings.show_online_only = true;
                settings.relay_latency_ms = 0;
            })
            .await
            .unwrap();

        assert!(saved.show_online_only);
        assert!(store.current().show_online_only);
        assert!(!path.with_extension("json.tmp").exists());
        let reloaded = SettingsStore::open(path).current();
        assert!(reloaded.show_online_only);
        assert_eq!(reloaded.relay_latency(), Duration::ZERO);
    }

    #[tokio::test]
    async fn failed_save_leaves_the_live_settings_alone() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = SettingsStore::open(blocker.join("settings.json"));

        let error = store
            .modify(|settings| settings.show_online_only = true)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            SettingsError::Save {
                stage: "create-settings-directory",
                ..
            }
        ));
        assert!(!store.current().show_online_only);
    }

    #[tokio::test]
    async fn edits_are_normalized_before_publishing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json"));

        let saved = store
            .modify(|settings| settings.user_id = "  ".to_string())
            .await
            .unwrap();

        assert_eq!(saved.user_id, DEFAULT_USER_ID);
        assert_eq!(store.current().user_id, DEFAULT_USER_ID);
    }

    #[test]
    fn session_config_carries_the_scroll_tunables() {
        let settings = ClientSettings {
            follow_threshold: 80.0,
            bulk_arrival_threshold: 4,
            ..ClientSettings::default()
        };
        let config = settings.session_config();

        assert_eq!(config.follow_threshold, 80.0);
        assert_eq!(config.bulk_arrival_threshold, 4);
        assert_eq!(config.max_attachment_bytes, DEFAULT_MAX_ATTACHMENT_BYTES);
    }
}

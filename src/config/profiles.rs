use super::Storage;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Storage key holding every saved profile
pub const PROFILES_KEY: &str = "ftp_configs";

/// Wire protocol spoken to a server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    #[serde(alias = "plain")]
    Ftp,
    #[serde(alias = "implicit-tls")]
    Ftps,
    #[serde(alias = "ssh")]
    Sftp,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ftp => 21,
            // explicit AUTH TLS on the control port
            Protocol::Ftps => 21,
            Protocol::Sftp => 22,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ftp => write!(f, "ftp"),
            Protocol::Ftps => write!(f, "ftps"),
            Protocol::Sftp => write!(f, "sftp"),
        }
    }
}

/// Saved server connection profile
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_true")]
    pub passive: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_port() -> u16 {
    21
}

fn default_true() -> bool {
    true
}

// Hand-written so passwords never reach a log line
impl fmt::Debug for ServerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProfile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "[REDACTED]" })
            .field("protocol", &self.protocol)
            .field("passive", &self.passive)
            .field("secure", &self.secure)
            .field("is_default", &self.is_default)
            .finish()
    }
}

impl ServerProfile {
    pub fn new(name: String, host: String, username: String, protocol: Protocol) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: format!("ftp_{}", Uuid::new_v4().simple()),
            name,
            host,
            port: protocol.default_port(),
            username,
            password: String::new(),
            protocol,
            passive: true,
            secure: protocol == Protocol::Ftps,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the fields a connection attempt depends on
    pub fn validate(&self) -> AppResult<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::InvalidArgument("Profile id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidArgument("Please enter a connection name".into()));
        }
        if self.host.trim().is_empty() {
            return Err(AppError::InvalidArgument("Please enter a host address".into()));
        }
        if self.username.trim().is_empty() {
            return Err(AppError::InvalidArgument("Please enter a username".into()));
        }
        if self.port == 0 {
            return Err(AppError::InvalidArgument(
                "Port must be between 1 and 65535".into(),
            ));
        }
        Ok(())
    }

    /// Whether the control channel should be upgraded to TLS
    pub fn wants_tls(&self) -> bool {
        match self.protocol {
            Protocol::Ftps => true,
            Protocol::Ftp => self.secure,
            Protocol::Sftp => false,
        }
    }
}

/// Profile blob format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: Vec<ServerProfile>,
}

/// Profile manager
///
/// Keeps an in-memory copy of the stored profiles in insertion order. Every
/// mutation is written through to storage and only applied in memory once
/// the write succeeded.
pub struct ProfileManager {
    profiles: Vec<ServerProfile>,
    storage: Arc<dyn Storage>,
}

impl ProfileManager {
    pub fn load(storage: Arc<dyn Storage>) -> AppResult<Self> {
        let profiles = match storage.get_item(PROFILES_KEY)? {
            Some(content) => {
                let file: ProfilesFile = toml::from_str(&content)?;
                file.profiles
            }
            None => Vec::new(),
        };

        tracing::debug!("Loaded {} server profiles", profiles.len());
        Ok(Self { profiles, storage })
    }

    fn persist(&self, profiles: &[ServerProfile]) -> AppResult<()> {
        let file = ProfilesFile {
            profiles: profiles.to_vec(),
        };
        let content = toml::to_string_pretty(&file)
            .map_err(|e| AppError::Persistence(format!("Failed to encode profiles: {}", e)))?;
        self.storage.set_item(PROFILES_KEY, &content)
    }

    pub fn list(&self) -> Vec<ServerProfile> {
        self.profiles.clone()
    }

    pub fn get(&self, id: &str) -> Option<ServerProfile> {
        self.profiles.iter().find(|p| p.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.iter().any(|p| p.id == id)
    }

    /// First profile flagged as default
    pub fn default_profile(&self) -> Option<ServerProfile> {
        self.profiles.iter().find(|p| p.is_default).cloned()
    }

    /// Insert a new profile or replace the one with the same id in place.
    /// The profile is stored exactly as given.
    pub fn upsert(&mut self, profile: ServerProfile) -> AppResult<()> {
        profile.validate()?;

        let mut next = self.profiles.clone();
        match next.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => next.push(profile),
        }

        self.persist(&next)?;
        self.profiles = next;
        Ok(())
    }

    /// Remove a profile. Returns whether anything was removed.
    pub fn remove(&mut self, id: &str) -> AppResult<bool> {
        if !self.contains(id) {
            return Ok(false);
        }

        let next: Vec<_> = self.profiles.iter().filter(|p| p.id != id).cloned().collect();
        self.persist(&next)?;
        self.profiles = next;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileStorage, MemoryStorage};

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn get_item(&self, _key: &str) -> AppResult<Option<String>> {
            Ok(None)
        }

        fn set_item(&self, _key: &str, _value: &str) -> AppResult<()> {
            Err(AppError::Persistence("disk full".into()))
        }
    }

    fn profile(id: &str) -> ServerProfile {
        ServerProfile {
            id: id.to_string(),
            name: format!("Server {}", id),
            host: "ftp.example.com".to_string(),
            port: 21,
            username: "u".to_string(),
            password: "pw".to_string(),
            protocol: Protocol::Ftp,
            passive: true,
            secure: false,
            is_default: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_upsert_then_get() {
        let mut manager = ProfileManager::load(Arc::new(MemoryStorage::new())).unwrap();
        manager.upsert(profile("p1")).unwrap();

        assert_eq!(manager.get("p1"), Some(profile("p1")));
        assert!(manager.get("missing").is_none());
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut manager = ProfileManager::load(Arc::new(MemoryStorage::new())).unwrap();
        manager.upsert(profile("a")).unwrap();
        manager.upsert(profile("b")).unwrap();

        let mut changed = profile("a");
        changed.host = "sftp.example.com".into();
        manager.upsert(changed).unwrap();

        let ids: Vec<_> = manager.list().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(manager.get("a").unwrap().host, "sftp.example.com");
    }

    #[test]
    fn test_validation_rejects_bad_profiles() {
        let mut manager = ProfileManager::load(Arc::new(MemoryStorage::new())).unwrap();

        let mut no_port = profile("p");
        no_port.port = 0;
        assert!(matches!(manager.upsert(no_port), Err(AppError::InvalidArgument(_))));

        let mut no_host = profile("p");
        no_host.host = "  ".into();
        assert!(matches!(manager.upsert(no_host), Err(AppError::InvalidArgument(_))));

        let mut no_user = profile("p");
        no_user.username.clear();
        assert!(matches!(manager.upsert(no_user), Err(AppError::InvalidArgument(_))));

        assert!(manager.list().is_empty());
    }

    #[test]
    fn test_failed_write_keeps_memory_unchanged() {
        let mut manager = ProfileManager::load(Arc::new(FailingStorage)).unwrap();
        let err = manager.upsert(profile("p1")).unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        assert!(manager.get("p1").is_none());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut manager = ProfileManager::load(Arc::new(FailingStorage)).unwrap();
        assert!(!manager.remove("nope").unwrap());
    }

    #[test]
    fn test_file_roundtrip_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()));

        let mut sftp = profile("s1");
        sftp.protocol = Protocol::Sftp;
        sftp.port = 2222;
        sftp.is_default = true;

        let mut manager = ProfileManager::load(Arc::clone(&storage)).unwrap();
        manager.upsert(profile("p1")).unwrap();
        manager.upsert(sftp).unwrap();
        let saved = manager.list();

        let reloaded = ProfileManager::load(storage).unwrap();
        let mut left = saved.clone();
        let mut right = reloaded.list();
        left.sort_by(|a, b| a.id.cmp(&b.id));
        right.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(left, right);
        assert_eq!(reloaded.default_profile().unwrap().id, "s1");
    }

    #[test]
    fn test_new_profile_uses_protocol_defaults() {
        let p = ServerProfile::new("Box".into(), "h".into(), "u".into(), Protocol::Sftp);
        assert_eq!(p.port, 22);
        assert!(p.id.starts_with("ftp_"));
        assert!(!p.wants_tls());

        let p = ServerProfile::new("Box".into(), "h".into(), "u".into(), Protocol::Ftps);
        assert_eq!(p.port, 21);
        assert!(p.wants_tls());
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", profile("p1"));
        assert!(!rendered.contains("\"pw\""));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_protocol_accepts_descriptive_names() {
        let p: ServerProfile = serde_json::from_str(
            r#"{"id":"p1","name":"Ex","host":"ftp.example.com","port":21,"protocol":"plain","username":"u"}"#,
        )
        .unwrap();
        assert_eq!(p.protocol, Protocol::Ftp);
        assert!(p.passive);

        let tls: Protocol = serde_json::from_str("\"implicit-tls\"").unwrap();
        let ssh: Protocol = serde_json::from_str("\"ssh\"").unwrap();
        assert_eq!(tls, Protocol::Ftps);
        assert_eq!(ssh, Protocol::Sftp);
        assert_eq!(serde_json::to_string(&ssh).unwrap(), "\"sftp\"");
    }
}

use crate::config::{Protocol, ServerProfile};
use crate::error::{AppError, AppResult};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Connection snapshot for listing and UI state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub profile_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub protocol: Protocol,
    pub connected: bool,
    pub current_path: String,
    pub last_activity: DateTime<Utc>,
    pub connected_at: DateTime<Utc>,
}

/// Live session for one profile
///
/// Transport calls are serialized through the mutex; they block, so `run`
/// moves them onto the blocking pool.
pub struct ConnectionHandle {
    profile: ServerProfile,
    transport: Mutex<Box<dyn Transport>>,
    connected: AtomicBool,
    current_path: RwLock<String>,
    last_activity: RwLock<DateTime<Utc>>,
    connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub fn new(profile: ServerProfile, transport: Box<dyn Transport>) -> Self {
        let now = Utc::now();
        Self {
            profile,
            transport: Mutex::new(transport),
            connected: AtomicBool::new(true),
            current_path: RwLock::new("/".to_string()),
            last_activity: RwLock::new(now),
            connected_at: now,
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.profile.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn current_path(&self) -> String {
        self.current_path.read().clone()
    }

    pub fn set_current_path(&self, path: &str) {
        *self.current_path.write() = path.to_string();
        self.touch();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read()
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Utc::now();
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            profile_id: self.profile.id.clone(),
            name: self.profile.name.clone(),
            host: self.profile.host.clone(),
            port: self.profile.port,
            username: self.profile.username.clone(),
            protocol: self.profile.protocol,
            connected: self.is_connected(),
            current_path: self.current_path(),
            last_activity: self.last_activity(),
            connected_at: self.connected_at,
        }
    }

    /// Run a blocking transport call on the blocking pool
    pub async fn run<F, T>(self: &Arc<Self>, op: F) -> AppResult<T>
    where
        F: FnOnce(&mut dyn Transport) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.is_connected() {
            return Err(AppError::NotConnected(self.profile.id.clone()));
        }

        let handle = Arc::clone(self);
        let result = tokio::task::spawn_blocking(move || {
            let mut transport = handle.transport.lock();
            op(&mut **transport)
        })
        .await?;

        self.touch();
        result
    }

    /// Mark the session closed and say goodbye to the server.
    ///
    /// A transfer still holding the transport keeps it until it finishes; the
    /// socket is then dropped with the last reference.
    pub(crate) fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);

        match self.transport.try_lock() {
            Some(mut transport) => {
                if let Err(e) = transport.close() {
                    tracing::warn!(
                        "Closing session for {} failed: {}",
                        self.profile.id,
                        crate::logging::sanitize(&e.to_string())
                    );
                }
            }
            None => tracing::debug!(
                "Session for {} busy, closing when the running operation ends",
                self.profile.id
            ),
        }
    }
}

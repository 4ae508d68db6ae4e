pub mod handle;

pub use handle::*;

use crate::config::ServerProfile;
use crate::error::AppResult;
use crate::transport::Connector;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Manages live connections, at most one per profile id
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    connections: DashMap<String, Arc<ConnectionHandle>>,
    start_path: String,
}

impl ConnectionManager {
    /// New sessions report `start_path` as their current directory
    pub fn new(connector: Arc<dyn Connector>, start_path: &str) -> Self {
        Self {
            connector,
            connections: DashMap::new(),
            start_path: crate::listing::normalize_path(start_path),
        }
    }

    /// Open a session for `profile`, replacing any existing one
    pub async fn connect(&self, profile: ServerProfile) -> AppResult<ConnectionInfo> {
        let id = profile.id.clone();
        let target = format!("{}:{} ({})", profile.host, profile.port, profile.protocol);
        tracing::info!("Connecting profile {} to {}", id, target);

        let transport = self.open(profile.clone()).await?;
        let handle = Arc::new(ConnectionHandle::new(profile, transport));
        handle.set_current_path(&self.start_path);
        let info = handle.info();

        if let Some(previous) = self.connections.insert(id.clone(), handle) {
            tracing::debug!("Replacing existing connection for {}", id);
            previous.close();
        }

        tracing::info!("Connected profile {} to {}", id, target);
        Ok(info)
    }

    /// Connect and log out again without registering anything
    pub async fn probe(&self, profile: ServerProfile) -> AppResult<()> {
        let mut transport = self.open(profile).await?;
        tokio::task::spawn_blocking(move || transport.close()).await??;
        Ok(())
    }

    async fn open(&self, profile: ServerProfile) -> AppResult<Box<dyn crate::transport::Transport>> {
        let connector = Arc::clone(&self.connector);
        tokio::task::spawn_blocking(move || connector.connect(&profile)).await?
    }

    /// Get a connection by profile id
    pub fn get(&self, id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(id).map(|c| Arc::clone(&c))
    }

    /// Like `get`, for operations that need a live session
    pub fn require(&self, id: &str) -> AppResult<Arc<ConnectionHandle>> {
        self.get(id)
            .filter(|c| c.is_connected())
            .ok_or_else(|| crate::error::AppError::NotConnected(id.to_string()))
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.connections
            .get(id)
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    pub fn info(&self, id: &str) -> Option<ConnectionInfo> {
        self.connections.get(id).map(|c| c.info())
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    /// Disconnect a profile. Returns false when it was not connected.
    pub fn disconnect(&self, id: &str) -> bool {
        match self.connections.remove(id) {
            Some((_, handle)) => {
                handle.close();
                tracing::info!("Disconnected profile {}", id);
                true
            }
            None => false,
        }
    }

    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.disconnect(id)).count()
    }

    /// Drop connections with no activity for longer than `max_idle`
    pub fn prune_idle(&self, max_idle: Duration) -> Vec<String> {
        let now = Utc::now();

        let idle: Vec<String> = self
            .connections
            .iter()
            .filter(|entry| {
                (now - entry.value().last_activity())
                    .to_std()
                    .map(|idle| idle > max_idle)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for id in &idle {
            tracing::info!("Closing idle connection {}", id);
            self.disconnect(id);
        }
        idle
    }
}

use crate::config::{AppSettings, FileStorage, ProfileManager, ServerProfile, Storage};
use crate::connection::{ConnectionInfo, ConnectionManager};
use crate::error::{AppError, AppResult};
use crate::listing::{self, normalize_path};
use crate::transfer::{ProgressCallback, Transfer, TransferManager, TransferSummary};
use crate::transport::{Connector, NetworkConnector, RemoteEntry, TransportOptions};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

/// Application state: profile store, connection registry and transfer engine
pub struct AppState {
    pub settings: Arc<RwLock<AppSettings>>,
    pub profiles: Arc<RwLock<ProfileManager>>,
    pub connections: Arc<ConnectionManager>,
    pub transfers: Arc<TransferManager>,
}

impl AppState {
    /// State backed by `config_dir` and real network transports
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let settings = AppSettings::load(config_dir)?;
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(config_dir));
        let connector: Arc<dyn Connector> =
            Arc::new(NetworkConnector::new(TransportOptions::from(&settings)));

        tracing::info!("ftpdock config dir: {:?}", config_dir);
        Self::new(settings, storage, connector)
    }

    pub fn new(
        settings: AppSettings,
        storage: Arc<dyn Storage>,
        connector: Arc<dyn Connector>,
    ) -> AppResult<Self> {
        let profiles = ProfileManager::load(storage)?;
        let transfers = TransferManager::new(&settings.transfers);
        let connections = ConnectionManager::new(connector, &settings.general.default_remote_path);

        Ok(Self {
            settings: Arc::new(RwLock::new(settings)),
            profiles: Arc::new(RwLock::new(profiles)),
            connections: Arc::new(connections),
            transfers: Arc::new(transfers),
        })
    }

    // Profiles

    pub fn save_profile(&self, profile: ServerProfile) -> AppResult<()> {
        let id = profile.id.clone();
        self.profiles.write().upsert(profile)?;
        tracing::info!("Saved profile {}", id);
        Ok(())
    }

    pub fn get_all_profiles(&self) -> Vec<ServerProfile> {
        self.profiles.read().list()
    }

    pub fn get_profile(&self, id: &str) -> Option<ServerProfile> {
        self.profiles.read().get(id)
    }

    pub fn default_profile(&self) -> Option<ServerProfile> {
        self.profiles.read().default_profile()
    }

    /// Delete a profile, closing its connection first. Unknown ids are fine.
    pub fn delete_profile(&self, id: &str) -> AppResult<()> {
        if self.connections.disconnect(id) {
            tracing::info!("Closed connection of deleted profile {}", id);
        }

        if self.profiles.write().remove(id)? {
            tracing::info!("Deleted profile {}", id);
        }
        Ok(())
    }

    fn require_profile(&self, id: &str) -> AppResult<ServerProfile> {
        self.get_profile(id)
            .ok_or_else(|| AppError::ConfigNotFound(id.to_string()))
    }

    // Connections

    /// Connect a saved profile.
    ///
    /// Unknown ids are an error; a refused or failed connection is `Ok(false)`.
    pub async fn connect(&self, id: &str) -> AppResult<bool> {
        match self.open_connection(id).await {
            Ok(_) => Ok(true),
            Err(e @ AppError::ConfigNotFound(_)) => Err(e),
            Err(e) => {
                tracing::warn!(
                    "Connecting {} failed: {}",
                    id,
                    crate::logging::sanitize(&e.to_string())
                );
                Ok(false)
            }
        }
    }

    /// Connect a saved profile and report the reason when it fails
    pub async fn open_connection(&self, id: &str) -> AppResult<ConnectionInfo> {
        let profile = self.require_profile(id)?;
        self.connections.connect(profile).await
    }

    /// Try a profile, saved or not, without keeping the session
    pub async fn test_profile(&self, profile: &ServerProfile) -> AppResult<()> {
        profile.validate()?;
        self.connections.probe(profile.clone()).await
    }

    pub fn disconnect(&self, id: &str) {
        self.connections.disconnect(id);
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.connections.is_connected(id)
    }

    pub fn get_connection(&self, id: &str) -> Option<ConnectionInfo> {
        self.connections.info(id)
    }

    pub fn connected_count(&self) -> usize {
        self.connections.connected_count()
    }

    pub fn disconnect_all(&self) -> usize {
        self.connections.disconnect_all()
    }

    /// Close connections idle for longer than the configured timeout
    pub fn prune_idle_connections(&self) -> usize {
        let max_idle = self.settings.read().network.idle_timeout();
        self.connections.prune_idle(max_idle).len()
    }

    // Remote files

    pub async fn list(&self, id: &str, path: &str) -> AppResult<Vec<RemoteEntry>> {
        let conn = self.connections.require(id)?;
        listing::list_directory(&conn, path).await
    }

    pub async fn create_directory(&self, id: &str, path: &str) -> AppResult<()> {
        let conn = self.connections.require(id)?;
        let target = normalize_path(path);
        tracing::info!("mkdir {} on {}", target, id);
        conn.run(move |transport| transport.mkdir(&target)).await
    }

    pub async fn delete_remote(&self, id: &str, path: &str, is_dir: bool) -> AppResult<()> {
        let conn = self.connections.require(id)?;
        let target = normalize_path(path);
        if target == "/" {
            return Err(AppError::InvalidArgument("Cannot delete /".into()));
        }
        tracing::info!("Deleting {} on {}", target, id);
        conn.run(move |transport| {
            if is_dir {
                transport.remove_dir(&target)
            } else {
                transport.remove_file(&target)
            }
        })
        .await
    }

    pub async fn rename_remote(&self, id: &str, from: &str, to: &str) -> AppResult<()> {
        let conn = self.connections.require(id)?;
        let from = normalize_path(from);
        let to = normalize_path(to);
        if from == "/" || to == "/" {
            return Err(AppError::InvalidArgument("Cannot rename /".into()));
        }
        if to.starts_with(&format!("{}/", from)) {
            return Err(AppError::InvalidArgument(format!(
                "Cannot move {} into itself",
                from
            )));
        }
        tracing::info!("Renaming {} to {} on {}", from, to, id);
        conn.run(move |transport| transport.rename(&from, &to)).await
    }

    // Transfers

    pub async fn upload(
        &self,
        id: &str,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        on_progress: Option<ProgressCallback>,
    ) -> AppResult<String> {
        let conn = self.connections.require(id)?;
        self.transfers
            .upload(conn, local_path.as_ref(), remote_path, on_progress)
            .await
    }

    pub async fn download(
        &self,
        id: &str,
        remote_path: &str,
        local_path: impl AsRef<Path>,
        on_progress: Option<ProgressCallback>,
    ) -> AppResult<String> {
        let conn = self.connections.require(id)?;
        self.transfers
            .download(conn, remote_path, local_path.as_ref(), on_progress)
            .await
    }

    pub fn cancel_transfer(&self, transfer_id: &str) -> bool {
        self.transfers.cancel(transfer_id)
    }

    /// All tracked transfers, finished ones included, oldest first
    pub fn get_active_transfers(&self) -> Vec<Transfer> {
        self.transfers.list()
    }

    pub fn get_transfer(&self, transfer_id: &str) -> Option<Transfer> {
        self.transfers.get(transfer_id)
    }

    pub fn clear_completed_transfers(&self) -> usize {
        self.transfers.clear_finished()
    }

    pub fn transfer_summary(&self) -> TransferSummary {
        self.transfers.summary()
    }
}

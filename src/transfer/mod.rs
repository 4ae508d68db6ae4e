//! Transfer engine
//!
//! Every upload and download gets a `TransferHandle` in an insertion-ordered
//! registry. The bytes move on the blocking pool through the connection's
//! transport, wrapped in counting adapters that update the record, fire the
//! progress callback and stop the copy as soon as the transfer is cancelled.

pub mod progress;
pub mod types;

pub use progress::{ProgressCallback, TransferHandle};
pub use types::*;

use crate::config::TransferSettings;
use crate::connection::ConnectionHandle;
use crate::error::{AppError, AppResult};
use crate::listing::{file_name, normalize_path};
use crate::transport::Transport;
use chrono::Utc;
use parking_lot::RwLock;
use progress::{ProgressReader, ProgressWriter};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

enum Job {
    Upload { local: PathBuf, remote: String },
    Download { remote: String, local: PathBuf },
}

impl Job {
    fn execute(
        &self,
        transport: &mut dyn Transport,
        handle: &TransferHandle,
        on_progress: Option<&ProgressCallback>,
    ) -> AppResult<()> {
        match self {
            Job::Upload { local, remote } => {
                handle.ensure_running()?;
                let file = File::open(local)?;
                let mut reader = ProgressReader::new(file, handle, on_progress);
                transport.store(remote, &mut reader)
            }
            Job::Download { remote, local } => {
                handle.ensure_running()?;
                let total = transport.size(remote)?;
                handle.set_total(total);
                handle.ensure_running()?;

                if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let file = File::create(local)?;
                let mut writer = ProgressWriter::new(file, handle, on_progress);
                transport.retrieve(remote, &mut writer)?;
                writer.flush()?;
                Ok(())
            }
        }
    }
}

/// Tracks and drives all transfers of the process
pub struct TransferManager {
    transfers: RwLock<Vec<Arc<TransferHandle>>>,
    limiter: Option<Arc<Semaphore>>,
    sample_interval: Duration,
}

impl TransferManager {
    pub fn new(settings: &TransferSettings) -> Self {
        Self {
            transfers: RwLock::new(Vec::new()),
            limiter: settings
                .max_concurrent
                .filter(|n| *n > 0)
                .map(|n| Arc::new(Semaphore::new(n))),
            sample_interval: settings.speed_sample_interval(),
        }
    }

    /// Upload `local_path` to `remote_path`, resolving to the transfer id once
    /// the transfer completed
    pub async fn upload(
        &self,
        conn: Arc<ConnectionHandle>,
        local_path: &Path,
        remote_path: &str,
        on_progress: Option<ProgressCallback>,
    ) -> AppResult<String> {
        let metadata = std::fs::metadata(local_path)
            .map_err(|_| AppError::SourceNotFound(local_path.display().to_string()))?;
        if metadata.is_dir() {
            return Err(AppError::InvalidArgument(format!(
                "{} is a directory",
                local_path.display()
            )));
        }

        let remote = normalize_path(remote_path);
        let name = file_name(&local_path.to_string_lossy())
            .unwrap_or("unknown")
            .to_string();
        let handle = self.register(
            TransferDirection::Upload,
            conn.profile_id(),
            name,
            local_path,
            &remote,
            metadata.len(),
        );

        let job = Job::Upload {
            local: local_path.to_path_buf(),
            remote,
        };
        self.drive(handle, conn, job, on_progress).await
    }

    /// Download `remote_path` into `local_path`
    pub async fn download(
        &self,
        conn: Arc<ConnectionHandle>,
        remote_path: &str,
        local_path: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> AppResult<String> {
        let remote = normalize_path(remote_path);
        let name = file_name(&remote).unwrap_or("unknown").to_string();
        let handle = self.register(
            TransferDirection::Download,
            conn.profile_id(),
            name,
            local_path,
            &remote,
            0,
        );

        let job = Job::Download {
            remote,
            local: local_path.to_path_buf(),
        };
        self.drive(handle, conn, job, on_progress).await
    }

    fn register(
        &self,
        direction: TransferDirection,
        profile_id: &str,
        file_name: String,
        local_path: &Path,
        remote_path: &str,
        total_size: u64,
    ) -> Arc<TransferHandle> {
        let transfer = Transfer {
            id: format!("{}_{}", direction, Uuid::new_v4().simple()),
            profile_id: profile_id.to_string(),
            file_name,
            local_path: local_path.display().to_string(),
            remote_path: remote_path.to_string(),
            direction,
            status: TransferStatus::Pending,
            progress: 0.0,
            total_size,
            transferred_size: 0,
            speed: 0.0,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        };

        let handle = Arc::new(TransferHandle::new(transfer, self.sample_interval));
        self.transfers.write().push(Arc::clone(&handle));
        tracing::debug!("Registered {} transfer {}", direction, handle.id());
        handle
    }

    async fn drive(
        &self,
        handle: Arc<TransferHandle>,
        conn: Arc<ConnectionHandle>,
        job: Job,
        on_progress: Option<ProgressCallback>,
    ) -> AppResult<String> {
        let id = handle.id().to_string();

        let _permit = match &self.limiter {
            Some(limiter) => tokio::select! {
                permit = Arc::clone(limiter).acquire_owned() => {
                    Some(permit.map_err(|e| AppError::Unknown(e.to_string()))?)
                }
                _ = handle.cancelled() => {
                    tracing::info!("Transfer {} cancelled while queued", id);
                    return Err(AppError::Cancelled(id));
                }
            },
            None => None,
        };

        // Pending until the transport is ours; a cancelled job never touches it
        let worker = Arc::clone(&handle);
        let callback = on_progress.clone();
        let run = conn.run(move |transport| {
            if !worker.start() {
                return Err(AppError::Cancelled(worker.id().to_string()));
            }
            tracing::info!("Transfer {} started", worker.id());
            job.execute(transport, &worker, callback.as_ref())
        });

        // The blocking job notices the cancel at its next chunk on its own
        let result = tokio::select! {
            result = run => result,
            _ = handle.cancelled() => {
                tracing::info!("Transfer {} cancelled", id);
                return Err(AppError::Cancelled(id));
            }
        };

        match result {
            Ok(()) => {
                if !handle.complete(on_progress.as_ref()) {
                    tracing::info!("Transfer {} cancelled", id);
                    return Err(AppError::Cancelled(id));
                }
                let t = handle.snapshot();
                tracing::info!(
                    "Transfer {} completed: {} at {}",
                    id,
                    crate::format::format_size(t.transferred_size),
                    crate::format::format_speed(t.speed)
                );
                Ok(id)
            }
            Err(_) if handle.status() == TransferStatus::Cancelled => {
                tracing::info!("Transfer {} cancelled", id);
                Err(AppError::Cancelled(id))
            }
            Err(e) => {
                let message = crate::logging::sanitize(&e.to_string());
                if handle.fail(message.clone()) {
                    tracing::warn!("Transfer {} failed: {}", id, message);
                }
                Err(e)
            }
        }
    }

    /// Cancel a pending or running transfer. Unknown ids and finished
    /// transfers are left alone.
    pub fn cancel(&self, id: &str) -> bool {
        match self.find(id) {
            Some(handle) => {
                let cancelled = handle.cancel();
                if cancelled {
                    tracing::info!("Cancelling transfer {}", id);
                }
                cancelled
            }
            None => false,
        }
    }

    fn find(&self, id: &str) -> Option<Arc<TransferHandle>> {
        self.transfers
            .read()
            .iter()
            .find(|h| h.id() == id)
            .map(Arc::clone)
    }

    pub fn get(&self, id: &str) -> Option<Transfer> {
        self.find(id).map(|h| h.snapshot())
    }

    /// Every tracked transfer in creation order, finished ones included
    pub fn list(&self) -> Vec<Transfer> {
        self.transfers.read().iter().map(|h| h.snapshot()).collect()
    }

    /// Forget finished transfers. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut transfers = self.transfers.write();
        let before = transfers.len();
        transfers.retain(|h| !h.status().is_terminal());
        before - transfers.len()
    }

    pub fn summary(&self) -> TransferSummary {
        let mut summary = TransferSummary::default();
        for handle in self.transfers.read().iter() {
            match handle.status() {
                TransferStatus::Pending => summary.pending += 1,
                TransferStatus::InProgress => summary.in_progress += 1,
                TransferStatus::Completed => summary.completed += 1,
                TransferStatus::Failed => summary.failed += 1,
                TransferStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

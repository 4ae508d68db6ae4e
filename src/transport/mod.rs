//! Protocol backends behind one blocking interface.
//!
//! The connection registry, lister and transfer engine only ever talk to a
//! `Box<dyn Transport>`. Every call blocks until the server answers, so callers
//! run them on `tokio::task::spawn_blocking`.

pub mod ftp;
pub mod memory;
pub mod sftp;

pub use memory::{MemoryConnector, MemoryServer};

use crate::config::{AppSettings, Protocol, ServerProfile};
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::Duration;

/// Kind of a remote directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Remote file/directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    /// Byte size, always 0 for directories
    pub size: u64,
    pub kind: EntryKind,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(default)]
    pub is_symlink: bool,
}

impl RemoteEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// A live session with one server
pub trait Transport: Send {
    /// Entries directly inside `path`, in server order
    fn list(&mut self, path: &str) -> AppResult<Vec<RemoteEntry>>;

    /// Size in bytes of the remote file at `path`
    fn size(&mut self, path: &str) -> AppResult<u64>;

    /// Stream the remote file at `path` into `sink`
    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> AppResult<()>;

    /// Stream `source` into the remote file at `path`, replacing it
    fn store(&mut self, path: &str, source: &mut dyn Read) -> AppResult<()>;

    fn mkdir(&mut self, path: &str) -> AppResult<()>;

    fn remove_file(&mut self, path: &str) -> AppResult<()>;

    fn remove_dir(&mut self, path: &str) -> AppResult<()>;

    fn rename(&mut self, from: &str, to: &str) -> AppResult<()>;

    /// Say goodbye to the server. Best-effort; errors are only worth a log line.
    fn close(&mut self) -> AppResult<()>;
}

/// Opens transports for profiles
pub trait Connector: Send + Sync {
    fn connect(&self, profile: &ServerProfile) -> AppResult<Box<dyn Transport>>;
}

/// Timeouts and buffer size shared by the network backends
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&AppSettings::default())
    }
}

impl From<&AppSettings> for TransportOptions {
    fn from(settings: &AppSettings) -> Self {
        Self {
            connect_timeout: settings.network.connect_timeout(),
            io_timeout: settings.network.io_timeout(),
            chunk_size: settings.transfers.chunk_size.max(1024),
        }
    }
}

/// Real servers: FTP, FTPS and SFTP picked by the profile's protocol
pub struct NetworkConnector {
    options: TransportOptions,
}

impl NetworkConnector {
    pub fn new(options: TransportOptions) -> Self {
        Self { options }
    }
}

impl Connector for NetworkConnector {
    fn connect(&self, profile: &ServerProfile) -> AppResult<Box<dyn Transport>> {
        match profile.protocol {
            Protocol::Sftp => Ok(Box::new(sftp::SftpTransport::connect(profile, &self.options)?)),
            Protocol::Ftp | Protocol::Ftps => {
                Ok(Box::new(ftp::FtpTransport::connect(profile, &self.options)?))
            }
        }
    }
}

/// Copy `source` into `sink` in `chunk_size` pieces, returning the byte count
pub(crate) fn copy_chunked(
    source: &mut dyn Read,
    sink: &mut dyn Write,
    chunk_size: usize,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.write_all(&buf[..n])?;
        total += n as u64;
    }
    sink.flush()?;
    Ok(total)
}

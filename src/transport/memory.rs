//! In-process server for tests, demos and offline use.
//!
//! A `MemoryServer` is a shared remote tree. Every transport opened through a
//! `MemoryConnector` sees the same tree, so uploads are visible to later
//! listings and downloads. Knobs for credentials, per-chunk latency, failure
//! injection and reachability make the error paths reachable without a network.

use super::{Connector, EntryKind, RemoteEntry, Transport};
use crate::config::ServerProfile;
use crate::error::{AppError, AppResult};
use crate::listing::{normalize_path, parent_path};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Node {
    Dir { modified: DateTime<Utc> },
    File { data: Vec<u8>, modified: DateTime<Utc> },
}

#[derive(Debug)]
struct ServerState {
    nodes: BTreeMap<String, Node>,
    credentials: Option<(String, String)>,
    chunk_size: usize,
    chunk_delay: Duration,
    fail_after: Option<u64>,
    reachable: bool,
    sessions_opened: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir { modified: Utc::now() });
        Self {
            nodes,
            credentials: None,
            chunk_size: 8 * 1024,
            chunk_delay: Duration::ZERO,
            fail_after: None,
            reachable: true,
            sessions_opened: 0,
        }
    }
}

/// Shared in-memory remote filesystem
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A small tree resembling a typical hosting account
    pub fn with_sample_tree() -> Self {
        let server = Self::new();
        let day = |m, d| Utc.with_ymd_and_hms(2024, m, d, 0, 0, 0).single().unwrap_or_default();
        {
            let mut state = server.state.lock();
            state
                .nodes
                .insert("/documents".into(), Node::Dir { modified: day(1, 15) });
            state
                .nodes
                .insert("/images".into(), Node::Dir { modified: day(1, 10) });
            state.nodes.insert(
                "/backup.zip".into(),
                Node::File {
                    data: vec![0u8; 512 * 1024],
                    modified: day(1, 20),
                },
            );
            state.nodes.insert(
                "/readme.txt".into(),
                Node::File {
                    data: b"Welcome to the demo server.\n".repeat(64),
                    modified: day(1, 18),
                },
            );
        }
        server
    }

    /// Require this username/password pair on connect
    pub fn with_credentials(self, username: &str, password: &str) -> Self {
        self.state.lock().credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// Bytes moved per chunk and the pause after each chunk
    pub fn with_throttle(self, chunk_size: usize, chunk_delay: Duration) -> Self {
        {
            let mut state = self.state.lock();
            state.chunk_size = chunk_size.max(1);
            state.chunk_delay = chunk_delay;
        }
        self
    }

    /// Break every transfer once it has moved `bytes` bytes
    pub fn fail_transfers_after(&self, bytes: Option<u64>) {
        self.state.lock().fail_after = bytes;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    pub fn add_dir(&self, path: &str) {
        self.state
            .lock()
            .nodes
            .insert(normalize_path(path), Node::Dir { modified: Utc::now() });
    }

    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        self.state.lock().nodes.insert(
            normalize_path(path),
            Node::File {
                data: data.into(),
                modified: Utc::now(),
            },
        );
    }

    /// Contents of a remote file
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.lock().nodes.get(&normalize_path(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(&normalize_path(path))
    }

    /// Number of sessions opened so far
    pub fn sessions_opened(&self) -> usize {
        self.state.lock().sessions_opened
    }

    fn pacing(&self) -> (usize, Duration, Option<u64>) {
        let state = self.state.lock();
        (state.chunk_size, state.chunk_delay, state.fail_after)
    }

    fn require_dir(&self, path: &str) -> AppResult<()> {
        match self.state.lock().nodes.get(path) {
            Some(Node::Dir { .. }) => Ok(()),
            Some(Node::File { .. }) => {
                Err(AppError::InvalidArgument(format!("{} is not a directory", path)))
            }
            None => Err(AppError::RemoteNotFound(path.to_string())),
        }
    }
}

/// Connector handing out transports onto one `MemoryServer`
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    server: MemoryServer,
}

impl MemoryConnector {
    pub fn new(server: MemoryServer) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &MemoryServer {
        &self.server
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, profile: &ServerProfile) -> AppResult<Box<dyn Transport>> {
        let mut state = self.server.state.lock();
        if !state.reachable {
            return Err(AppError::Network(format!(
                "Connection to {}:{} refused",
                profile.host, profile.port
            )));
        }
        if let Some((user, pass)) = &state.credentials {
            if *user != profile.username || *pass != profile.password {
                return Err(AppError::Auth("530 Login incorrect".to_string()));
            }
        }
        state.sessions_opened += 1;

        Ok(Box::new(MemoryTransport {
            server: self.server.clone(),
            closed: false,
        }))
    }
}

/// One session onto a `MemoryServer`
pub struct MemoryTransport {
    server: MemoryServer,
    closed: bool,
}

impl MemoryTransport {
    fn ensure_open(&self) -> AppResult<()> {
        if self.closed {
            return Err(AppError::Network("Session already closed".to_string()));
        }
        if !self.server.state.lock().reachable {
            return Err(AppError::Network("Connection reset by peer".to_string()));
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn list(&mut self, path: &str) -> AppResult<Vec<RemoteEntry>> {
        self.ensure_open()?;
        let dir = normalize_path(path);
        self.server.require_dir(&dir)?;

        let state = self.server.state.lock();
        let entries = state
            .nodes
            .iter()
            .filter(|(p, _)| p.as_str() != "/" && parent_path(p) == dir)
            .map(|(p, node)| {
                let name = p.rsplit('/').next().unwrap_or_default().to_string();
                match node {
                    Node::Dir { modified } => RemoteEntry {
                        name,
                        path: p.clone(),
                        size: 0,
                        kind: EntryKind::Directory,
                        modified: *modified,
                        permissions: Some("drwxr-xr-x".to_string()),
                        is_symlink: false,
                    },
                    Node::File { data, modified } => RemoteEntry {
                        name,
                        path: p.clone(),
                        size: data.len() as u64,
                        kind: EntryKind::File,
                        modified: *modified,
                        permissions: Some("-rw-r--r--".to_string()),
                        is_symlink: false,
                    },
                }
            })
            .collect();

        Ok(entries)
    }

    fn size(&mut self, path: &str) -> AppResult<u64> {
        self.ensure_open()?;
        match self.server.state.lock().nodes.get(&normalize_path(path)) {
            Some(Node::File { data, .. }) => Ok(data.len() as u64),
            Some(Node::Dir { .. }) => {
                Err(AppError::InvalidArgument(format!("{} is a directory", path)))
            }
            None => Err(AppError::RemoteNotFound(path.to_string())),
        }
    }

    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> AppResult<()> {
        self.ensure_open()?;
        let data = self
            .server
            .file(path)
            .ok_or_else(|| AppError::RemoteNotFound(path.to_string()))?;
        let (chunk_size, delay, fail_after) = self.server.pacing();

        let mut sent = 0u64;
        for chunk in data.chunks(chunk_size) {
            if fail_after.is_some_and(|limit| sent >= limit) {
                return Err(AppError::Network("Data connection reset".to_string()));
            }
            sink.write_all(chunk)?;
            sent += chunk.len() as u64;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        sink.flush()?;
        Ok(())
    }

    fn store(&mut self, path: &str, source: &mut dyn Read) -> AppResult<()> {
        self.ensure_open()?;
        let target = normalize_path(path);
        self.server.require_dir(&parent_path(&target))?;
        let (chunk_size, delay, fail_after) = self.server.pacing();

        let mut data = Vec::new();
        let mut buf = vec![0u8; chunk_size];
        loop {
            if fail_after.is_some_and(|limit| data.len() as u64 >= limit) {
                return Err(AppError::Network("Data connection reset".to_string()));
            }
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }

        self.server.state.lock().nodes.insert(
            target,
            Node::File {
                data,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> AppResult<()> {
        self.ensure_open()?;
        let target = normalize_path(path);
        self.server.require_dir(&parent_path(&target))?;
        let mut state = self.server.state.lock();
        if state.nodes.contains_key(&target) {
            return Err(AppError::InvalidArgument(format!("{} already exists", target)));
        }
        state.nodes.insert(target, Node::Dir { modified: Utc::now() });
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> AppResult<()> {
        self.ensure_open()?;
        let target = normalize_path(path);
        let mut state = self.server.state.lock();
        match state.nodes.get(&target) {
            Some(Node::File { .. }) => {
                state.nodes.remove(&target);
                Ok(())
            }
            Some(Node::Dir { .. }) => {
                Err(AppError::InvalidArgument(format!("{} is a directory", target)))
            }
            None => Err(AppError::RemoteNotFound(target)),
        }
    }

    fn remove_dir(&mut self, path: &str) -> AppResult<()> {
        self.ensure_open()?;
        let target = normalize_path(path);
        if target == "/" {
            return Err(AppError::InvalidArgument("Cannot remove /".to_string()));
        }
        self.server.require_dir(&target)?;
        let mut state = self.server.state.lock();
        if state.nodes.keys().any(|p| p != "/" && parent_path(p) == target) {
            return Err(AppError::InvalidArgument(format!("{} is not empty", target)));
        }
        state.nodes.remove(&target);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> AppResult<()> {
        self.ensure_open()?;
        let from = normalize_path(from);
        let to = normalize_path(to);
        let prefix = format!("{}/", from.trim_end_matches('/'));
        if from == "/" || to.starts_with(&prefix) {
            return Err(AppError::InvalidArgument(format!(
                "Cannot move {} to {}",
                from, to
            )));
        }
        self.server.require_dir(&parent_path(&to))?;

        let mut state = self.server.state.lock();
        if !state.nodes.contains_key(&from) {
            return Err(AppError::RemoteNotFound(from));
        }
        let moved: Vec<String> = state
            .nodes
            .keys()
            .filter(|p| **p == from || p.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = state.nodes.remove(&old) {
                let new_path = format!("{}{}", to, &old[from.len()..]);
                state.nodes.insert(new_path, node);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;

    fn profile(user: &str, pass: &str) -> ServerProfile {
        let mut p = ServerProfile::new("mem".into(), "localhost".into(), user.into(), Protocol::Ftp);
        p.password = pass.into();
        p
    }

    #[test]
    fn test_credentials_are_checked() {
        let connector = MemoryConnector::new(MemoryServer::new().with_credentials("u", "pw"));
        assert!(matches!(
            connector.connect(&profile("u", "wrong")),
            Err(AppError::Auth(_))
        ));
        assert!(connector.connect(&profile("u", "pw")).is_ok());
        assert_eq!(connector.server().sessions_opened(), 1);
    }

    #[test]
    fn test_unreachable_server() {
        let server = MemoryServer::new();
        server.set_reachable(false);
        let connector = MemoryConnector::new(server);
        assert!(matches!(
            connector.connect(&profile("u", "")),
            Err(AppError::Network(_))
        ));
    }

    #[test]
    fn test_store_list_retrieve() {
        let connector = MemoryConnector::new(MemoryServer::new().with_throttle(3, Duration::ZERO));
        let mut t = connector.connect(&profile("u", "")).unwrap();

        t.mkdir("/docs").unwrap();
        t.store("/docs/a.txt", &mut &b"hello world"[..]).unwrap();

        let listing = t.list("/docs").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "a.txt");
        assert_eq!(listing[0].size, 11);
        assert_eq!(t.size("/docs/a.txt").unwrap(), 11);

        let mut out = Vec::new();
        t.retrieve("/docs/a.txt", &mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_missing_paths() {
        let connector = MemoryConnector::default();
        let mut t = connector.connect(&profile("u", "")).unwrap();
        assert!(matches!(t.list("/nope"), Err(AppError::RemoteNotFound(_))));
        assert!(matches!(t.size("/nope.bin"), Err(AppError::RemoteNotFound(_))));
        assert!(matches!(
            t.store("/nope/a.txt", &mut &b"x"[..]),
            Err(AppError::RemoteNotFound(_))
        ));
    }

    #[test]
    fn test_rename_moves_subtree() {
        let server = MemoryServer::with_sample_tree();
        server.add_file("/documents/cv.pdf", b"%PDF".to_vec());
        let connector = MemoryConnector::new(server.clone());
        let mut t = connector.connect(&profile("u", "")).unwrap();

        t.rename("/documents", "/docs").unwrap();
        assert!(server.exists("/docs/cv.pdf"));
        assert!(!server.exists("/documents"));
        assert!(matches!(t.remove_dir("/docs"), Err(AppError::InvalidArgument(_))));
        t.remove_file("/docs/cv.pdf").unwrap();
        t.remove_dir("/docs").unwrap();
    }

    #[test]
    fn test_rename_refuses_root_and_descendant_targets() {
        let server = MemoryServer::with_sample_tree();
        let connector = MemoryConnector::new(server.clone());
        let mut t = connector.connect(&profile("u", "")).unwrap();

        assert!(matches!(t.rename("/", "/x"), Err(AppError::InvalidArgument(_))));
        assert!(matches!(
            t.rename("/documents", "/documents/deeper"),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(server.exists("/documents"));
        assert!(server.exists("/readme.txt"));
    }

    #[test]
    fn test_injected_failure() {
        let server = MemoryServer::new().with_throttle(4, Duration::ZERO);
        server.add_file("/big.bin", vec![1u8; 64]);
        server.fail_transfers_after(Some(16));
        let connector = MemoryConnector::new(server);
        let mut t = connector.connect(&profile("u", "")).unwrap();

        let mut out = Vec::new();
        assert!(matches!(t.retrieve("/big.bin", &mut out), Err(AppError::Network(_))));
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn test_closed_session_rejects_calls() {
        let connector = MemoryConnector::default();
        let mut t = connector.connect(&profile("u", "")).unwrap();
        t.close().unwrap();
        assert!(matches!(t.list("/"), Err(AppError::Network(_))));
    }
}

//! SFTP backend
//!
//! One SSH session per connected profile. Password auth when the profile has
//! a password, otherwise the local ssh-agent.

use super::{copy_chunked, EntryKind, RemoteEntry, Transport, TransportOptions};
use crate::config::ServerProfile;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use ssh2::{FileStat, Session as Ssh2Session, Sftp};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

/// An active SFTP connection
pub struct SftpTransport {
    sftp: Sftp,
    session: Ssh2Session,
    chunk_size: usize,
}

impl SftpTransport {
    /// Connect, authenticate and open the SFTP subsystem
    pub fn connect(profile: &ServerProfile, options: &TransportOptions) -> AppResult<Self> {
        let addr = (profile.host.as_str(), profile.port)
            .to_socket_addrs()
            .map_err(|e| AppError::Network(format!("Cannot resolve {}: {}", profile.host, e)))?
            .next()
            .ok_or_else(|| AppError::Network(format!("No address for {}", profile.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, options.connect_timeout)
            .map_err(|e| AppError::Network(format!("TCP connect failed: {}", e)))?;
        tcp.set_read_timeout(Some(options.io_timeout))?;
        tcp.set_write_timeout(Some(options.io_timeout))?;

        let mut session = Ssh2Session::new()
            .map_err(|e| AppError::Network(format!("Failed to create session: {}", e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(options.io_timeout.as_millis().min(u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|e| AppError::Network(format!("SSH handshake failed: {}", e)))?;

        if profile.password.is_empty() {
            session
                .userauth_agent(&profile.username)
                .map_err(|e| AppError::Auth(format!("Agent auth failed: {}", e)))?;
        } else {
            session
                .userauth_password(&profile.username, &profile.password)
                .map_err(|e| AppError::Auth(format!("Password auth failed: {}", e)))?;
        }

        if !session.authenticated() {
            return Err(AppError::Auth("Authentication failed".to_string()));
        }

        let sftp = session
            .sftp()
            .map_err(|e| AppError::Network(format!("Failed to open SFTP: {}", e)))?;

        tracing::debug!("SFTP session open to {}:{}", profile.host, profile.port);
        Ok(Self {
            sftp,
            session,
            chunk_size: options.chunk_size,
        })
    }

    fn entry_from_stat(name: String, path: String, stat: &FileStat) -> RemoteEntry {
        let kind = if stat.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        RemoteEntry {
            name,
            path,
            size: if stat.is_dir() { 0 } else { stat.size.unwrap_or(0) },
            kind,
            modified: stat
                .mtime
                .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0))
                .unwrap_or_default(),
            permissions: Some(format_permissions(stat)),
            is_symlink: stat.file_type().is_symlink(),
        }
    }
}

impl Transport for SftpTransport {
    fn list(&mut self, path: &str) -> AppResult<Vec<RemoteEntry>> {
        let entries = self.sftp.readdir(Path::new(path))?;

        let mut result = Vec::with_capacity(entries.len());
        for (file_path, stat) in entries {
            let name = file_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if name.is_empty() || name == "." || name == ".." {
                continue;
            }

            let full = crate::listing::join_path(path, &name);
            result.push(Self::entry_from_stat(name, full, &stat));
        }

        Ok(result)
    }

    fn size(&mut self, path: &str) -> AppResult<u64> {
        let stat = self.sftp.stat(Path::new(path))?;
        if stat.is_dir() {
            return Err(AppError::InvalidArgument(format!("{} is a directory", path)));
        }
        Ok(stat.size.unwrap_or(0))
    }

    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> AppResult<()> {
        let mut file = self.sftp.open(Path::new(path))?;
        copy_chunked(&mut file, sink, self.chunk_size)?;
        Ok(())
    }

    fn store(&mut self, path: &str, source: &mut dyn Read) -> AppResult<()> {
        let mut file = self.sftp.create(Path::new(path))?;
        copy_chunked(source, &mut file, self.chunk_size)?;
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> AppResult<()> {
        self.sftp.mkdir(Path::new(path), 0o755)?;
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> AppResult<()> {
        self.sftp.unlink(Path::new(path))?;
        Ok(())
    }

    fn remove_dir(&mut self, path: &str) -> AppResult<()> {
        self.sftp.rmdir(Path::new(path))?;
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> AppResult<()> {
        self.sftp.rename(Path::new(from), Path::new(to), None)?;
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.session.disconnect(None, "closing", None)?;
        Ok(())
    }
}

/// Format file permissions as a string like "drwxr-xr-x"
fn format_permissions(stat: &FileStat) -> String {
    let perms = stat.perm.unwrap_or(0);

    let mut s = String::with_capacity(10);

    if stat.is_dir() {
        s.push('d');
    } else if stat.file_type().is_symlink() {
        s.push('l');
    } else {
        s.push('-');
    }

    for shift in [6u32, 3, 0] {
        let bits = (perms >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(perm: u32, size: u64) -> FileStat {
        FileStat {
            size: Some(size),
            uid: None,
            gid: None,
            perm: Some(perm),
            atime: None,
            mtime: Some(1_705_276_800),
        }
    }

    #[test]
    fn test_format_permissions() {
        assert_eq!(format_permissions(&stat(0o100644, 10)), "-rw-r--r--");
        assert_eq!(format_permissions(&stat(0o040755, 0)), "drwxr-xr-x");
        assert_eq!(format_permissions(&stat(0o120777, 0)), "lrwxrwxrwx");
    }

    #[test]
    fn test_directory_entries_report_zero_size() {
        let entry = SftpTransport::entry_from_stat(
            "docs".into(),
            "/docs".into(),
            &stat(0o040755, 4096),
        );
        assert!(entry.is_dir());
        assert_eq!(entry.size, 0);
        assert_eq!(entry.modified.timestamp(), 1_705_276_800);
    }
}

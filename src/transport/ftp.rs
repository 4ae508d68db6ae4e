//! FTP / FTPS backend
//!
//! Binary mode, passive data connections. TLS (AUTH TLS on the control
//! connection) is only available when built with the `ftps` feature.

use super::{copy_chunked, EntryKind, RemoteEntry, Transport, TransportOptions};
use crate::config::ServerProfile;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use ftp::types::FileType;
use ftp::FtpStream;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cell::RefCell;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

/// `drwxr-xr-x   2 owner group   4096 Jan 15 10:00 name`
static UNIX_LIST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([\-dlbcps])([rwxsStT\-]{9})\S*\s+\d+\s+\S+\s+\S+\s+(\d+)\s+([A-Za-z]{3})\s+(\d{1,2})\s+(\d{1,2}:\d{2}|\d{4})\s+(.+)$",
    )
    .unwrap()
});

/// `01-15-24  10:00AM       <DIR>          name`
static DOS_LIST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2})-(\d{2})-(\d{2,4})\s+(\d{1,2}):(\d{2})(AM|PM)\s+(<DIR>|\d+)\s+(.+)$")
        .unwrap()
});

static REPLY_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:response:\s*|^)(\d{3})\b").unwrap());

/// Extract the server reply code from an `ftp` crate error message
pub fn reply_code(message: &str) -> Option<u32> {
    REPLY_CODE
        .captures(message.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

const IMPLICIT_TLS_PORT: u16 = 990;

/// An active FTP control connection
pub struct FtpTransport {
    stream: FtpStream,
    chunk_size: usize,
}

impl FtpTransport {
    pub fn connect(profile: &ServerProfile, options: &TransportOptions) -> AppResult<Self> {
        if profile.wants_tls() && profile.port == IMPLICIT_TLS_PORT {
            return Err(AppError::InvalidArgument(format!(
                "Implicit TLS (port {}) is not supported, use explicit FTPS on port 21",
                IMPLICIT_TLS_PORT
            )));
        }

        let addr = (profile.host.as_str(), profile.port)
            .to_socket_addrs()
            .map_err(|e| AppError::Network(format!("Cannot resolve {}: {}", profile.host, e)))?
            .next()
            .ok_or_else(|| AppError::Network(format!("No address for {}", profile.host)))?;

        // The ftp crate connects and reads the greeting without any timeout
        await_greeting(&addr, options)?;

        let stream = FtpStream::connect(addr)?;
        stream.get_ref().set_read_timeout(Some(options.io_timeout))?;
        stream.get_ref().set_write_timeout(Some(options.io_timeout))?;

        let mut stream = if profile.wants_tls() {
            upgrade_tls(stream, &profile.host)?
        } else {
            stream
        };

        if !profile.passive {
            tracing::warn!(
                "Active mode requested for {}, data connections stay passive",
                profile.host
            );
        }

        stream.login(&profile.username, &profile.password)?;
        stream.transfer_type(FileType::Binary)?;

        tracing::debug!("FTP session open to {}:{}", profile.host, profile.port);
        Ok(Self {
            stream,
            chunk_size: options.chunk_size,
        })
    }
}

/// Connect with `connect_timeout` and wait up to `io_timeout` for the server
/// greeting, then hang up. Servers that accept but never talk (implicit TLS
/// listeners among them) fail here instead of blocking forever.
fn await_greeting(addr: &SocketAddr, options: &TransportOptions) -> AppResult<()> {
    let probe = TcpStream::connect_timeout(addr, options.connect_timeout)
        .map_err(|e| AppError::Network(format!("TCP connect failed: {}", e)))?;
    probe.set_read_timeout(Some(options.io_timeout))?;

    let mut greeting = String::new();
    let read = BufReader::new(&probe).read_line(&mut greeting);
    match read {
        Ok(n) if n > 0 => {
            let _ = (&probe).write_all(b"QUIT\r\n");
            Ok(())
        }
        Ok(_) => Err(AppError::Network(format!(
            "{} closed the connection before greeting",
            addr
        ))),
        Err(e) => Err(AppError::Network(format!(
            "No greeting from {} within {}s: {}",
            addr,
            options.io_timeout.as_secs(),
            e
        ))),
    }
}

#[cfg(feature = "ftps")]
fn upgrade_tls(stream: FtpStream, domain: &str) -> AppResult<FtpStream> {
    use openssl::ssl::{SslContext, SslMethod};

    tracing::debug!("Securing control connection to {} with AUTH TLS", domain);
    let context = SslContext::builder(SslMethod::tls())
        .map_err(|e| AppError::Network(format!("TLS setup failed: {}", e)))?
        .build();
    Ok(stream.into_secure(context)?)
}

#[cfg(not(feature = "ftps"))]
fn upgrade_tls(_stream: FtpStream, _domain: &str) -> AppResult<FtpStream> {
    Err(AppError::Network(
        "FTPS is not available in this build (enable the `ftps` feature)".to_string(),
    ))
}

impl Transport for FtpTransport {
    fn list(&mut self, path: &str) -> AppResult<Vec<RemoteEntry>> {
        let lines = self.stream.list(Some(path))?;
        let now = Utc::now();

        let entries = lines
            .iter()
            .filter_map(|line| {
                let parsed = parse_list_line(line, path, now);
                if parsed.is_none() && !line.starts_with("total ") {
                    tracing::debug!("Skipping unparsed LIST line: {}", line);
                }
                parsed
            })
            .filter(|e| e.name != "." && e.name != "..")
            .collect();

        Ok(entries)
    }

    fn size(&mut self, path: &str) -> AppResult<u64> {
        match self.stream.size(path)? {
            Some(size) => Ok(size as u64),
            None => Err(AppError::RemoteNotFound(path.to_string())),
        }
    }

    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> AppResult<()> {
        // retr takes an Fn, so the sink is reached through a RefCell
        let sink = RefCell::new(sink);
        let chunk_size = self.chunk_size;
        self.stream.retr(path, |reader| {
            let mut sink = sink.borrow_mut();
            copy_chunked(reader, &mut **sink, chunk_size).map_err(ftp::FtpError::ConnectionError)
        })?;
        Ok(())
    }

    fn store(&mut self, path: &str, source: &mut dyn Read) -> AppResult<()> {
        let mut source = source;
        self.stream.put(path, &mut source)?;
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> AppResult<()> {
        self.stream.mkdir(path)?;
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> AppResult<()> {
        self.stream.rm(path)?;
        Ok(())
    }

    fn remove_dir(&mut self, path: &str) -> AppResult<()> {
        self.stream.rmdir(path)?;
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> AppResult<()> {
        self.stream.rename(from, to)?;
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.stream.quit()?;
        Ok(())
    }
}

/// Parse one line of `LIST` output (Unix `ls -l` or DOS/IIS style).
///
/// `now` anchors Unix entries that omit the year: they belong to the most
/// recent year that does not put them in the future.
pub fn parse_list_line(line: &str, dir: &str, now: DateTime<Utc>) -> Option<RemoteEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(caps) = UNIX_LIST_LINE.captures(line) {
        let type_char = caps.get(1)?.as_str();
        let kind = if type_char == "d" {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let is_symlink = type_char == "l";
        let mut name = caps.get(7)?.as_str().to_string();
        if is_symlink {
            if let Some(idx) = name.find(" -> ") {
                name.truncate(idx);
            }
        }
        let size: u64 = caps.get(3)?.as_str().parse().ok()?;
        let modified = unix_list_time(
            caps.get(4)?.as_str(),
            caps.get(5)?.as_str(),
            caps.get(6)?.as_str(),
            now,
        )?;

        return Some(RemoteEntry {
            path: crate::listing::join_path(dir, &name),
            name,
            size: if kind == EntryKind::Directory { 0 } else { size },
            kind,
            modified,
            permissions: Some(format!("{}{}", type_char, caps.get(2)?.as_str())),
            is_symlink,
        });
    }

    if let Some(caps) = DOS_LIST_LINE.captures(line) {
        let month: u32 = caps.get(1)?.as_str().parse().ok()?;
        let day: u32 = caps.get(2)?.as_str().parse().ok()?;
        let mut year: i32 = caps.get(3)?.as_str().parse().ok()?;
        if year < 100 {
            year += if year < 70 { 2000 } else { 1900 };
        }
        let mut hour: u32 = caps.get(4)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(5)?.as_str().parse().ok()?;
        match (caps.get(6)?.as_str(), hour) {
            ("AM", 12) => hour = 0,
            ("PM", h) if h < 12 => hour += 12,
            _ => {}
        }
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let size_field = caps.get(7)?.as_str();
        let kind = if size_field == "<DIR>" {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let name = caps.get(8)?.as_str().to_string();

        return Some(RemoteEntry {
            path: crate::listing::join_path(dir, &name),
            name,
            size: size_field.parse().unwrap_or(0),
            kind,
            modified: Utc.from_utc_datetime(&NaiveDateTime::new(date, time)),
            permissions: None,
            is_symlink: false,
        });
    }

    None
}

fn unix_list_time(month: &str, day: &str, time_or_year: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let month = MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(month))? as u32
        + 1;
    let day: u32 = day.parse().ok()?;

    let (year, time) = match time_or_year.split_once(':') {
        Some((h, m)) => {
            let time = NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)?;
            let this_year = NaiveDate::from_ymd_opt(now.year(), month, day)
                .map(|d| Utc.from_utc_datetime(&NaiveDateTime::new(d, time)));
            // Servers drop the year for the last six months; a date ahead of
            // now therefore belongs to last year
            match this_year {
                Some(dt) if dt <= now + chrono::Duration::days(1) => (now.year(), time),
                _ => (now.year() - 1, time),
            }
        }
        None => (time_or_year.parse().ok()?, NaiveTime::from_hms_opt(0, 0, 0)?),
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)))
}

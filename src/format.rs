//! Human-readable sizes, speeds and file-type icons for listings and progress.

use crate::transport::RemoteEntry;
use serde::{Deserialize, Serialize};

const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Format a byte count in base-1024 units, at most two decimals.
///
/// `format_size(0) == "0 Bytes"`, `format_size(1536) == "1.5 KB"`.
pub fn format_size(bytes: u64) -> String {
    format_scaled(bytes as f64)
}

/// Format a transfer rate. Negative and non-finite rates read as zero.
pub fn format_speed(bytes_per_sec: f64) -> String {
    let rate = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
        bytes_per_sec
    } else {
        0.0
    };
    format!("{}/s", format_scaled(rate))
}

fn format_scaled(bytes: f64) -> String {
    if bytes < 1.0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rendered = format!("{:.2}", value);
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

/// Icon category of a file, derived from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Folder,
    Document,
    Image,
    Video,
    Audio,
    Archive,
    Text,
    Unknown,
}

impl FileCategory {
    /// Icon identifier used by the file browser
    pub fn icon_name(self) -> &'static str {
        match self {
            FileCategory::Folder => "folder",
            FileCategory::Document => "document-text",
            FileCategory::Image => "image",
            FileCategory::Video => "videocam",
            FileCategory::Audio => "musical-notes",
            FileCategory::Archive => "archive",
            FileCategory::Text => "document",
            FileCategory::Unknown => "document-outline",
        }
    }
}

/// Category for a file name; case-insensitive on the extension
pub fn icon_for(file_name: &str) -> FileCategory {
    let ext = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return FileCategory::Unknown,
    };

    match ext.as_str() {
        "pdf" => FileCategory::Document,
        "jpg" | "jpeg" | "png" | "gif" => FileCategory::Image,
        "mp4" | "avi" | "mov" => FileCategory::Video,
        "mp3" | "wav" | "aac" => FileCategory::Audio,
        "zip" | "rar" | "7z" => FileCategory::Archive,
        "txt" | "doc" | "docx" => FileCategory::Text,
        _ => FileCategory::Unknown,
    }
}

pub fn icon_for_entry(entry: &RemoteEntry) -> FileCategory {
    if entry.is_dir() {
        FileCategory::Folder
    } else {
        icon_for(&entry.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(500), "500 Bytes");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1_048_576), "1 MB");
        assert_eq!(format_size(5 * 1024 * 1024 + 256 * 1024), "5.25 MB");
        assert_eq!(format_size(1024u64.pow(4) * 2048), "2048 TB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1536.0), "1.5 KB/s");
        assert_eq!(format_speed(0.0), "0 Bytes/s");
        assert_eq!(format_speed(-20.0), "0 Bytes/s");
        assert_eq!(format_speed(f64::NAN), "0 Bytes/s");
    }

    #[test]
    fn test_icon_for() {
        assert_eq!(icon_for("report.PDF"), FileCategory::Document);
        assert_eq!(icon_for("photo.jpeg"), FileCategory::Image);
        assert_eq!(icon_for("clip.mov"), FileCategory::Video);
        assert_eq!(icon_for("song.mp3"), FileCategory::Audio);
        assert_eq!(icon_for("backup.7z"), FileCategory::Archive);
        assert_eq!(icon_for("notes.txt"), FileCategory::Text);
        assert_eq!(icon_for("binary.exe"), FileCategory::Unknown);
        assert_eq!(icon_for("Makefile"), FileCategory::Unknown);
        assert_eq!(icon_for(".zip"), FileCategory::Unknown);
        assert_eq!(icon_for("a.txt").icon_name(), "document");
    }
}

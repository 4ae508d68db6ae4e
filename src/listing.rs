//! Remote directory listing and remote path helpers.
//!
//! Listings are returned directories first, then files, each group ordered by
//! case-insensitive name. The order only depends on the entries themselves, so
//! it is stable for a fixed server state whatever order the server sent.

use crate::connection::ConnectionHandle;
use crate::error::AppResult;
use crate::transport::RemoteEntry;
use std::cmp::Ordering;
use std::sync::Arc;

/// Normalize a remote path: absolute, no empty, `.` or `..` segments and no
/// trailing slash. The empty string means the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Parent directory of a remote path; the root is its own parent
pub fn parent_path(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Append a child name to a remote directory path
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = normalize_path(dir);
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Last segment of a path, local or remote
pub fn file_name(path: &str) -> Option<&str> {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
}

/// Sort: directories first, then by name
pub fn sort_entries(entries: &mut [RemoteEntry]) {
    entries.sort_by(|a, b| match (a.is_dir(), b.is_dir()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
    });
}

/// List `path` on a live connection and make it the connection's current path
pub async fn list_directory(
    conn: &Arc<ConnectionHandle>,
    path: &str,
) -> AppResult<Vec<RemoteEntry>> {
    let dir = normalize_path(path);
    let target = dir.clone();

    let mut entries = conn.run(move |transport| transport.list(&target)).await?;
    sort_entries(&mut entries);
    conn.set_current_path(&dir);

    tracing::debug!(
        "Listed {} entries in {} (profile {})",
        entries.len(),
        dir,
        conn.profile_id()
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EntryKind;

    fn entry(name: &str, kind: EntryKind) -> RemoteEntry {
        RemoteEntry {
            name: name.to_string(),
            path: join_path("/", name),
            size: 0,
            kind,
            modified: Default::default(),
            permissions: None,
            is_symlink: false,
        }
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("docs"), "/docs");
        assert_eq!(normalize_path("/docs//2024/"), "/docs/2024");
        assert_eq!(normalize_path("/docs/./a/../b"), "/docs/b");
        assert_eq!(normalize_path("/../.."), "/");
    }

    #[test]
    fn test_parent_and_join() {
        assert_eq!(parent_path("/"), "/");
        assert_eq!(parent_path("/docs"), "/");
        assert_eq!(parent_path("/docs/a.txt"), "/docs");
        assert_eq!(join_path("/", "a.txt"), "/a.txt");
        assert_eq!(join_path("/docs/", "a.txt"), "/docs/a.txt");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/local/a.txt"), Some("a.txt"));
        assert_eq!(file_name("C:\\Users\\me\\b.zip"), Some("b.zip"));
        assert_eq!(file_name("/docs/"), Some("docs"));
        assert_eq!(file_name("/"), None);
    }

    #[test]
    fn test_sort_directories_first() {
        let mut entries = vec![
            entry("readme.txt", EntryKind::File),
            entry("images", EntryKind::Directory),
            entry("Backup.zip", EntryKind::File),
            entry("documents", EntryKind::Directory),
        ];
        sort_entries(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["documents", "images", "Backup.zip", "readme.txt"]);
    }
}

//! Path helpers shared by the filesystem and shell tools.

use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` and anchor relative paths at `base_dir`.
pub fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = if raw == "~" {
        home_dir()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        home_dir().join(rest)
    } else {
        PathBuf::from(raw)
    };

    match base_dir {
        Some(base) if expanded.is_relative() => base.join(expanded),
        _ => expanded,
    }
}

/// Lexically normalize `.` and `..` components without touching the disk.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether `path` stays inside `root` once normalized.
pub fn is_within(path: &Path, root: &Path) -> bool {
    normalize(path).starts_with(normalize(root))
}

/// Whether the first 8 KiB look like binary data.
pub fn looks_binary(bytes: &[u8]) -> bool {
    const MAGIC: [&[u8]; 6] = [b"\x89PNG", b"\xFF\xD8\xFF", b"%PDF", b"PK\x03\x04", b"\x7fELF", b"MZ"];
    let sample = &bytes[..bytes.len().min(8192)];
    sample.contains(&0) || MAGIC.iter().any(|m| sample.starts_with(m))
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

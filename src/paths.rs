//! XDG directory helpers for runtime/config locations.

use std::path::PathBuf;

/// Base directory for ephemeral runtime state (endpoint sockets).
///
/// Uses `TETHER_RUNTIME_DIR` if set, otherwise `$XDG_RUNTIME_DIR/tether`,
/// otherwise `~/.tether`, otherwise a per-uid tmp dir.
pub(crate) fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TETHER_RUNTIME_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir).join("tether");
    }

    match dirs::home_dir() {
        Some(home) => home.join(".tether"),
        None => per_user_tmp_dir(),
    }
}

/// Base directory for configuration files.
///
/// Uses `TETHER_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/tether` or
/// `~/.config/tether`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TETHER_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("tether")
}

pub(crate) fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

fn per_user_tmp_dir() -> PathBuf {
    let uid = unsafe { libc::geteuid() };
    PathBuf::from("/tmp").join(format!("tether-{uid}"))
}

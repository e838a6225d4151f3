use std::path::{Path, PathBuf};

pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// `~/.config/tune` on unix, the platform config directory elsewhere.
pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    let base = dirs::home_dir().map(|home| home.join(".config"));
    #[cfg(not(unix))]
    let base = dirs::config_dir();
    base.unwrap_or_else(|| PathBuf::from(".")).join("tune")
}

/// Log files and other runtime output.
pub fn data_dir() -> PathBuf {
    #[cfg(unix)]
    let base = dirs::home_dir().map(|home| home.join(".local").join("share"));
    #[cfg(not(unix))]
    let base = dirs::data_local_dir();
    base.unwrap_or_else(std::env::temp_dir).join("tune")
}

pub fn mpv_binary_name() -> &'static str {
    if cfg!(windows) {
        "mpv.exe"
    } else {
        "mpv"
    }
}

fn find_beside_exe(name: &str) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    [dir.join(name), dir.join("external").join(name)]
        .into_iter()
        .find(|p| p.is_file())
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Resolve the player binary to launch.
///
/// Anything with a path component is taken as-is.  A bare name is looked up
/// beside the current executable first, then on `PATH`.  When nothing is
/// found the bare name is returned and left for the OS to resolve at spawn
/// time, which surfaces a normal spawn error if it is really missing.
pub fn resolve_player_binary(name: &str) -> PathBuf {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.to_path_buf();
    }
    find_beside_exe(name)
        .or_else(|| find_on_path(name))
        .unwrap_or_else(|| candidate.to_path_buf())
}

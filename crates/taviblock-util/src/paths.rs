//! Default paths for taviblockd components
//!
//! taviblockd is a system daemon running as root, so the defaults live under
//! the usual privileged locations. Each can be overridden by an environment
//! variable (picked up by the daemon's argument parser) so tests and
//! development runs never touch the real system files.

use std::path::PathBuf;

/// Environment variable for overriding the control socket path
pub const TAVIBLOCK_SOCKET_ENV: &str = "TAVIBLOCK_SOCKET";

/// Environment variable for overriding the data directory
pub const TAVIBLOCK_DATA_DIR_ENV: &str = "TAVIBLOCK_DATA_DIR";

/// Environment variable for overriding the hosts file path
pub const TAVIBLOCK_HOSTS_ENV: &str = "TAVIBLOCK_HOSTS";

/// Default control socket path
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(TAVIBLOCK_SOCKET_ENV) {
        return PathBuf::from(path);
    }
    PathBuf::from("/run/taviblock/taviblockd.sock")
}

/// Default data directory (holds the state database)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(TAVIBLOCK_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }
    PathBuf::from("/var/lib/taviblock")
}

/// Default configuration file path
pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/taviblock/config.toml")
}

/// Default hosts file path
pub fn default_hosts_path() -> PathBuf {
    if let Ok(path) = std::env::var(TAVIBLOCK_HOSTS_ENV) {
        return PathBuf::from(path);
    }
    PathBuf::from("/etc/hosts")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_absolute() {
        assert!(default_config_path().is_absolute());
        assert!(default_data_dir().is_absolute());
        assert!(default_socket_path().is_absolute());
        assert!(default_hosts_path().is_absolute());
    }
}

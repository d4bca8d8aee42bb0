use crate::constants::env as env_keys;
use crate::constants::git::{DEFAULT_BINARY, TIMEOUT_LOCAL_MS, TIMEOUT_NETWORK_MS};
use crate::constants::host_keys::CONFIRM_WAIT_MS;
use crate::utils::feature_flags::is_host_key_auto_accept_enabled;
use crate::utils::paths::{
    resolve_base_dir, resolve_credentials_path, resolve_known_hosts_path, resolve_runtime_dir,
};
use std::path::PathBuf;

fn read_positive_ms(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

pub fn resolve_git_binary() -> String {
    std::env::var(env_keys::GIT_BIN)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_BINARY.to_string())
}

pub fn resolve_local_timeout_ms() -> u64 {
    read_positive_ms(env_keys::GIT_TIMEOUT_MS, TIMEOUT_LOCAL_MS)
}

pub fn resolve_network_timeout_ms() -> u64 {
    read_positive_ms(env_keys::NETWORK_TIMEOUT_MS, TIMEOUT_NETWORK_MS)
}

pub fn resolve_askpass_helper() -> Option<PathBuf> {
    std::env::var(env_keys::ASKPASS_HELPER)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

pub fn resolve_host_key_wait_ms() -> u64 {
    read_positive_ms(env_keys::HOST_KEY_WAIT_MS, CONFIRM_WAIT_MS)
}

/// Runtime settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub base_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub known_hosts_path: PathBuf,
    pub runtime_dir: PathBuf,
    pub git_binary: String,
    pub local_timeout_ms: u64,
    pub network_timeout_ms: u64,
    pub host_key_wait_ms: u64,
    pub auto_accept_host_keys: bool,
    /// Askpass program; the running executable when unset.
    pub askpass_helper: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            base_dir: resolve_base_dir(),
            credentials_path: resolve_credentials_path(),
            known_hosts_path: resolve_known_hosts_path(),
            runtime_dir: resolve_runtime_dir(),
            git_binary: resolve_git_binary(),
            local_timeout_ms: resolve_local_timeout_ms(),
            network_timeout_ms: resolve_network_timeout_ms(),
            host_key_wait_ms: resolve_host_key_wait_ms(),
            auto_accept_host_keys: is_host_key_auto_accept_enabled(),
            askpass_helper: resolve_askpass_helper(),
        }
    }
}

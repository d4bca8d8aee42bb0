use crate::constants::env as env_keys;
use std::env;
use std::path::PathBuf;

fn normalize_env_path(value: Option<String>) -> Option<PathBuf> {
    let raw = value?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if lowered == "undefined" || lowered == "null" {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn resolve_xdg_state_dir() -> Option<PathBuf> {
    if let Some(path) = normalize_env_path(env::var("XDG_STATE_HOME").ok()) {
        return Some(path);
    }
    env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local").join("state"))
}

pub fn resolve_base_dir() -> PathBuf {
    if let Some(path) = normalize_env_path(env::var(env_keys::HOME).ok()) {
        return path;
    }
    if let Some(path) = resolve_xdg_state_dir() {
        return path.join("gitkeeper");
    }
    env::temp_dir().join("gitkeeper")
}

pub fn resolve_encryption_key_path() -> PathBuf {
    resolve_base_dir().join(".gitkeeper.key")
}

pub fn resolve_credentials_path() -> PathBuf {
    if let Some(path) = normalize_env_path(env::var(env_keys::CREDENTIALS_PATH).ok()) {
        return path;
    }
    resolve_base_dir().join("credentials.json")
}

pub fn resolve_known_hosts_path() -> PathBuf {
    if let Some(path) = normalize_env_path(env::var(env_keys::KNOWN_HOSTS_PATH).ok()) {
        return path;
    }
    resolve_base_dir().join("known_hosts")
}

/// Directory for ephemeral key files and askpass sockets.
pub fn resolve_runtime_dir() -> PathBuf {
    env::temp_dir()
}

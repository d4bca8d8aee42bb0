use crate::constants::env as env_keys;

pub fn is_truthy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn is_truthy_any_env(keys: &[&str]) -> bool {
    keys.iter()
        .any(|key| std::env::var(key).ok().map(is_truthy).unwrap_or(false))
}

pub fn is_host_key_auto_accept_enabled() -> bool {
    is_truthy_any_env(&[env_keys::AUTO_ACCEPT_HOST_KEYS])
}

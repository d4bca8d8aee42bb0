pub mod git {
    pub const DEFAULT_BINARY: &str = "git";
    pub const TIMEOUT_LOCAL_MS: u64 = 30_000;
    pub const TIMEOUT_NETWORK_MS: u64 = 300_000;
    pub const DEFAULT_REMOTE: &str = "origin";
    pub const DEFAULT_LOG_LIMIT: usize = 50;
    pub const MAX_LOG_LIMIT: usize = 1_000;
    pub const LOG_FIELD_SEPARATOR: char = '\x1f';
    pub const LOG_RECORD_SEPARATOR: char = '\x1e';
}

pub mod diff {
    pub const MAX_PATCH_BYTES: usize = 500 * 1024;
    pub const TRUNCATION_MARKER: &str = "\n... [diff truncated]\n";
    pub const BINARY_MARKERS: [&str; 2] = ["Binary files", "GIT binary patch"];
}

pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TIMEOUT_KEYSCAN_MS: u64 = 15_000;
    pub const KEYSCAN_CONNECT_TIMEOUT_SECS: u64 = 10;
}

pub mod host_keys {
    pub const CONFIRM_WAIT_MS: u64 = 120_000;
}

pub mod buffers {
    pub const CRYPTO_KEY_SIZE: usize = 32;
    pub const CRYPTO_IV_SIZE: usize = 12;
    pub const CRYPTO_TAG_SIZE: usize = 16;
    pub const MAX_LOG_STRING: usize = 4 * 1024;
    pub const MAX_ASKPASS_LINE: usize = 64 * 1024;
}

pub mod env {
    pub const ASKPASS_SOCKET: &str = "GITKEEPER_ASKPASS_SOCKET";
    pub const SSH_PASSPHRASE: &str = "GITKEEPER_SSH_PASSPHRASE";
    pub const HOME: &str = "GITKEEPER_HOME";
    pub const ENCRYPTION_KEY: &str = "GITKEEPER_ENCRYPTION_KEY";
    pub const CREDENTIALS_PATH: &str = "GITKEEPER_CREDENTIALS_PATH";
    pub const KNOWN_HOSTS_PATH: &str = "GITKEEPER_KNOWN_HOSTS_PATH";
    pub const GIT_BIN: &str = "GITKEEPER_GIT_BIN";
    pub const GIT_TIMEOUT_MS: &str = "GITKEEPER_GIT_TIMEOUT_MS";
    pub const NETWORK_TIMEOUT_MS: &str = "GITKEEPER_NETWORK_TIMEOUT_MS";
    pub const HOST_KEY_WAIT_MS: &str = "GITKEEPER_HOST_KEY_WAIT_MS";
    pub const AUTO_ACCEPT_HOST_KEYS: &str = "GITKEEPER_AUTO_ACCEPT_HOST_KEYS";
    pub const LOG_LEVEL: &str = "GITKEEPER_LOG_LEVEL";
    pub const ASKPASS_HELPER: &str = "GITKEEPER_ASKPASS_HELPER";
}

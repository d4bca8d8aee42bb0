pub mod askpass;
pub mod credential_store;
pub mod credentials;
pub mod host_keys;
pub mod logger;
pub mod operator;
pub mod process;
pub mod repository_store;
pub mod security;
pub mod ssh_keys;

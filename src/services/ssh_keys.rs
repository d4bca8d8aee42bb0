//! Ephemeral private key material for one git operation.

use crate::constants::env as env_keys;
use crate::errors::ToolError;
use crate::services::credential_store::{CredentialKind, StoredCredential};
use crate::services::logger::Logger;
use crate::services::security::Security;
use crate::utils::fs_atomic::{create_private_file, random_token, remove_file_if_exists};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(40)
        .collect();
    if cleaned.is_empty() {
        "key".to_string()
    } else {
        cleaned
    }
}

/// Owns at most one decrypted key file plus its passphrase. One instance per
/// in-flight operation; never shared. Dropping the session deletes the file.
pub struct SshKeySession {
    logger: Logger,
    dir: PathBuf,
    key_path: Option<PathBuf>,
    passphrase: Option<Zeroizing<String>>,
    port: Option<u16>,
}

impl SshKeySession {
    pub fn new(logger: &Logger, dir: impl Into<PathBuf>) -> Self {
        Self {
            logger: logger.child("ssh-key"),
            dir: dir.into(),
            key_path: None,
            passphrase: None,
            port: None,
        }
    }

    /// Decrypts the credential's key into a fresh `0600` file named
    /// `gitkeeper-key-<label>-<random>`. Provisioning twice replaces the
    /// previous material.
    pub fn provision(
        &mut self,
        credential: &StoredCredential,
        security: &Security,
        port: Option<u16>,
    ) -> Result<&Path, ToolError> {
        if credential.kind != CredentialKind::SshKey {
            return Err(ToolError::invalid_params(format!(
                "Credential '{}' is not an ssh key",
                credential.name
            )));
        }
        let encrypted = credential.private_key.as_deref().ok_or_else(|| {
            ToolError::invalid_params(format!(
                "Credential '{}' has no private key",
                credential.name
            ))
        })?;
        self.cleanup();

        let mut material = security.decrypt(encrypted)?;
        if !material.ends_with('\n') {
            material.push('\n');
        }
        let passphrase = match credential.passphrase.as_deref() {
            Some(blob) => Some(security.decrypt(blob)?).filter(|p| !p.is_empty()),
            None => None,
        };

        std::fs::create_dir_all(&self.dir)
            .map_err(|err| ToolError::internal(format!("Failed to prepare key dir: {}", err)))?;
        let path = self.dir.join(format!(
            "gitkeeper-key-{}-{}",
            sanitize_label(&credential.name),
            random_token(16)
        ));
        create_private_file(&path, material.as_bytes(), 0o600).map_err(|err| {
            ToolError::internal(format!("Failed to write ephemeral key file: {}", err))
        })?;
        self.logger.debug(
            "provisioned key",
            Some(&serde_json::json!({
                "credential": credential.name,
                "has_passphrase": passphrase.is_some(),
            })),
        );
        self.passphrase = passphrase;
        self.port = port;
        self.key_path = Some(path);
        self.key_path
            .as_deref()
            .ok_or_else(|| ToolError::internal("Key path missing after provisioning"))
    }

    pub fn key_path(&self) -> Option<&Path> {
        self.key_path.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn has_passphrase(&self) -> bool {
        self.passphrase.is_some()
    }

    /// `GIT_SSH_COMMAND` value. Host keys are checked strictly against
    /// `known_hosts_path` only, and `host_key_algorithms` (when given) keeps
    /// ssh from negotiating a key type the trust store does not hold. Batch
    /// mode is requested for non-interactive operations unless a passphrase
    /// still has to be fed through askpass.
    pub fn build_command(
        &self,
        known_hosts_path: &Path,
        host_key_algorithms: Option<&str>,
        interactive: bool,
    ) -> String {
        let mut parts = vec!["ssh".to_string()];
        if let Some(key) = self.key_path.as_ref() {
            parts.push("-i".to_string());
            parts.push(shell_quote(&key.to_string_lossy()));
            parts.push("-o IdentitiesOnly=yes".to_string());
        }
        parts.push(format!(
            "-o UserKnownHostsFile={}",
            shell_quote(&known_hosts_path.to_string_lossy())
        ));
        parts.push("-o StrictHostKeyChecking=yes".to_string());
        if let Some(algorithms) = host_key_algorithms.filter(|a| !a.is_empty()) {
            parts.push(format!("-o HostKeyAlgorithms={}", shell_quote(algorithms)));
        }
        if !interactive && self.passphrase.is_none() {
            parts.push("-o BatchMode=yes".to_string());
        }
        parts.join(" ")
    }

    /// Variables that let the askpass helper answer ssh's passphrase prompt.
    pub fn passphrase_env(&self, askpass_program: &Path) -> Vec<(String, String)> {
        let Some(passphrase) = self.passphrase.as_ref() else {
            return Vec::new();
        };
        vec![
            (
                "SSH_ASKPASS".to_string(),
                askpass_program.to_string_lossy().to_string(),
            ),
            ("SSH_ASKPASS_REQUIRE".to_string(), "force".to_string()),
            (
                env_keys::SSH_PASSPHRASE.to_string(),
                passphrase.as_str().to_string(),
            ),
        ]
    }

    /// Deletes the key file and forgets passphrase and port. Safe to call any
    /// number of times.
    pub fn cleanup(&mut self) {
        if let Some(path) = self.key_path.take() {
            if let Err(err) = remove_file_if_exists(&path) {
                self.logger.warn(
                    "failed to remove ephemeral key",
                    Some(&serde_json::json!({ "path": path, "error": err.to_string() })),
                );
            }
        }
        self.passphrase = None;
        self.port = None;
    }
}

impl Drop for SshKeySession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

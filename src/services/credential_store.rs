use crate::errors::ToolError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Token,
    SshKey,
}

/// One entry of the settings collaborator's credential list. Secret fields
/// hold encrypted payloads and are decrypted only for the operation that
/// needs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub name: String,
    pub host_pattern: String,
    pub kind: CredentialKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl StoredCredential {
    /// Exact host or `*.suffix` wildcard, case-insensitive. The wildcard does
    /// not match the bare suffix itself.
    pub fn matches_host(&self, host: &str) -> bool {
        let pattern = self.host_pattern.trim().to_lowercase();
        let host = host.trim().to_lowercase();
        if pattern.is_empty() || host.is_empty() {
            return false;
        }
        match pattern.strip_prefix("*.") {
            Some(suffix) => host
                .strip_suffix(suffix)
                .is_some_and(|rest| rest.len() > 1 && rest.ends_with('.')),
            None => pattern == host,
        }
    }

    fn validate(&self) -> Result<(), ToolError> {
        if self.name.trim().is_empty() {
            return Err(ToolError::invalid_params(
                "Credential name must be a non-empty string",
            ));
        }
        if self.host_pattern.trim().is_empty() {
            return Err(ToolError::invalid_params(format!(
                "Credential '{}' is missing host_pattern",
                self.name
            )));
        }
        let has_secret = match self.kind {
            CredentialKind::Token => self.token.is_some(),
            CredentialKind::SshKey => self.private_key.is_some(),
        };
        if !has_secret {
            return Err(ToolError::invalid_params(format!(
                "Credential '{}' has no secret for kind {:?}",
                self.name, self.kind
            ))
            .with_hint("token credentials need `token`; ssh_key credentials need `private_key`."));
        }
        Ok(())
    }
}

/// Read side of the credential collaborator. The file is a JSON array.
#[derive(Clone, Default)]
pub struct CredentialStore {
    file_path: Option<PathBuf>,
    credentials: Arc<RwLock<Vec<StoredCredential>>>,
}

impl CredentialStore {
    pub fn load(path: &Path) -> Result<Self, ToolError> {
        let store = Self {
            file_path: Some(path.to_path_buf()),
            credentials: Arc::new(RwLock::new(Vec::new())),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn from_credentials(credentials: Vec<StoredCredential>) -> Result<Self, ToolError> {
        for credential in &credentials {
            credential.validate()?;
        }
        Ok(Self {
            file_path: None,
            credentials: Arc::new(RwLock::new(credentials)),
        })
    }

    /// Re-reads the backing file. A missing file is an empty list.
    pub fn reload(&self) -> Result<(), ToolError> {
        let Some(path) = self.file_path.as_ref() else {
            return Ok(());
        };
        let loaded = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|err| {
                ToolError::internal(format!("Failed to load credentials: {}", err))
            })?;
            let parsed: Vec<StoredCredential> = serde_json::from_str(&raw).map_err(|err| {
                ToolError::invalid_params(format!("Failed to parse credentials: {}", err))
                    .with_hint("Credentials file must be a JSON array of credential objects.")
            })?;
            for credential in &parsed {
                credential.validate()?;
            }
            parsed
        } else {
            Vec::new()
        };
        let mut guard = self
            .credentials
            .write()
            .map_err(|_| ToolError::internal("Credential store lock poisoned"))?;
        *guard = loaded;
        Ok(())
    }

    pub fn list(&self) -> Vec<StoredCredential> {
        self.credentials
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// First credential of `kind` whose pattern matches `host`, in file order.
    pub fn find(&self, host: &str, kind: CredentialKind) -> Option<StoredCredential> {
        self.list()
            .into_iter()
            .find(|credential| credential.kind == kind && credential.matches_host(host))
    }
}

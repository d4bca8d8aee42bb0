//! Trust-on-first-use gate in front of every ssh remote.
//!
//! The first operation that meets an unknown host becomes the leader: it scans
//! the host key, asks the operator (or auto-accepts) and persists the answer.
//! Concurrent operations against the same host find the pending entry and
//! wait on the leader's decision instead of prompting again.

use crate::constants::host_keys::CONFIRM_WAIT_MS;
use crate::constants::network::{KEYSCAN_CONNECT_TIMEOUT_SECS, TIMEOUT_KEYSCAN_MS};
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::services::operator::{HostKeyDecision, HostKeyPrompt, OperatorChannel};
use crate::services::process::{ExecOptions, ProcessExecutor};
use crate::utils::cancel::{wait_cancelled, CancelToken};
use crate::utils::fs_atomic::append_private_file;
use crate::utils::git_url::RemoteUrl;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

const KEY_TYPE_PREFERENCE: [&str; 3] = ["ssh-ed25519", "ecdsa-sha2-nistp256", "ssh-rsa"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostTrust {
    Unknown,
    Pending,
    Accepted,
}

enum Entry {
    Accepted,
    Pending(watch::Receiver<Option<HostKeyDecision>>),
}

enum Role {
    Leader(watch::Sender<Option<HostKeyDecision>>),
    Waiter(watch::Receiver<Option<HostKeyDecision>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScannedKey {
    key_type: String,
    key: String,
}

pub fn fingerprint_sha256(key_blob: &str) -> String {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(key_blob.as_bytes())
        .unwrap_or_else(|_| key_blob.as_bytes().to_vec());
    let hash = Sha256::digest(&bytes);
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    format!("SHA256:{}", encoded)
}

fn parse_keyscan(output: &str) -> Vec<ScannedKey> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let _host = tokens.next()?;
            let key_type = tokens.next()?;
            let key = tokens.next()?;
            Some(ScannedKey {
                key_type: key_type.to_string(),
                key: key.to_string(),
            })
        })
        .collect()
}

fn preferred_key(keys: &[ScannedKey]) -> Option<&ScannedKey> {
    KEY_TYPE_PREFERENCE
        .iter()
        .find_map(|wanted| keys.iter().find(|k| k.key_type == *wanted))
        .or_else(|| keys.first())
}

fn known_hosts_lists(content: &str, name: &str) -> bool {
    content.lines().map(str::trim).any(|line| {
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            return false;
        }
        line.split_whitespace()
            .next()
            .is_some_and(|hosts| hosts.split(',').any(|h| h.eq_ignore_ascii_case(name)))
    })
}

/// Key types recorded for `name`, in file order.
fn known_hosts_key_types(content: &str, name: &str) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let listed = tokens
            .next()
            .is_some_and(|hosts| hosts.split(',').any(|h| h.eq_ignore_ascii_case(name)));
        if let (true, Some(key_type)) = (listed, tokens.next()) {
            if !types.iter().any(|t| t == key_type) {
                types.push(key_type.to_string());
            }
        }
    }
    types
}

/// `HostKeyAlgorithms` names that verify a key of `key_type`.
fn signature_algorithms(key_type: &str) -> Vec<String> {
    match key_type {
        "ssh-rsa" => vec!["rsa-sha2-512".to_string(), "rsa-sha2-256".to_string()],
        other => vec![other.to_string()],
    }
}

fn rejected_error(name: &str) -> ToolError {
    ToolError::denied(format!(
        "Host key verification failed: host key for {} was not accepted",
        name
    ))
    .with_hint("Confirm the host key fingerprint through the operator channel and retry.")
}

#[derive(Clone)]
pub struct HostKeyGate {
    logger: Logger,
    executor: ProcessExecutor,
    operator: Arc<dyn OperatorChannel>,
    known_hosts_path: PathBuf,
    wait: Duration,
    auto_accept: bool,
    keyscan_command: Vec<String>,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl HostKeyGate {
    pub fn new(
        logger: &Logger,
        executor: ProcessExecutor,
        operator: Arc<dyn OperatorChannel>,
        known_hosts_path: PathBuf,
    ) -> Self {
        Self {
            logger: logger.child("host-keys"),
            executor,
            operator,
            known_hosts_path,
            wait: Duration::from_millis(CONFIRM_WAIT_MS),
            auto_accept: false,
            keyscan_command: vec!["ssh-keyscan".to_string()],
            entries: Arc::new(Mutex::new(HashMap::new())),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_auto_accept(mut self, auto_accept: bool) -> Self {
        self.auto_accept = auto_accept;
        self
    }

    /// Program plus leading arguments used in place of `ssh-keyscan`.
    pub fn with_keyscan_command(mut self, command: Vec<String>) -> Self {
        if !command.is_empty() {
            self.keyscan_command = command;
        }
        self
    }

    pub fn known_hosts_path(&self) -> &Path {
        &self.known_hosts_path
    }

    /// `HostKeyAlgorithms` value restricting ssh to the key types the trust
    /// store holds for this remote's host. `None` when nothing is recorded.
    pub fn pinned_algorithms(&self, url: &RemoteUrl) -> Option<String> {
        let name = url.known_hosts_name()?;
        let content = std::fs::read_to_string(&self.known_hosts_path).ok()?;
        let algorithms: Vec<String> = known_hosts_key_types(&content, &name)
            .iter()
            .flat_map(|key_type| signature_algorithms(key_type))
            .collect();
        (!algorithms.is_empty()).then(|| algorithms.join(","))
    }

    pub fn trust(&self, url: &RemoteUrl) -> HostTrust {
        let Some(name) = url.known_hosts_name() else {
            return HostTrust::Unknown;
        };
        let Ok(entries) = self.entries.lock() else {
            return HostTrust::Unknown;
        };
        match entries.get(&name) {
            Some(Entry::Accepted) => HostTrust::Accepted,
            Some(Entry::Pending(_)) => HostTrust::Pending,
            None => HostTrust::Unknown,
        }
    }

    /// Blocks until the remote's host is trusted. Returns an error when the
    /// operator rejects it, the confirmation window expires, or `cancel`
    /// fires. Non-ssh remotes pass straight through.
    pub async fn verify_before_operation(
        &self,
        url: &RemoteUrl,
        cancel: Option<&CancelToken>,
    ) -> Result<(), ToolError> {
        self.ensure_trusted(url, self.auto_accept, cancel).await
    }

    /// Trusts whatever key the host presents without asking the operator.
    pub async fn auto_accept(
        &self,
        url: &RemoteUrl,
        cancel: Option<&CancelToken>,
    ) -> Result<(), ToolError> {
        self.ensure_trusted(url, true, cancel).await
    }

    async fn ensure_trusted(
        &self,
        url: &RemoteUrl,
        force_accept: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<(), ToolError> {
        if !url.transport.is_ssh() {
            return Ok(());
        }
        let name = url
            .known_hosts_name()
            .ok_or_else(|| ToolError::invalid_params("ssh remote URL has no host"))?;

        loop {
            let already_known = self.known_hosts_file_lists(&name);
            let role = {
                let mut entries = self
                    .entries
                    .lock()
                    .map_err(|_| ToolError::internal("Host key state lock poisoned"))?;
                match entries.get(&name) {
                    Some(Entry::Accepted) => return Ok(()),
                    // A closed channel means the leader went away without deciding.
                    Some(Entry::Pending(rx)) if rx.has_changed().is_ok() => Role::Waiter(rx.clone()),
                    _ if already_known => {
                        entries.insert(name.clone(), Entry::Accepted);
                        return Ok(());
                    }
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        entries.insert(name.clone(), Entry::Pending(rx));
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Leader(tx) => return self.lead(url, &name, tx, force_accept, cancel).await,
                Role::Waiter(rx) => {
                    self.logger.debug(
                        "waiting on pending host key confirmation",
                        Some(&serde_json::json!({ "host": name })),
                    );
                    match Self::wait_for_decision(rx, cancel).await? {
                        Some(HostKeyDecision::Accept) => return Ok(()),
                        Some(HostKeyDecision::Reject) => return Err(rejected_error(&name)),
                        None => continue,
                    }
                }
            }
        }
    }

    async fn lead(
        &self,
        url: &RemoteUrl,
        name: &str,
        tx: watch::Sender<Option<HostKeyDecision>>,
        force_accept: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<(), ToolError> {
        let outcome = self.resolve_decision(url, name, force_accept, cancel).await;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ToolError::internal("Host key state lock poisoned"))?;
        match outcome {
            Ok(HostKeyDecision::Accept) => {
                entries.insert(name.to_string(), Entry::Accepted);
                let _ = tx.send(Some(HostKeyDecision::Accept));
                Ok(())
            }
            Ok(HostKeyDecision::Reject) => {
                entries.remove(name);
                let _ = tx.send(Some(HostKeyDecision::Reject));
                self.logger
                    .warn("host key rejected", Some(&serde_json::json!({ "host": name })));
                Err(rejected_error(name))
            }
            Err(err) => {
                // Dropping the sender without a value lets waiters retry.
                entries.remove(name);
                Err(err)
            }
        }
    }

    async fn resolve_decision(
        &self,
        url: &RemoteUrl,
        name: &str,
        force_accept: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<HostKeyDecision, ToolError> {
        let keys = self.scan(url, name, cancel).await?;
        let preferred = preferred_key(&keys).ok_or_else(|| {
            ToolError::denied(format!(
                "Host key verification failed: no host key could be retrieved for {}",
                name
            ))
        })?;
        let fingerprint = fingerprint_sha256(&preferred.key);

        let decision = if force_accept {
            self.logger.info(
                "auto-accepting host key",
                Some(&serde_json::json!({ "host": name, "fingerprint": fingerprint })),
            );
            HostKeyDecision::Accept
        } else {
            let prompt = HostKeyPrompt {
                host: url.host.clone().unwrap_or_else(|| name.to_string()),
                port: url.non_default_ssh_port(),
                key_type: preferred.key_type.clone(),
                fingerprint: fingerprint.clone(),
            };
            self.logger.info(
                "awaiting host key confirmation",
                Some(&serde_json::json!({ "host": name, "fingerprint": fingerprint })),
            );
            tokio::select! {
                decision = self.operator.confirm_host_key(prompt) => decision,
                _ = tokio::time::sleep(self.wait) => {
                    self.logger.warn(
                        "host key confirmation window expired",
                        Some(&serde_json::json!({ "host": name, "wait_ms": self.wait.as_millis() as u64 })),
                    );
                    HostKeyDecision::Reject
                }
                _ = wait_cancelled(cancel) => {
                    return Err(ToolError::cancelled(format!(
                        "Host key confirmation for {} was cancelled",
                        name
                    )));
                }
            }
        };

        if decision == HostKeyDecision::Accept {
            self.persist(name, preferred).await?;
        }
        Ok(decision)
    }

    async fn scan(
        &self,
        url: &RemoteUrl,
        name: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<ScannedKey>, ToolError> {
        let host = url.host.clone().unwrap_or_else(|| name.to_string());
        let mut args: Vec<String> = self.keyscan_command[1..].to_vec();
        args.push("-T".to_string());
        args.push(KEYSCAN_CONNECT_TIMEOUT_SECS.to_string());
        if let Some(port) = url.non_default_ssh_port() {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(host);
        let options = ExecOptions::default()
            .with_timeout(TIMEOUT_KEYSCAN_MS)
            .with_cancel(cancel.cloned());
        let result = self
            .executor
            .run_program(&self.keyscan_command[0], &args, &options)
            .await?;
        Ok(parse_keyscan(&result.stdout))
    }

    fn known_hosts_file_lists(&self, name: &str) -> bool {
        std::fs::read_to_string(&self.known_hosts_path)
            .map(|content| known_hosts_lists(&content, name))
            .unwrap_or(false)
    }

    /// Records only the key whose fingerprint was confirmed. Other keys the
    /// scan returned stay untrusted.
    async fn persist(&self, name: &str, key: &ScannedKey) -> Result<(), ToolError> {
        let _guard = self.write_lock.lock().await;
        if self.known_hosts_file_lists(name) {
            return Ok(());
        }
        let line = format!("{} {} {}\n", name, key.key_type, key.key);
        append_private_file(&self.known_hosts_path, &line, 0o600).map_err(|err| {
            ToolError::internal(format!("Failed to update known_hosts: {}", err))
        })?;
        self.logger.info(
            "host key accepted",
            Some(&serde_json::json!({ "host": name, "key_type": key.key_type })),
        );
        Ok(())
    }

    async fn wait_for_decision(
        mut rx: watch::Receiver<Option<HostKeyDecision>>,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<HostKeyDecision>, ToolError> {
        let decided = async {
            loop {
                if let Some(decision) = *rx.borrow() {
                    return Some(decision);
                }
                if rx.changed().await.is_err() {
                    return *rx.borrow();
                }
            }
        };
        tokio::select! {
            decision = decided => Ok(decision),
            _ = wait_cancelled(cancel) => Err(ToolError::cancelled("Host key confirmation wait was cancelled")),
        }
    }
}

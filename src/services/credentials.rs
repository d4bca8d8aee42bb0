//! Decides how a git invocation authenticates and builds its environment.

use crate::errors::ToolError;
use crate::services::askpass::{helper_program, non_interactive_env, AskpassSession};
use crate::services::credential_store::{CredentialKind, CredentialStore, StoredCredential};
use crate::services::host_keys::HostKeyGate;
use crate::services::logger::Logger;
use crate::services::operator::OperatorChannel;
use crate::services::security::Security;
use crate::services::ssh_keys::SshKeySession;
use crate::utils::cancel::CancelToken;
use crate::utils::git_url::{RemoteUrl, Transport};
use base64::Engine;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroize;

const DEFAULT_TOKEN_USERNAME: &str = "x-access-token";

/// Whether a stuck prompt should reach the operator or fail fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Background and read-heavy work: prompts are disabled.
    NonInteractive,
    /// Operator-initiated writes: prompts go through the askpass bridge.
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStrategy {
    Anonymous,
    Token,
    SshKey,
}

/// Everything one operation needs to authenticate. Owns the ephemeral key and
/// askpass socket; dropping it removes both and wipes the environment values.
pub struct AuthContext {
    pub strategy: AuthStrategy,
    pub credential: Option<String>,
    env: Vec<(String, String)>,
    ssh_key: Option<SshKeySession>,
    askpass: Option<AskpassSession>,
}

impl AuthContext {
    fn new(env: Vec<(String, String)>) -> Self {
        Self {
            strategy: AuthStrategy::Anonymous,
            credential: None,
            env,
            ssh_key: None,
            askpass: None,
        }
    }

    pub fn env(&self) -> Vec<(String, String)> {
        self.env.clone()
    }

    pub fn ssh_key_path(&self) -> Option<PathBuf> {
        self.ssh_key
            .as_ref()
            .and_then(|s| s.key_path().map(|p| p.to_path_buf()))
    }

    pub fn cleanup(&mut self) {
        if let Some(session) = self.ssh_key.as_mut() {
            session.cleanup();
        }
        self.ssh_key = None;
        self.askpass = None;
        for (_, value) in self.env.iter_mut() {
            value.zeroize();
        }
        self.env.clear();
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn basic_auth_header(username: &str, token: &str) -> String {
    let mut raw = format!("{}:{}", username, token);
    let encoded = base64::engine::general_purpose::STANDARD.encode(raw.as_bytes());
    raw.zeroize();
    format!("Authorization: Basic {}", encoded)
}

#[derive(Clone)]
pub struct CredentialResolver {
    logger: Logger,
    store: CredentialStore,
    security: Arc<Security>,
    host_keys: HostKeyGate,
    operator: Arc<dyn OperatorChannel>,
    runtime_dir: PathBuf,
    askpass_helper: Option<PathBuf>,
}

impl CredentialResolver {
    pub fn new(
        logger: &Logger,
        store: CredentialStore,
        security: Arc<Security>,
        host_keys: HostKeyGate,
        operator: Arc<dyn OperatorChannel>,
        runtime_dir: PathBuf,
    ) -> Self {
        Self {
            logger: logger.child("auth"),
            store,
            security,
            host_keys,
            operator,
            runtime_dir,
            askpass_helper: None,
        }
    }

    /// Askpass program handed to git and ssh. Embedders whose own binary does
    /// not route helper invocations to `askpass::run_helper` must point this
    /// at one that does, such as the `gitkeeper` binary.
    pub fn with_askpass_helper(mut self, helper: Option<PathBuf>) -> Self {
        self.askpass_helper = helper;
        self
    }

    fn helper(&self) -> Result<PathBuf, ToolError> {
        helper_program(self.askpass_helper.as_deref())
    }

    pub fn host_keys(&self) -> &HostKeyGate {
        &self.host_keys
    }

    /// Builds the auth context for one operation against `remote_url`.
    /// Missing credentials degrade to anonymous access; key provisioning and
    /// host-key failures abort with the key already cleaned up.
    pub async fn resolve(
        &self,
        remote_url: Option<&str>,
        mode: AuthMode,
        repository: Option<&str>,
        cancel: Option<&CancelToken>,
    ) -> Result<AuthContext, ToolError> {
        let mut context = match mode {
            AuthMode::NonInteractive => AuthContext::new(non_interactive_env()),
            AuthMode::Interactive => {
                let session = AskpassSession::start(
                    &self.logger,
                    &self.runtime_dir,
                    self.operator.clone(),
                    repository.map(str::to_string),
                )?;
                let mut context = AuthContext::new(session.env(&self.helper()?));
                context.askpass = Some(session);
                context
            }
        };

        let Some(raw_url) = remote_url.map(str::trim).filter(|u| !u.is_empty()) else {
            return Ok(context);
        };
        let url = RemoteUrl::parse(raw_url)?;
        match url.transport {
            Transport::Ssh => self.resolve_ssh(&url, mode, cancel, &mut context).await?,
            Transport::Https | Transport::Http => self.resolve_token(&url, &mut context)?,
            Transport::Git | Transport::Local => {}
        }
        self.logger.debug(
            "resolved auth",
            Some(&serde_json::json!({
                "host": url.host,
                "strategy": context.strategy,
                "credential": context.credential,
            })),
        );
        Ok(context)
    }

    fn find(&self, url: &RemoteUrl, kind: CredentialKind) -> Option<StoredCredential> {
        url.host.as_deref().and_then(|host| self.store.find(host, kind))
    }

    async fn resolve_ssh(
        &self,
        url: &RemoteUrl,
        mode: AuthMode,
        cancel: Option<&CancelToken>,
        context: &mut AuthContext,
    ) -> Result<(), ToolError> {
        let mut session = SshKeySession::new(&self.logger, &self.runtime_dir);
        if let Some(credential) = self.find(url, CredentialKind::SshKey) {
            session.provision(&credential, &self.security, url.non_default_ssh_port())?;
            context.strategy = AuthStrategy::SshKey;
            context.credential = Some(credential.name);
        }

        if let Err(err) = self.host_keys.verify_before_operation(url, cancel).await {
            session.cleanup();
            return Err(err);
        }

        let interactive = mode == AuthMode::Interactive;
        let pinned = self.host_keys.pinned_algorithms(url);
        context.env.push((
            "GIT_SSH_COMMAND".to_string(),
            session.build_command(
                self.host_keys.known_hosts_path(),
                pinned.as_deref(),
                interactive,
            ),
        ));
        if session.has_passphrase() {
            context.env.extend(session.passphrase_env(&self.helper()?));
        }
        context.ssh_key = Some(session);
        Ok(())
    }

    fn resolve_token(&self, url: &RemoteUrl, context: &mut AuthContext) -> Result<(), ToolError> {
        let Some(credential) = self.find(url, CredentialKind::Token) else {
            return Ok(());
        };
        let (Some(origin), Some(blob)) = (url.http_origin(), credential.token.as_deref()) else {
            return Ok(());
        };
        if url.transport == Transport::Http {
            self.logger.warn(
                "sending token over plain http",
                Some(&serde_json::json!({ "host": url.host })),
            );
        }
        let token = self.security.decrypt(blob)?;
        let username = credential
            .username
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(DEFAULT_TOKEN_USERNAME);
        context.env.extend([
            ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
            (
                "GIT_CONFIG_KEY_0".to_string(),
                format!("http.{}.extraheader", origin),
            ),
            (
                "GIT_CONFIG_VALUE_0".to_string(),
                basic_auth_header(username, token.as_str()),
            ),
        ]);
        context.strategy = AuthStrategy::Token;
        context.credential = Some(credential.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::buffers::CRYPTO_KEY_SIZE;
    use crate::services::operator::{HostKeyDecision, StaticOperator};
    use crate::services::process::ProcessExecutor;

    const ED25519: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";

    struct Fixture {
        dir: PathBuf,
        resolver: CredentialResolver,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn fixture(decision: HostKeyDecision, seed_known_host: bool) -> Fixture {
        let dir = std::env::temp_dir().join(format!("gitkeeper-auth-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        let security = Arc::new(Security::from_key(&[5u8; CRYPTO_KEY_SIZE]));
        let store = CredentialStore::from_credentials(vec![
            StoredCredential {
                name: "github".to_string(),
                host_pattern: "github.com".to_string(),
                kind: CredentialKind::Token,
                username: None,
                token: Some(security.encrypt("ghp_testtoken").expect("encrypt")),
                private_key: None,
                passphrase: None,
            },
            StoredCredential {
                name: "corp".to_string(),
                host_pattern: "*.corp.test".to_string(),
                kind: CredentialKind::SshKey,
                username: None,
                token: None,
                private_key: Some(security.encrypt("-----BEGIN KEY-----").expect("encrypt")),
                passphrase: None,
            },
        ])
        .expect("store");
        let known_hosts = dir.join("known_hosts");
        if seed_known_host {
            std::fs::write(&known_hosts, format!("git.corp.test ssh-ed25519 {}\n", ED25519))
                .expect("seed");
        }
        let logger = Logger::new("test");
        let operator: Arc<dyn OperatorChannel> =
            Arc::new(StaticOperator::new(decision, None));
        let gate = HostKeyGate::new(
            &logger,
            ProcessExecutor::new(logger.clone(), "git"),
            operator.clone(),
            known_hosts,
        )
        .with_keyscan_command(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo \"git.corp.test ssh-ed25519 {}\"", ED25519),
            "keyscan".to_string(),
        ]);
        let resolver = CredentialResolver::new(
            &logger,
            store,
            security,
            gate,
            operator,
            dir.join("run"),
        );
        Fixture { dir, resolver }
    }

    fn env_value(env: &[(String, String)], key: &str) -> Option<String> {
        env.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    fn key_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.file_name().to_string_lossy().starts_with("gitkeeper-key-"))
                    .count()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn token_is_injected_through_config_env() {
        let fx = fixture(HostKeyDecision::Reject, false);
        let ctx = fx
            .resolver
            .resolve(
                Some("https://github.com/acme/app.git"),
                AuthMode::NonInteractive,
                None,
                None,
            )
            .await
            .expect("resolve");
        assert_eq!(ctx.strategy, AuthStrategy::Token);
        let env = ctx.env();
        assert_eq!(
            env_value(&env, "GIT_CONFIG_KEY_0").as_deref(),
            Some("http.https://github.com/.extraheader")
        );
        let header = env_value(&env, "GIT_CONFIG_VALUE_0").expect("header");
        let encoded = header.strip_prefix("Authorization: Basic ").expect("basic");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .expect("b64");
        assert_eq!(decoded, b"x-access-token:ghp_testtoken");
        assert_eq!(env_value(&env, "GIT_TERMINAL_PROMPT").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn unmatched_or_missing_remote_degrades_to_anonymous() {
        let fx = fixture(HostKeyDecision::Reject, false);
        for remote in [None, Some("https://gitlab.com/acme/app.git"), Some("/srv/app.git")] {
            let ctx = fx
                .resolver
                .resolve(remote, AuthMode::NonInteractive, None, None)
                .await
                .expect("resolve");
            assert_eq!(ctx.strategy, AuthStrategy::Anonymous);
            assert!(env_value(&ctx.env(), "GIT_CONFIG_COUNT").is_none());
            assert_eq!(env_value(&ctx.env(), "GCM_INTERACTIVE").as_deref(), Some("never"));
        }
    }

    #[tokio::test]
    async fn ssh_key_is_provisioned_and_removed_with_context() {
        let fx = fixture(HostKeyDecision::Reject, true);
        let mut ctx = fx
            .resolver
            .resolve(
                Some("git@git.corp.test:team/app.git"),
                AuthMode::NonInteractive,
                None,
                None,
            )
            .await
            .expect("resolve");
        assert_eq!(ctx.strategy, AuthStrategy::SshKey);
        let key = ctx.ssh_key_path().expect("key path");
        assert!(key.exists());
        let command = env_value(&ctx.env(), "GIT_SSH_COMMAND").expect("ssh command");
        assert!(command.contains(&key.to_string_lossy().to_string()));
        assert!(command.contains("known_hosts"));
        assert!(command.contains("-o HostKeyAlgorithms='ssh-ed25519'"));
        ctx.cleanup();
        assert!(!key.exists());
        ctx.cleanup();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejected_host_aborts_without_leaving_key_files() {
        let fx = fixture(HostKeyDecision::Reject, false);
        let err = fx
            .resolver
            .resolve(
                Some("ssh://git@git.corp.test/team/app.git"),
                AuthMode::NonInteractive,
                None,
                None,
            )
            .await
            .err()
            .expect("rejected");
        assert!(err.message.starts_with("Host key verification failed"));
        assert_eq!(key_files(&fx.dir.join("run")), 0);
    }

    #[tokio::test]
    async fn ssh_without_key_still_pins_trust_store() {
        let fx = fixture(HostKeyDecision::Accept, false);
        let ctx = fx
            .resolver
            .resolve(
                Some("git@github.com:acme/app.git"),
                AuthMode::NonInteractive,
                None,
                None,
            )
            .await;
        // github.com is scanned through the fake keyscan, accepted, then pinned.
        let ctx = ctx.expect("resolve");
        assert_eq!(ctx.strategy, AuthStrategy::Anonymous);
        let command = env_value(&ctx.env(), "GIT_SSH_COMMAND").expect("ssh command");
        assert!(!command.contains(" -i "));
        assert!(command.contains("StrictHostKeyChecking=yes"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn configured_askpass_helper_replaces_current_exe() {
        let fx = fixture(HostKeyDecision::Reject, false);
        let helper = PathBuf::from("/opt/gitkeeper/bin/gitkeeper");
        let resolver = fx.resolver.clone().with_askpass_helper(Some(helper.clone()));
        let mut ctx = resolver
            .resolve(None, AuthMode::Interactive, Some("app"), None)
            .await
            .expect("resolve");
        let expected = helper.to_string_lossy().to_string();
        assert_eq!(env_value(&ctx.env(), "GIT_ASKPASS"), Some(expected.clone()));
        assert_eq!(env_value(&ctx.env(), "SSH_ASKPASS"), Some(expected));
        ctx.cleanup();

        let mut ctx = fx
            .resolver
            .resolve(None, AuthMode::Interactive, Some("app"), None)
            .await
            .expect("resolve");
        let current = std::env::current_exe().expect("exe").to_string_lossy().to_string();
        assert_eq!(env_value(&ctx.env(), "GIT_ASKPASS"), Some(current));
        ctx.cleanup();
    }

    #[test]
    fn basic_auth_header_encodes_user_and_token() {
        assert_eq!(
            basic_auth_header("oauth2", "abc"),
            format!(
                "Authorization: Basic {}",
                base64::engine::general_purpose::STANDARD.encode("oauth2:abc")
            )
        );
    }
}

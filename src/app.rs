use crate::config::Config;
use crate::errors::ToolError;
use crate::managers::repo::RepoManager;
use crate::services::credential_store::CredentialStore;
use crate::services::credentials::CredentialResolver;
use crate::services::host_keys::HostKeyGate;
use crate::services::logger::Logger;
use crate::services::operator::OperatorChannel;
use crate::services::process::ProcessExecutor;
use crate::services::repository_store::{MemoryRepositoryStore, RepositoryStore};
use crate::services::security::Security;
use std::sync::Arc;
use std::time::Duration;

/// Wired service graph. One instance per server process.
pub struct App {
    pub logger: Logger,
    pub config: Config,
    pub credentials: CredentialStore,
    pub repos: RepoManager,
}

impl App {
    pub fn initialize(
        config: Config,
        logger: Logger,
        operator: Arc<dyn OperatorChannel>,
    ) -> Result<Self, ToolError> {
        let security = Arc::new(Security::new()?);
        Self::with_security(config, logger, operator, security)
    }

    pub fn with_security(
        config: Config,
        logger: Logger,
        operator: Arc<dyn OperatorChannel>,
        security: Arc<Security>,
    ) -> Result<Self, ToolError> {
        std::fs::create_dir_all(&config.runtime_dir)?;
        let credentials = CredentialStore::load(&config.credentials_path)?;
        let executor = ProcessExecutor::new(logger.clone(), config.git_binary.clone());
        let host_keys = HostKeyGate::new(
            &logger,
            executor.clone(),
            operator.clone(),
            config.known_hosts_path.clone(),
        )
        .with_wait(Duration::from_millis(config.host_key_wait_ms))
        .with_auto_accept(config.auto_accept_host_keys);
        let resolver = CredentialResolver::new(
            &logger,
            credentials.clone(),
            security,
            host_keys,
            operator,
            config.runtime_dir.clone(),
        )
        .with_askpass_helper(config.askpass_helper.clone());
        let repositories: Arc<dyn RepositoryStore> = Arc::new(MemoryRepositoryStore::new());
        let repos = RepoManager::new(&logger, executor, resolver, repositories)
            .with_timeouts(config.local_timeout_ms, config.network_timeout_ms);

        logger.info(
            "initialized",
            Some(&serde_json::json!({
                "base_dir": config.base_dir,
                "credentials": credentials.list().len(),
                "git": config.git_binary,
                "auto_accept_host_keys": config.auto_accept_host_keys,
            })),
        );
        Ok(Self {
            logger,
            config,
            credentials,
            repos,
        })
    }
}

//! Relays git/ssh credential prompts to the operator channel.
//!
//! The parent binds a per-operation unix socket and points `GIT_ASKPASS` /
//! `SSH_ASKPASS` at its own executable. When git needs an answer it runs the
//! helper, which sends one JSON line `{"prompt": ...}` over the socket and
//! prints the `{"answer": ...}` it gets back.

use crate::constants::buffers::MAX_ASKPASS_LINE;
use crate::constants::env as env_keys;
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::services::operator::{CredentialPrompt, OperatorChannel};
use crate::utils::fs_atomic::{random_token, remove_file_if_exists};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskpassRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskpassResponse {
    pub answer: String,
}

/// Environment for operations that must fail fast instead of prompting.
pub fn non_interactive_env() -> Vec<(String, String)> {
    vec![
        ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
        ("GCM_INTERACTIVE".to_string(), "never".to_string()),
        ("SSH_ASKPASS_REQUIRE".to_string(), "never".to_string()),
    ]
}

/// Program git and ssh run as their askpass helper. Without a configured
/// path this is the running executable, which answers only when its `main`
/// dispatches to [`run_helper`] (the `gitkeeper` binary does).
pub fn helper_program(configured: Option<&Path>) -> Result<PathBuf, ToolError> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    std::env::current_exe()
        .map_err(|err| ToolError::internal(format!("Cannot locate askpass helper: {}", err)))
}

/// Listener that lives for exactly one operation. Dropping it stops the
/// listener and removes the socket file.
pub struct AskpassSession {
    socket_path: PathBuf,
    task: JoinHandle<()>,
}

impl AskpassSession {
    pub fn start(
        logger: &Logger,
        dir: &Path,
        operator: Arc<dyn OperatorChannel>,
        repository: Option<String>,
    ) -> Result<Self, ToolError> {
        std::fs::create_dir_all(dir)
            .map_err(|err| ToolError::internal(format!("Failed to prepare askpass dir: {}", err)))?;
        let socket_path = dir.join(format!("gitkeeper-askpass-{}.sock", random_token(12)));
        let listener = UnixListener::bind(&socket_path).map_err(|err| {
            ToolError::internal(format!("Failed to bind askpass socket: {}", err))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600));
        }

        let logger = logger.child("askpass");
        let task = tokio::spawn(async move {
            loop {
                let stream = match listener.accept().await {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        logger.warn(
                            "askpass accept failed",
                            Some(&serde_json::json!({ "error": err.to_string() })),
                        );
                        break;
                    }
                };
                let operator = operator.clone();
                let logger = logger.clone();
                let repository = repository.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_prompt(stream, operator, repository).await {
                        logger.warn(
                            "askpass exchange failed",
                            Some(&serde_json::json!({ "error": err.message })),
                        );
                    }
                });
            }
        });

        Ok(Self { socket_path, task })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Points git's and ssh's prompt hooks at `helper`.
    pub fn env(&self, helper: &Path) -> Vec<(String, String)> {
        let helper = helper.to_string_lossy().to_string();
        vec![
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
            ("GIT_ASKPASS".to_string(), helper.clone()),
            ("SSH_ASKPASS".to_string(), helper),
            ("SSH_ASKPASS_REQUIRE".to_string(), "force".to_string()),
            (
                env_keys::ASKPASS_SOCKET.to_string(),
                self.socket_path.to_string_lossy().to_string(),
            ),
        ]
    }
}

impl Drop for AskpassSession {
    fn drop(&mut self) {
        self.task.abort();
        let _ = remove_file_if_exists(&self.socket_path);
    }
}

async fn serve_prompt(
    stream: UnixStream,
    operator: Arc<dyn OperatorChannel>,
    repository: Option<String>,
) -> Result<(), ToolError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half.take(MAX_ASKPASS_LINE as u64));
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let request: AskpassRequest = serde_json::from_str(line.trim())
        .map_err(|err| ToolError::invalid_params(format!("Malformed askpass request: {}", err)))?;

    let answer = operator
        .request_credential(CredentialPrompt {
            prompt: request.prompt,
            repository,
        })
        .await
        .map(Zeroizing::new)
        .unwrap_or_default();
    let payload = Zeroizing::new(
        serde_json::to_string(&AskpassResponse {
            answer: answer.as_str().to_string(),
        })
        .map_err(|err| ToolError::internal(format!("Failed to encode askpass answer: {}", err)))?,
    );
    write_half.write_all(payload.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.shutdown().await?;
    Ok(())
}

/// Helper personality of the binary: answers one prompt and returns what to
/// print on stdout. Passphrase prompts are answered from the environment when
/// an ssh passphrase was provisioned; everything else goes to the socket.
pub fn run_helper(prompt: &str) -> Result<Zeroizing<String>, ToolError> {
    let is_passphrase_prompt = prompt.to_lowercase().contains("passphrase");
    if is_passphrase_prompt {
        if let Ok(passphrase) = std::env::var(env_keys::SSH_PASSPHRASE) {
            return Ok(Zeroizing::new(passphrase));
        }
    }
    let Ok(socket) = std::env::var(env_keys::ASKPASS_SOCKET) else {
        return Ok(Zeroizing::new(String::new()));
    };
    relay_prompt(Path::new(&socket), prompt)
}

fn relay_prompt(socket: &Path, prompt: &str) -> Result<Zeroizing<String>, ToolError> {
    use std::io::{BufRead, Read, Write};

    let mut stream = std::os::unix::net::UnixStream::connect(socket)
        .map_err(|err| ToolError::internal(format!("Askpass socket unavailable: {}", err)))?;
    let request = serde_json::to_string(&AskpassRequest {
        prompt: prompt.to_string(),
    })
    .map_err(|err| ToolError::internal(format!("Failed to encode askpass prompt: {}", err)))?;
    stream.write_all(request.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = std::io::BufReader::new(stream.take(MAX_ASKPASS_LINE as u64));
    let mut line = Zeroizing::new(String::new());
    reader.read_line(&mut line)?;
    let response: AskpassResponse = serde_json::from_str(line.trim())
        .map_err(|err| ToolError::internal(format!("Malformed askpass answer: {}", err)))?;
    Ok(Zeroizing::new(response.answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::operator::StaticOperator;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("gkap-{}", &uuid::Uuid::new_v4().to_string()[..8]))
    }

    #[tokio::test]
    async fn session_relays_prompt_to_operator() {
        let dir = temp_dir();
        let operator = Arc::new(StaticOperator::rejecting().with_answer("s3cret"));
        let session = AskpassSession::start(&Logger::new("test"), &dir, operator, None)
            .expect("start");
        let socket = session.socket_path().to_path_buf();
        let answer = tokio::task::spawn_blocking(move || {
            relay_prompt(&socket, "Password for 'https://bot@example.com': ")
        })
        .await
        .expect("join")
        .expect("relay");
        assert_eq!(answer.as_str(), "s3cret");
        drop(session);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn declined_prompt_answers_empty() {
        let dir = temp_dir();
        let session = AskpassSession::start(
            &Logger::new("test"),
            &dir,
            Arc::new(StaticOperator::rejecting()),
            Some("repo-1".to_string()),
        )
        .expect("start");
        let socket = session.socket_path().to_path_buf();
        let answer = tokio::task::spawn_blocking(move || relay_prompt(&socket, "Username: "))
            .await
            .expect("join")
            .expect("relay");
        assert_eq!(answer.as_str(), "");
        let env = session.env(Path::new("/usr/bin/gitkeeper"));
        assert!(env.contains(&("GIT_ASKPASS".to_string(), "/usr/bin/gitkeeper".to_string())));
        drop(session);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn dropping_session_removes_socket() {
        let dir = temp_dir();
        let session = AskpassSession::start(
            &Logger::new("test"),
            &dir,
            Arc::new(StaticOperator::default()),
            None,
        )
        .expect("start");
        let socket = session.socket_path().to_path_buf();
        assert!(socket.exists());
        drop(session);
        assert!(!socket.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn non_interactive_env_disables_prompts() {
        let env = non_interactive_env();
        assert!(env.contains(&("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())));
        assert!(env.contains(&("GCM_INTERACTIVE".to_string(), "never".to_string())));
    }
}

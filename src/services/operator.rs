use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Describes a host whose key is not yet in the trust store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostKeyPrompt {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub key_type: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyDecision {
    Accept,
    Reject,
}

impl HostKeyDecision {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "accept" | "accepted" | "yes" | "true" => Some(Self::Accept),
            "reject" | "rejected" | "no" | "false" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// A prompt git or ssh raised mid-operation (username, password, passphrase).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPrompt {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Bidirectional channel to whoever operates the service. Implementations
/// may block for as long as they like; callers bound the wait.
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    async fn confirm_host_key(&self, prompt: HostKeyPrompt) -> HostKeyDecision;

    /// `None` means the operator declined; the helper then answers empty.
    async fn request_credential(&self, prompt: CredentialPrompt) -> Option<String>;
}

/// Fixed answers. The default rejects every host key and answers no
/// credential prompt.
#[derive(Debug, Clone)]
pub struct StaticOperator {
    decision: HostKeyDecision,
    answer: Option<String>,
}

impl Default for StaticOperator {
    fn default() -> Self {
        Self::rejecting()
    }
}

impl StaticOperator {
    pub fn new(decision: HostKeyDecision, answer: Option<String>) -> Self {
        Self { decision, answer }
    }

    pub fn rejecting() -> Self {
        Self::new(HostKeyDecision::Reject, None)
    }

    pub fn accepting() -> Self {
        Self::new(HostKeyDecision::Accept, None)
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }
}

#[async_trait]
impl OperatorChannel for StaticOperator {
    async fn confirm_host_key(&self, _prompt: HostKeyPrompt) -> HostKeyDecision {
        self.decision
    }

    async fn request_credential(&self, _prompt: CredentialPrompt) -> Option<String> {
        self.answer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parse_accepts_aliases() {
        assert_eq!(HostKeyDecision::parse("Accept"), Some(HostKeyDecision::Accept));
        assert_eq!(HostKeyDecision::parse("no"), Some(HostKeyDecision::Reject));
        assert_eq!(HostKeyDecision::parse("maybe"), None);
    }

    #[tokio::test]
    async fn default_operator_rejects_and_declines() {
        let operator = StaticOperator::default();
        let decision = operator
            .confirm_host_key(HostKeyPrompt {
                host: "example.com".to_string(),
                port: None,
                key_type: "ssh-ed25519".to_string(),
                fingerprint: "SHA256:abc".to_string(),
            })
            .await;
        assert_eq!(decision, HostKeyDecision::Reject);
        let answer = operator
            .request_credential(CredentialPrompt {
                prompt: "Password:".to_string(),
                repository: None,
            })
            .await;
        assert!(answer.is_none());
    }
}

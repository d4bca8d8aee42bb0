//! Operator channel carried over the JSON-RPC connection: prompts go out as
//! `operator/prompt` notifications, answers come back as `operator/respond`
//! requests.

use crate::rpc::protocol::JsonRpcNotification;
use crate::services::logger::Logger;
use crate::services::operator::{CredentialPrompt, HostKeyDecision, HostKeyPrompt, OperatorChannel};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub const PROMPT_METHOD: &str = "operator/prompt";

/// Removes the pending entry when the waiting side goes away (answered,
/// timed out upstream, or its task aborted).
struct PendingGuard {
    pending: Arc<DashMap<String, oneshot::Sender<Value>>>,
    prompt_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.prompt_id);
    }
}

#[derive(Clone)]
pub struct RpcOperator {
    logger: Logger,
    outbound: mpsc::UnboundedSender<String>,
    pending: Arc<DashMap<String, oneshot::Sender<Value>>>,
}

impl RpcOperator {
    pub fn new(logger: &Logger, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            logger: logger.child("operator"),
            outbound,
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Routes an `operator/respond` payload to its waiting prompt. Returns
    /// false for unknown or already answered ids.
    pub fn respond(&self, prompt_id: &str, response: Value) -> bool {
        match self.pending.remove(prompt_id) {
            Some((_, sender)) => sender.send(response).is_ok(),
            None => false,
        }
    }

    /// `None` when the notification could not be sent or the prompt was
    /// dropped unanswered.
    async fn ask(&self, kind: &str, mut params: Value) -> Option<Value> {
        let prompt_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(prompt_id.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            prompt_id: prompt_id.clone(),
        };

        if let Some(obj) = params.as_object_mut() {
            obj.insert("prompt_id".to_string(), Value::String(prompt_id.clone()));
            obj.insert("kind".to_string(), Value::String(kind.to_string()));
        }
        let payload = serde_json::to_string(&JsonRpcNotification::new(PROMPT_METHOD, params)).ok()?;
        if self.outbound.send(payload).is_err() {
            self.logger.warn("operator channel closed", None);
            return None;
        }
        self.logger.info(
            "operator prompt sent",
            Some(&serde_json::json!({ "prompt_id": prompt_id, "kind": kind })),
        );
        rx.await.ok()
    }
}

fn read_decision(response: &Value) -> HostKeyDecision {
    let decision = match response {
        Value::Bool(true) => Some(HostKeyDecision::Accept),
        Value::String(s) => HostKeyDecision::parse(s),
        Value::Object(obj) => obj
            .get("decision")
            .and_then(|v| v.as_str())
            .and_then(HostKeyDecision::parse)
            .or_else(|| {
                obj.get("accept")
                    .and_then(|v| v.as_bool())
                    .map(|accept| if accept { HostKeyDecision::Accept } else { HostKeyDecision::Reject })
            }),
        _ => None,
    };
    decision.unwrap_or(HostKeyDecision::Reject)
}

fn read_answer(response: &Value) -> Option<String> {
    match response {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("answer").and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl OperatorChannel for RpcOperator {
    async fn confirm_host_key(&self, prompt: HostKeyPrompt) -> HostKeyDecision {
        let params = serde_json::to_value(&prompt).unwrap_or(Value::Null);
        match self.ask("host_key", params).await {
            Some(response) => read_decision(&response),
            None => HostKeyDecision::Reject,
        }
    }

    async fn request_credential(&self, prompt: CredentialPrompt) -> Option<String> {
        let params = serde_json::to_value(&prompt).unwrap_or(Value::Null);
        self.ask("credential", params)
            .await
            .and_then(|response| read_answer(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prompt() -> HostKeyPrompt {
        HostKeyPrompt {
            host: "git.corp.test".to_string(),
            port: None,
            key_type: "ssh-ed25519".to_string(),
            fingerprint: "SHA256:abc".to_string(),
        }
    }

    #[tokio::test]
    async fn prompt_is_answered_through_respond() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let operator = RpcOperator::new(&Logger::new("test"), tx);
        let waiter = {
            let operator = operator.clone();
            tokio::spawn(async move { operator.confirm_host_key(prompt()).await })
        };
        let line = rx.recv().await.expect("notification");
        let sent: Value = serde_json::from_str(&line).expect("json");
        assert_eq!(sent["method"], PROMPT_METHOD);
        assert_eq!(sent["params"]["kind"], "host_key");
        assert_eq!(sent["params"]["host"], "git.corp.test");
        let prompt_id = sent["params"]["prompt_id"].as_str().expect("id").to_string();

        assert!(operator.respond(&prompt_id, json!({"decision": "accept"})));
        assert_eq!(waiter.await.expect("join"), HostKeyDecision::Accept);
        assert!(!operator.respond(&prompt_id, json!({"decision": "accept"})));
        assert_eq!(operator.pending_count(), 0);
    }

    #[tokio::test]
    async fn aborted_prompt_leaves_no_pending_entry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let operator = RpcOperator::new(&Logger::new("test"), tx);
        let task = {
            let operator = operator.clone();
            tokio::spawn(async move {
                operator
                    .request_credential(CredentialPrompt {
                        prompt: "Password for 'https://git.corp.test':".to_string(),
                        repository: Some("app".to_string()),
                    })
                    .await
            })
        };
        rx.recv().await.expect("notification");
        assert_eq!(operator.pending_count(), 1);
        task.abort();
        let _ = task.await;
        assert_eq!(operator.pending_count(), 0);
    }

    #[tokio::test]
    async fn closed_channel_rejects() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let operator = RpcOperator::new(&Logger::new("test"), tx);
        assert_eq!(operator.confirm_host_key(prompt()).await, HostKeyDecision::Reject);
    }

    #[test]
    fn response_shapes() {
        assert_eq!(read_decision(&json!({"accept": true})), HostKeyDecision::Accept);
        assert_eq!(read_decision(&json!("reject")), HostKeyDecision::Reject);
        assert_eq!(read_decision(&json!({"decision": "maybe"})), HostKeyDecision::Reject);
        assert_eq!(read_answer(&json!({"answer": "s3cret"})).as_deref(), Some("s3cret"));
        assert_eq!(read_answer(&json!(null)), None);
    }
}

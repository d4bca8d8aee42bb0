use crate::app::App;
use crate::config::Config;
use crate::errors::{ErrorCode, RpcError, ToolError};
use crate::managers::repo::REPO_ACTIONS;
use crate::rpc::operator::RpcOperator;
use crate::rpc::protocol::{id_key, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use crate::services::logger::Logger;
use crate::utils::cancel::CancelToken;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SERVER_NAME: &str = "gitkeeper";
const REPO_PREFIX: &str = "repo/";
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Line-delimited JSON-RPC 2.0. Repository calls run as independent tasks;
/// every outbound line goes through a single writer channel so responses and
/// operator prompts never interleave.
pub struct RpcServer {
    logger: Logger,
    app: Arc<App>,
    operator: RpcOperator,
    outbound: mpsc::UnboundedSender<String>,
    inflight: Arc<DashMap<String, CancelToken>>,
}

impl RpcServer {
    pub fn new(app: Arc<App>, operator: RpcOperator, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            logger: app.logger.child("rpc"),
            app,
            operator,
            outbound,
            inflight: Arc::new(DashMap::new()),
        }
    }

    fn send(&self, response: &JsonRpcResponse) {
        match serde_json::to_string(response) {
            Ok(payload) => {
                if self.outbound.send(payload).is_err() {
                    self.logger.warn("output closed; dropping response", None);
                }
            }
            Err(err) => self.logger.error(
                "failed to encode response",
                Some(&serde_json::json!({ "error": err.to_string() })),
            ),
        }
    }

    fn handle_initialize(&self) -> Value {
        let methods: Vec<String> = REPO_ACTIONS
            .iter()
            .map(|action| format!("{}{}", REPO_PREFIX, action))
            .chain(["operator/respond", "credentials/reload", "shutdown"].map(String::from))
            .collect();
        serde_json::json!({
            "protocolVersion": JSONRPC_VERSION,
            "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
            "methods": methods,
        })
    }

    fn handle_operator_respond(&self, params: &Value) -> Result<Value, RpcError> {
        let prompt_id = params
            .get("prompt_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RpcError::new(ErrorCode::InvalidParams, "prompt_id is required"))?;
        let delivered = self.operator.respond(prompt_id, params.clone());
        Ok(serde_json::json!({ "delivered": delivered }))
    }

    fn handle_credentials_reload(&self) -> Result<Value, RpcError> {
        self.app.credentials.reload()?;
        Ok(serde_json::json!({ "count": self.app.credentials.list().len() }))
    }

    fn handle_cancel(&self, params: &Value) {
        if let Some(id) = params.get("id") {
            if let Some(token) = self.inflight.get(&id_key(id)) {
                token.cancel();
            }
        }
    }

    /// Methods answered inline on the reader task.
    fn dispatch(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        let result = match request.method.as_str() {
            "$/cancelRequest" => {
                self.handle_cancel(&request.params);
                return None;
            }
            "initialize" => Ok(self.handle_initialize()),
            "operator/respond" => self.handle_operator_respond(&request.params),
            "credentials/reload" => self.handle_credentials_reload(),
            _ => Err(RpcError::new(
                ErrorCode::MethodNotFound,
                format!("Method not found: {}", request.method),
            )),
        };
        let id = request.id.clone()?;
        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::failure(id, err),
        })
    }

    fn spawn_repo_call(self: &Arc<Self>, request: JsonRpcRequest) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let action = request.method[REPO_PREFIX.len()..].to_string();
            let result = match request.params {
                Value::Object(mut params) => {
                    params.insert("action".to_string(), Value::String(action));
                    Ok(Value::Object(params))
                }
                Value::Null => Ok(serde_json::json!({ "action": action })),
                _ => Err(RpcError::new(ErrorCode::InvalidParams, "params must be an object")),
            };
            let key = request.id.as_ref().map(id_key);
            let result = match result {
                Ok(args) => {
                    let token = CancelToken::new();
                    if let Some(key) = key.as_ref() {
                        server.inflight.insert(key.clone(), token.clone());
                    }
                    let outcome = server.app.repos.handle_action(args, Some(token)).await;
                    if let Some(key) = key.as_ref() {
                        server.inflight.remove(key);
                    }
                    outcome
                }
                Err(err) => Err(err),
            };
            if let Some(id) = request.id {
                server.send(&match result {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(err) => JsonRpcResponse::failure(id, err),
                });
            }
        })
    }

    /// Reads requests until EOF or `shutdown`, then cancels whatever is
    /// still running and waits for it.
    pub async fn serve<R>(self: &Arc<Self>, reader: R) -> Result<(), ToolError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            tasks.retain(|task| !task.is_finished());

            let parsed: Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(_) => {
                    self.send(&JsonRpcResponse::failure(
                        Value::Null,
                        RpcError::new(ErrorCode::ParseError, "Parse error"),
                    ));
                    continue;
                }
            };
            let request: JsonRpcRequest = match serde_json::from_value(parsed) {
                Ok(request) => request,
                Err(_) => {
                    self.send(&JsonRpcResponse::failure(
                        Value::Null,
                        RpcError::new(ErrorCode::InvalidRequest, "Invalid request"),
                    ));
                    continue;
                }
            };
            if request.jsonrpc != JSONRPC_VERSION {
                if let Some(id) = request.id.clone() {
                    self.send(&JsonRpcResponse::failure(
                        id,
                        RpcError::new(ErrorCode::InvalidRequest, "jsonrpc must be \"2.0\""),
                    ));
                }
                continue;
            }

            if request.method == "shutdown" {
                if let Some(id) = request.id.clone() {
                    self.send(&JsonRpcResponse::success(id, serde_json::json!({})));
                }
                break;
            }
            if request.method.starts_with(REPO_PREFIX) {
                self.logger.debug(
                    "request",
                    Some(&serde_json::json!({ "method": request.method, "id": request.id })),
                );
                tasks.push(self.spawn_repo_call(request));
                continue;
            }
            if let Some(response) = self.dispatch(&request) {
                self.send(&response);
            }
        }

        for entry in self.inflight.iter() {
            entry.value().cancel();
        }
        for result in futures::future::join_all(tasks).await {
            if let Err(err) = result {
                self.logger.error(
                    "request task failed",
                    Some(&serde_json::json!({ "error": err.to_string() })),
                );
            }
        }
        Ok(())
    }
}

pub async fn run_stdio(config: Config, logger: Logger) -> Result<(), ToolError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let operator = RpcOperator::new(&logger, tx.clone());
    let app = Arc::new(App::initialize(config, logger.clone(), Arc::new(operator.clone()))?);

    let writer = tokio::spawn(async move {
        let mut out = BufWriter::new(tokio::io::stdout());
        while let Some(line) = rx.recv().await {
            if out.write_all(line.as_bytes()).await.is_err()
                || out.write_all(b"\n").await.is_err()
                || out.flush().await.is_err()
            {
                break;
            }
        }
    });

    let server = Arc::new(RpcServer::new(app, operator, tx));
    let result = server.serve(BufReader::new(tokio::io::stdin())).await;
    drop(server);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        logger.warn("output writer did not drain", None);
    }
    result
}

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::{ClassifiedError, ToolError, ToolErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    OperationFailed = -32000,
    RequestTimeout = -32001,
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }
}

impl From<ClassifiedError> for RpcError {
    fn from(err: ClassifiedError) -> Self {
        let code = match err.code {
            super::GitErrorCode::Timeout => ErrorCode::RequestTimeout,
            _ => ErrorCode::OperationFailed,
        };
        Self {
            code,
            message: err.summary.clone(),
            data: serde_json::to_value(&err).ok(),
        }
    }
}

/// Bad parameters are a protocol problem; everything else is an operation
/// failure and goes through the classifier.
impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        match err.kind {
            ToolErrorKind::InvalidParams => {
                RpcError::new(ErrorCode::InvalidParams, err.message.clone()).with_data(err.details)
            }
            _ => RpcError::from(ClassifiedError::from(err)),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RpcError {}

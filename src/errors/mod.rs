mod classify;
mod rpc_error;
mod tool_error;

pub use classify::{classify, clean_error_text, ClassifiedError, GitErrorCode};
pub use rpc_error::{ErrorCode, RpcError};
pub use tool_error::{ToolError, ToolErrorKind};

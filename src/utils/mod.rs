pub mod args;
pub mod cancel;
pub mod feature_flags;
pub mod fs_atomic;
pub mod git_url;
pub mod paths;
pub mod redact;
pub mod text;
pub mod tool_errors;

pub mod operator;
pub mod protocol;
pub mod server;

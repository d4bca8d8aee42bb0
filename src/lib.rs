pub mod app;
pub mod config;
pub mod constants;
pub mod errors;
pub mod managers;
pub mod parsers;
pub mod rpc;
pub mod services;
pub mod utils;

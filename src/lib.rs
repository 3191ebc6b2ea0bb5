pub mod cache;
pub mod config;
pub mod expr;
pub mod fetch;
pub mod plugins;
pub mod rpc;
pub mod session;
pub mod supervisor;
pub mod worker;

pub mod auth;
pub mod bulk;
pub mod call;
pub mod config_cmd;
pub mod connection;
pub mod fetch;
pub mod output;
pub mod webhook;

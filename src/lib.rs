pub mod call_log;
pub mod cloud_provider;
pub mod connection;
pub mod engine;
pub mod errors;
pub mod iid;
pub mod logger;
pub mod reconciler;
pub mod resources;
pub mod transaction;

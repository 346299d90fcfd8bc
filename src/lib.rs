pub mod config;
pub mod dedup;
pub mod directory;
pub mod error;
pub mod evaluator;
pub mod gateway;
pub mod leave;
pub mod notify;
pub mod pages;
pub mod policy;
pub mod request;
pub mod service;
pub mod store;
pub mod utils;
pub mod witness_set;

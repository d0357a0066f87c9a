pub mod config;
pub mod guardrails;
pub mod invoker;
pub mod tools;
pub mod transport;

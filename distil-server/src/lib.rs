//! distil-server - solution orchestration for the model workbench
//!
//! Hosts the HTTP/websocket surface, the storage gateways and the solution
//! request engine that drives the external model-discovery runtime.

pub mod api;
pub mod compute;
pub mod config;
pub mod runtime;
pub mod storage;

pub use config::Config;
pub use runtime::Runtime;

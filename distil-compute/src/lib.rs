//! Compute-runtime integration for distil
//!
//! Everything that talks to, or describes work for, the external
//! model-discovery runtime: the wire message types, the transport
//! abstraction, the streaming client with its bounded pull loop, the
//! pipeline description builder, and the produced-result CSV parser.

pub mod api;
pub mod client;
pub mod description;
pub mod result;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use transport::ComputeTransport;

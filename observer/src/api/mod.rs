//! REST API Server Module
//!
//! Read-only HTTP surface of the observer: liveness, Prometheus metrics, the
//! keys and chains this node serves, and the state of in-flight outbounds.

mod generic;

pub use generic::{ApiContext, ApiResponse, ApiServer, OutboundStatus, StatusReport};

//! REST API Server Module
//!
//! HTTP surface of the crosschain node: queries over the replicated state
//! and submission of observer and admin messages.
//!
//! ## Security Model
//!
//! The API performs no authorization of its own. Every submitted message is
//! checked by the keeper against the observer set, node accounts and admin.

// Generic shared code (responses, error mapping, server, submission)
mod generic;

// Read-only query handlers
mod query;

pub use generic::ApiServer;
#[allow(unused_imports)]
pub use generic::{status_for_error, ApiResponse};

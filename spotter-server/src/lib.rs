//! spotter-server: HTTP surface for the detection service
//!
//! `http` holds the router and handlers, `static_files` the embedded
//! front-end and artifact serving, `startup` the composition root that
//! wires configuration, the model loader and the prediction pipeline.

pub mod http;
pub mod startup;
pub mod static_files;

pub use http::{create_router, ApiError, ApiState};

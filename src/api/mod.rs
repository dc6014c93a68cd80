//! HTTP API
//!
//! JSON endpoints over the game engine. Every response carries an
//! `x-request-id` header; errors use a `{request_id, error}` envelope.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::ApiServer;

//! HTTP middleware for the operator API.
pub mod auth;

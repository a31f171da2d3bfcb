//! upload-relay: accepts file uploads over HTTP, validates them and forwards
//! them to an object-storage bucket.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

//! `orgsecrets` HTTP server.
//!
//! Wires the core services to PostgreSQL registries and a value store
//! backend, and serves the JSON API under `/v1`.

pub mod auth;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod repository;
pub mod routes;
pub mod state;

//! Core library for `orgsecrets`.
//!
//! Contains the token and credential logic, the quota ledger contract, the
//! secret catalog contract, the secret lifecycle coordinator, and the
//! reconciler. Registry traits are implemented in memory here and against
//! PostgreSQL in `orgsecrets-server`. This crate depends on
//! `orgsecrets-storage` for the value store trait and knows nothing about
//! HTTP.

pub mod accounts;
pub mod auth;
pub mod catalog;
pub mod coordinator;
pub mod credentials;
pub mod deadline;
pub mod error;
pub mod memory;
pub mod models;
pub mod quota;
pub mod reconcile;
pub mod token;

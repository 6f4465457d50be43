//! # fieldops-rs
//!
//! Postgres-backed routing and lifecycle engine for field-service work
//! orders.
//!
//! Jobs move between organizational groups through per-group assignment
//! records: exactly one assignment is active and exactly one is the home
//! assignment at any time. Transfers reuse previously visited groups'
//! rows, closes cascade to every sibling assignment, and returns or
//! duplicate flags open exception records routed to the home group's
//! inspectors. Every transition appends an audit row and fans out
//! persisted notifications with best-effort push delivery.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod push;
pub mod telemetry;

//! # Invoice Harvest Core
//!
//! Shared logic for Invoice Harvest: the registry data model, operation
//! audit records, and the storage abstraction used by the fetch pipeline.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! application crate supplies the SQLite store, the Registry API client,
//! and the package parser.

pub mod models;
pub mod store;

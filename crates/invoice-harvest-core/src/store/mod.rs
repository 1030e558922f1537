//! Storage abstraction for Invoice Harvest.
//!
//! The [`Store`] trait defines every persistence operation the fetch
//! pipeline needs: tenant configurations, the per-configuration fetch
//! guard, operation audit records, the invoice registry, and canonical
//! invoices. Backends: SQLite (application crate) and [`memory::InMemoryStore`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CanonicalInvoice, InvoiceRegistryEntry, Operation, TenantConfig};

/// Abstract storage backend for Invoice Harvest.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_tenant_config`](Store::save_tenant_config) | Insert or replace a tenant configuration |
/// | [`try_begin_fetch`](Store::try_begin_fetch) | Check-and-set the single-flight guard |
/// | [`insert_operation`](Store::insert_operation) | Create an audit record |
/// | [`find_registry_by_reference`](Store::find_registry_by_reference) | Primary dedup lookup |
/// | [`find_registry_by_hash`](Store::find_registry_by_hash) | Secondary dedup lookup |
/// | [`insert_registry_entry`](Store::insert_registry_entry) | New registry row; fails on either unique key |
/// | [`mark_registry_error`](Store::mark_registry_error) | Entry whose invoice could not be stored |
/// | [`insert_canonical_invoice`](Store::insert_canonical_invoice) | Materialized invoice |
#[async_trait]
pub trait Store: Send + Sync {
    // ── Tenant configurations ──────────────────────────────────────────

    /// Insert or replace a configuration, keyed by `config.id`.
    async fn save_tenant_config(&self, config: &TenantConfig) -> Result<()>;

    async fn get_tenant_config(&self, id: &str) -> Result<Option<TenantConfig>>;

    async fn list_tenant_configs(&self) -> Result<Vec<TenantConfig>>;

    async fn set_last_fetch_at(&self, config_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Mark a fetch as running for `config_id`.
    ///
    /// Returns `false` when another run holds the guard and started at or
    /// after `stale_before`. A guard older than `stale_before` is taken over.
    async fn try_begin_fetch(
        &self,
        config_id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Release the guard taken by [`try_begin_fetch`](Store::try_begin_fetch).
    async fn end_fetch(&self, config_id: &str) -> Result<()>;

    // ── Operations ─────────────────────────────────────────────────────

    async fn insert_operation(&self, op: &Operation) -> Result<()>;

    /// Overwrite every mutable column of an existing operation.
    async fn update_operation(&self, op: &Operation) -> Result<()>;

    async fn get_operation(&self, id: &str) -> Result<Option<Operation>>;

    /// Newest first, optionally scoped to a tenant.
    async fn list_operations(&self, tenant_id: Option<&str>, limit: i64)
        -> Result<Vec<Operation>>;

    // ── Registry ───────────────────────────────────────────────────────

    async fn find_registry_by_reference(
        &self,
        tenant_id: &str,
        reference_number: &str,
    ) -> Result<Option<InvoiceRegistryEntry>>;

    async fn find_registry_by_hash(
        &self,
        tenant_id: &str,
        content_hash: &str,
    ) -> Result<Option<InvoiceRegistryEntry>>;

    /// Insert a new entry. Fails if either per-tenant unique key exists.
    async fn insert_registry_entry(&self, entry: &InvoiceRegistryEntry) -> Result<()>;

    /// Set status `processed` and link the canonical invoice.
    async fn mark_registry_processed(&self, entry_id: &str, canonical_id: &str) -> Result<()>;

    /// Set status `error`; the entry keeps no canonical invoice link.
    async fn mark_registry_error(&self, entry_id: &str) -> Result<()>;

    async fn list_registry_entries(
        &self,
        tenant_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<InvoiceRegistryEntry>>;

    // ── Canonical invoices ─────────────────────────────────────────────

    /// Insert, replacing any invoice already stored for the same registry entry.
    async fn insert_canonical_invoice(&self, invoice: &CanonicalInvoice) -> Result<()>;

    async fn get_canonical_invoice(&self, id: &str) -> Result<Option<CanonicalInvoice>>;
}

//! In-memory [`Store`] implementation for testing and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Registry uniqueness is enforced the same way the SQLite schema does it.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    CanonicalInvoice, InvoiceRegistryEntry, Operation, RegistryStatus, TenantConfig,
};

use super::Store;

/// In-memory store for tests and single-process use.
pub struct InMemoryStore {
    configs: RwLock<HashMap<String, TenantConfig>>,
    running: RwLock<HashMap<String, DateTime<Utc>>>,
    operations: RwLock<Vec<Operation>>,
    registry: RwLock<Vec<InvoiceRegistryEntry>>,
    invoices: RwLock<HashMap<String, CanonicalInvoice>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            running: RwLock::new(HashMap::new()),
            operations: RwLock::new(Vec::new()),
            registry: RwLock::new(Vec::new()),
            invoices: RwLock::new(HashMap::new()),
        }
    }

    /// Number of registry rows across all tenants.
    pub fn registry_len(&self) -> usize {
        self.registry.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Number of canonical invoices across all tenants.
    pub fn canonical_len(&self) -> usize {
        self.invoices.read().map(|i| i.len()).unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_tenant_config(&self, config: &TenantConfig) -> Result<()> {
        write(&self.configs)?.insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn get_tenant_config(&self, id: &str) -> Result<Option<TenantConfig>> {
        Ok(read(&self.configs)?.get(id).cloned())
    }

    async fn list_tenant_configs(&self) -> Result<Vec<TenantConfig>> {
        let mut configs: Vec<TenantConfig> = read(&self.configs)?.values().cloned().collect();
        configs.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id).then(a.id.cmp(&b.id)));
        Ok(configs)
    }

    async fn set_last_fetch_at(&self, config_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut configs = write(&self.configs)?;
        match configs.get_mut(config_id) {
            Some(cfg) => {
                cfg.last_fetch_at = Some(at);
                Ok(())
            }
            None => bail!("tenant config not found: {}", config_id),
        }
    }

    async fn try_begin_fetch(
        &self,
        config_id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut running = write(&self.running)?;
        match running.get(config_id) {
            Some(started) if *started >= stale_before => Ok(false),
            _ => {
                running.insert(config_id.to_string(), now);
                Ok(true)
            }
        }
    }

    async fn end_fetch(&self, config_id: &str) -> Result<()> {
        write(&self.running)?.remove(config_id);
        Ok(())
    }

    async fn insert_operation(&self, op: &Operation) -> Result<()> {
        let mut ops = write(&self.operations)?;
        if ops.iter().any(|o| o.id == op.id) {
            bail!("operation already exists: {}", op.id);
        }
        ops.push(op.clone());
        Ok(())
    }

    async fn update_operation(&self, op: &Operation) -> Result<()> {
        let mut ops = write(&self.operations)?;
        match ops.iter_mut().find(|o| o.id == op.id) {
            Some(existing) => {
                *existing = op.clone();
                Ok(())
            }
            None => bail!("operation not found: {}", op.id),
        }
    }

    async fn get_operation(&self, id: &str) -> Result<Option<Operation>> {
        Ok(read(&self.operations)?.iter().find(|o| o.id == id).cloned())
    }

    async fn list_operations(
        &self,
        tenant_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Operation>> {
        let ops = read(&self.operations)?;
        let mut out: Vec<Operation> = ops
            .iter()
            .filter(|o| tenant_id.map_or(true, |t| o.tenant_id == t))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn find_registry_by_reference(
        &self,
        tenant_id: &str,
        reference_number: &str,
    ) -> Result<Option<InvoiceRegistryEntry>> {
        Ok(read(&self.registry)?
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.external_reference_number == reference_number)
            .cloned())
    }

    async fn find_registry_by_hash(
        &self,
        tenant_id: &str,
        content_hash: &str,
    ) -> Result<Option<InvoiceRegistryEntry>> {
        Ok(read(&self.registry)?
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.content_hash == content_hash)
            .cloned())
    }

    async fn insert_registry_entry(&self, entry: &InvoiceRegistryEntry) -> Result<()> {
        let mut registry = write(&self.registry)?;
        let clash = registry.iter().any(|e| {
            e.tenant_id == entry.tenant_id
                && (e.external_reference_number == entry.external_reference_number
                    || e.content_hash == entry.content_hash)
        });
        if clash {
            bail!(
                "registry entry already exists for tenant {} (reference {})",
                entry.tenant_id,
                entry.external_reference_number
            );
        }
        registry.push(entry.clone());
        Ok(())
    }

    async fn mark_registry_processed(&self, entry_id: &str, canonical_id: &str) -> Result<()> {
        let mut registry = write(&self.registry)?;
        match registry.iter_mut().find(|e| e.id == entry_id) {
            Some(entry) => {
                entry.status = RegistryStatus::Processed;
                entry.canonical_invoice_id = Some(canonical_id.to_string());
                entry.last_updated_at = Utc::now();
                Ok(())
            }
            None => bail!("registry entry not found: {}", entry_id),
        }
    }

    async fn mark_registry_error(&self, entry_id: &str) -> Result<()> {
        let mut registry = write(&self.registry)?;
        match registry.iter_mut().find(|e| e.id == entry_id) {
            Some(entry) => {
                entry.status = RegistryStatus::Error;
                entry.canonical_invoice_id = None;
                entry.last_updated_at = Utc::now();
                Ok(())
            }
            None => bail!("registry entry not found: {}", entry_id),
        }
    }

    async fn list_registry_entries(
        &self,
        tenant_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<InvoiceRegistryEntry>> {
        let registry = read(&self.registry)?;
        let mut out: Vec<InvoiceRegistryEntry> = registry
            .iter()
            .filter(|e| tenant_id.map_or(true, |t| e.tenant_id == t))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.first_seen_at.cmp(&a.first_seen_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn insert_canonical_invoice(&self, invoice: &CanonicalInvoice) -> Result<()> {
        let mut invoices = write(&self.invoices)?;
        invoices.retain(|_, i| i.registry_entry_id != invoice.registry_entry_id);
        invoices.insert(invoice.id.clone(), invoice.clone());
        Ok(())
    }

    async fn get_canonical_invoice(&self, id: &str) -> Result<Option<CanonicalInvoice>> {
        Ok(read(&self.invoices)?.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Environment, InvoiceDocument, SchemaVariant};

    fn document(reference: &str, hash: &str) -> InvoiceDocument {
        InvoiceDocument {
            reference_number: reference.to_string(),
            variant: SchemaVariant::V1,
            invoice_number: "FV/1/2024".to_string(),
            issue_date: None,
            seller_tax_id: "5811870973".to_string(),
            seller_name: "Seller".to_string(),
            buyer_tax_id: None,
            buyer_name: None,
            net_amount_minor: None,
            total_amount_minor: 12300,
            currency: "PLN".to_string(),
            content_hash: hash.to_string(),
            raw_xml: "<Faktura/>".to_string(),
        }
    }

    #[tokio::test]
    async fn registry_rejects_either_key_collision() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_registry_entry(&document("AAA-111", "h1").to_registry_entry("acme", now))
            .await
            .unwrap();

        let same_ref = document("AAA-111", "h2").to_registry_entry("acme", now);
        assert!(store.insert_registry_entry(&same_ref).await.is_err());

        let same_hash = document("BBB-222", "h1").to_registry_entry("acme", now);
        assert!(store.insert_registry_entry(&same_hash).await.is_err());

        let other_tenant = document("AAA-111", "h1").to_registry_entry("globex", now);
        assert!(store.insert_registry_entry(&other_tenant).await.is_ok());
        assert_eq!(store.registry_len(), 2);
    }

    #[tokio::test]
    async fn fetch_guard_is_single_flight_until_stale() {
        let store = InMemoryStore::new();
        let t0 = Utc::now();
        let stale_before = t0 - chrono::Duration::hours(1);

        assert!(store.try_begin_fetch("cfg", t0, stale_before).await.unwrap());
        assert!(!store.try_begin_fetch("cfg", t0, stale_before).await.unwrap());

        // A guard taken before the staleness cutoff is considered abandoned.
        let later = t0 + chrono::Duration::hours(2);
        assert!(store
            .try_begin_fetch("cfg", later, later - chrono::Duration::hours(1))
            .await
            .unwrap());

        store.end_fetch("cfg").await.unwrap();
        assert!(store.try_begin_fetch("cfg", later, stale_before).await.unwrap());
    }

    #[tokio::test]
    async fn last_fetch_at_requires_existing_config() {
        let store = InMemoryStore::new();
        let cfg = TenantConfig::new(
            "acme",
            Environment::Test,
            "5811870973".parse().unwrap(),
            "ct".to_string(),
        );
        assert!(store.set_last_fetch_at(&cfg.id, Utc::now()).await.is_err());
        store.save_tenant_config(&cfg).await.unwrap();
        store.set_last_fetch_at(&cfg.id, Utc::now()).await.unwrap();
        let loaded = store.get_tenant_config(&cfg.id).await.unwrap().unwrap();
        assert!(loaded.last_fetch_at.is_some());
    }

    #[tokio::test]
    async fn error_entry_can_be_materialized_later() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let doc = document("AAA-111", "h1");
        let entry = doc.to_registry_entry("acme", now);
        store.insert_registry_entry(&entry).await.unwrap();

        store.mark_registry_error(&entry.id).await.unwrap();
        let loaded = store
            .find_registry_by_reference("acme", "AAA-111")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, RegistryStatus::Error);

        // Re-inserting for the same entry keeps a single canonical invoice.
        store
            .insert_canonical_invoice(&doc.to_canonical("acme", &entry.id, now))
            .await
            .unwrap();
        let invoice = doc.to_canonical("acme", &entry.id, now);
        store.insert_canonical_invoice(&invoice).await.unwrap();
        assert_eq!(store.canonical_len(), 1);

        store.mark_registry_processed(&entry.id, &invoice.id).await.unwrap();
        assert!(store.mark_registry_error("missing").await.is_err());
    }
}

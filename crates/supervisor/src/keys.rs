//! Bridges the transport's key-provider seam onto the credential store.
//!
//! One provider per tenant; the transport never sees tenant ids, so the
//! adapter carries its own and scopes every store call with it.

use std::collections::HashMap;

use async_trait::async_trait;

use courier_store::CredentialStore;
use courier_transport::{BoxError, KeyEntry, KeyProvider};

pub struct TenantKeyProvider {
    tenant: String,
    store: CredentialStore,
}

impl TenantKeyProvider {
    pub fn new(tenant: String, store: CredentialStore) -> Self {
        Self { tenant, store }
    }
}

// Store calls are short single-row statements on a local SQLite file,
// so they run inline rather than on the blocking pool.
#[async_trait]
impl KeyProvider for TenantKeyProvider {
    async fn get(
        &self,
        key_type: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, BoxError> {
        Ok(self.store.keys(&self.tenant, key_type, ids)?)
    }

    async fn set(&self, entries: &[KeyEntry]) -> Result<(), BoxError> {
        let rows: Vec<(String, String, Vec<u8>)> = entries
            .iter()
            .map(|e| (e.key_type.clone(), e.id.clone(), e.value.clone()))
            .collect();
        self.store.set_keys(&self.tenant, &rows)?;
        tracing::debug!(tenant = %self.tenant, entries = rows.len(), "key material persisted");
        Ok(())
    }

    async fn save_credentials(&self, blob: &[u8]) -> Result<(), BoxError> {
        self.store.set_credentials(&self.tenant, blob)?;
        Ok(())
    }
}

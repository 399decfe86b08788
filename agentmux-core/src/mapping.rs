//! In-memory fingerprint→backend mapping with cached public keys.
//!
//! Mirrors the `keyMappings` list of the persisted configuration.  The
//! cached blobs let the router serve a merged identity listing at startup
//! without opening any backend pipe (which could trigger an unlock prompt).

use std::collections::HashMap;

use base64::prelude::{Engine as _, BASE64_STANDARD};

use crate::config::KeyMappingEntry;
use crate::Identity;

/// One in-memory mapping record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapping {
    pub fingerprint: String,
    pub key_blob: Option<Vec<u8>>,
    pub comment: Option<String>,
    pub backend: String,
}

/// Ordered fingerprint→backend store.
///
/// Insertion order is preserved so the persisted `keyMappings` list (and
/// the identity listing seeded from it) stays stable across runs.
#[derive(Debug, Default)]
pub struct MappingStore {
    order: Vec<String>,
    entries: HashMap<String, KeyMapping>,
}

impl MappingStore {
    /// Rebuild the store from persisted records.
    ///
    /// Returns the store plus the identities recoverable from cached
    /// blobs, in record order.  Records whose blob fails base64 decoding
    /// are kept as mappings but dropped from the identity seed.
    pub fn from_entries(records: &[KeyMappingEntry]) -> (Self, Vec<Identity>) {
        let mut store = Self::default();
        let mut cached = Vec::new();

        for record in records {
            let blob = match &record.key_blob {
                Some(b64) => match BASE64_STANDARD.decode(b64) {
                    Ok(blob) => Some(blob),
                    Err(_) => {
                        tracing::debug!(
                            fingerprint = %record.fingerprint,
                            "dropping cached key blob with invalid base64"
                        );
                        None
                    }
                },
                None => None,
            };

            if let Some(blob) = &blob {
                cached.push(Identity::new(
                    blob.clone(),
                    record.comment.clone().unwrap_or_default(),
                ));
            }

            store.insert(KeyMapping {
                fingerprint: record.fingerprint.clone(),
                key_blob: blob,
                comment: record.comment.clone(),
                backend: record.agent.clone(),
            });
        }

        (store, cached)
    }

    fn insert(&mut self, mapping: KeyMapping) {
        if !self.entries.contains_key(&mapping.fingerprint) {
            self.order.push(mapping.fingerprint.clone());
        }
        self.entries.insert(mapping.fingerprint.clone(), mapping);
    }

    /// The backend a fingerprint is mapped to, if any.
    pub fn get(&self, fingerprint: &str) -> Option<&str> {
        self.entries
            .get(fingerprint)
            .map(|mapping| mapping.backend.as_str())
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Record that `fingerprint` belongs to `backend`, caching the blob and
    /// comment when given.
    ///
    /// Returns `true` if the store changed and must be persisted.  When the
    /// existing record already names the same backend *and* already carries
    /// a cached blob, the call short-circuits.
    pub fn put(
        &mut self,
        fingerprint: &str,
        backend: &str,
        key_blob: Option<&[u8]>,
        comment: Option<&str>,
    ) -> bool {
        if let Some(existing) = self.entries.get_mut(fingerprint) {
            if existing.backend == backend && existing.key_blob.is_some() {
                return false;
            }
            existing.backend = backend.to_string();
            if let Some(blob) = key_blob {
                existing.key_blob = Some(blob.to_vec());
            }
            if let Some(comment) = comment {
                existing.comment = Some(comment.to_string());
            }
            return true;
        }

        self.insert(KeyMapping {
            fingerprint: fingerprint.to_string(),
            key_blob: key_blob.map(<[u8]>::to_vec),
            comment: comment.map(str::to_string),
            backend: backend.to_string(),
        });
        true
    }

    /// Serialize back into persisted records, in insertion order.
    pub fn to_entries(&self) -> Vec<KeyMappingEntry> {
        self.order
            .iter()
            .filter_map(|fp| self.entries.get(fp))
            .map(|mapping| KeyMappingEntry {
                fingerprint: mapping.fingerprint.clone(),
                key_blob: mapping
                    .key_blob
                    .as_deref()
                    .map(|blob| BASE64_STANDARD.encode(blob)),
                comment: mapping.comment.clone(),
                agent: mapping.backend.clone(),
            })
            .collect()
    }

    /// Number of distinct backends referenced by the stored mappings.
    pub fn distinct_backends(&self) -> usize {
        let mut names: Vec<&str> = self
            .entries
            .values()
            .map(|mapping| mapping.backend.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

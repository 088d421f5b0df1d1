//! On-disk cache of derived tables.
//!
//! Table derivation costs 1023 sorts per password; a server reloading with
//! many tenant passwords pays that on every start. The cache persists the
//! encode permutation per password as a versioned JSON document. Entries that
//! fail to decode, or a file with an unknown version, are ignored rather than
//! treated as errors; entries are never deleted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptTable, TABLE_SIZE};

/// Current cache file format version.
const CACHE_VERSION: u32 = 1;

/// Serialized cache document.
#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    /// password -> base64-encoded 256-byte encode permutation
    tables: HashMap<String, String>,
}

/// Password-to-table cache backed by a file.
pub struct TableCache {
    path: PathBuf,
    tables: HashMap<String, String>,
    dirty: bool,
}

impl TableCache {
    /// Open the cache at `path`.
    ///
    /// A missing, unreadable, or unparseable file yields an empty cache; the
    /// cache must never stop the server from starting.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let tables = match Self::read_file(&path) {
            Some(doc) if doc.version == CACHE_VERSION => doc.tables,
            Some(doc) => {
                tracing::warn!(
                    "ignoring table cache {} with unknown version {}",
                    path.display(),
                    doc.version
                );
                HashMap::new()
            }
            None => HashMap::new(),
        };
        Self {
            path,
            tables,
            dirty: false,
        }
    }

    fn read_file(path: &Path) -> Option<CacheFile> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!("ignoring unreadable table cache {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Look up a cached table, validating the stored permutation.
    pub fn get(&self, password: &str) -> Option<EncryptTable> {
        let raw = self.tables.get(password)?;
        let bytes = STANDARD.decode(raw).ok()?;
        let encode: [u8; TABLE_SIZE] = bytes.try_into().ok()?;
        EncryptTable::from_encode(encode)
    }

    /// Fetch the table for `password`, deriving and recording it on a miss.
    pub fn get_or_insert(&mut self, password: &str) -> Arc<EncryptTable> {
        if let Some(table) = self.get(password) {
            tracing::debug!("table cache hit");
            return Arc::new(table);
        }
        let table = Arc::new(EncryptTable::new(password));
        self.tables.insert(
            password.to_string(),
            STANDARD.encode(table.encode_table()),
        );
        self.dirty = true;
        table
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Persist the cache if it gained entries since the last flush.
    ///
    /// Writes a sibling temp file and renames it over the target so a crash
    /// mid-write cannot leave a truncated cache.
    pub fn flush(&mut self) -> std::io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let doc = CacheFile {
            version: CACHE_VERSION,
            tables: self.tables.clone(),
        };
        let content = serde_json::to_string(&doc).expect("cache document serializes");
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

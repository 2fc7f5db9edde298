use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::compile::CompileResult;

#[derive(Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub result: CompileResult,
}

pub struct IncrementalCache {
    cache_dir: PathBuf,
}

impl IncrementalCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        if !cache_dir.exists() {
            if let Err(e) = fs::create_dir_all(&cache_dir) {
                warn!(dir = %cache_dir.display(), error = %e, "cannot create cache directory");
            }
        }
        Self { cache_dir }
    }

    /// Hash over the options fingerprint and every `(path, text)` in order.
    pub fn compute_hash(fingerprint: &str, sources: &[(String, String)]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.as_bytes());
        for (path, text) in sources {
            // length prefixes keep ("ab", "c") distinct from ("a", "bc")
            hasher.update((path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            hasher.update((text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    fn get_cache_path(&self, key: &str) -> PathBuf {
        let safe_name = key.replace(['/', '\\', ':'], "_");
        self.cache_dir.join(format!("{}.json", safe_name))
    }

    pub fn get(&self, key: &str, hash: &str) -> Option<CompileResult> {
        let cache_path = self.get_cache_path(key);
        let data = fs::read_to_string(&cache_path).ok()?;

        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(e) => e,
            Err(e) => {
                warn!(project = key, error = %e, "discarding corrupt cache entry");
                fs::remove_file(cache_path).ok();
                return None;
            }
        };

        if entry.hash == hash {
            debug!(project = key, "cache hit");
            Some(entry.result)
        } else {
            None
        }
    }

    pub fn set(&self, key: &str, hash: &str, result: &CompileResult) {
        let cache_path = self.get_cache_path(key);
        let entry = CacheEntry {
            hash: hash.to_string(),
            result: result.clone(),
        };

        match serde_json::to_string(&entry) {
            Ok(data) => {
                if let Err(e) = fs::write(&cache_path, data) {
                    warn!(project = key, error = %e, "cannot write cache entry");
                }
            }
            Err(e) => warn!(project = key, error = %e, "cannot serialize cache entry"),
        }
    }
}

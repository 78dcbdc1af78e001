//! Caller-owned table cache
//!
//! Loaded tables are cached per (table, evaluation, fingerprint). The
//! fingerprint hashes everything that shapes the loaded rows: projected
//! columns, key filter and normalized domain text. A cache is bound to one
//! evaluation at a time; binding another drops everything loaded for the
//! previous one.

use std::hash::{Hash, Hasher};

use arrow::record_batch::RecordBatch;
use rustc_hash::{FxHashMap, FxHasher};

use crate::error::Result;
use crate::filter::{BatchFilter, CompiledDomain};
use crate::storage::{ScanRequest, TableSource};

/// Cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub table: String,
    pub evalid: i64,
    pub fingerprint: u64,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
}

/// Tables loaded for one evaluation
#[derive(Debug, Default)]
pub struct TableCache {
    entries: FxHashMap<CacheKey, Vec<RecordBatch>>,
    bound: Option<i64>,
    stats: CacheStats,
}

/// Fingerprint of a scan request plus any domain text applied after loading
#[must_use]
pub fn fingerprint(request: &ScanRequest, domain_text: &str) -> u64 {
    let mut hasher = FxHasher::default();
    request.hash(&mut hasher);
    domain_text.hash(&mut hasher);
    hasher.finish()
}

impl TableCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the cache to an evaluation, evicting entries of any other
    pub fn bind_evaluation(&mut self, evalid: i64) {
        if self.bound == Some(evalid) {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|key, _| key.evalid == evalid);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            log::debug!("Evicted {evicted} cached tables on switching to evaluation {evalid}");
        }
        self.stats.evictions += evicted;
        self.bound = Some(evalid);
    }

    #[must_use]
    pub const fn bound_evaluation(&self) -> Option<i64> {
        self.bound
    }

    #[must_use]
    pub fn get(&mut self, key: &CacheKey) -> Option<Vec<RecordBatch>> {
        match self.entries.get(key) {
            Some(batches) => {
                self.stats.hits += 1;
                Some(batches.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert an entry. An entry for the same table and evaluation under a
    /// different fingerprint is stale and is dropped.
    pub fn insert(&mut self, key: CacheKey, batches: Vec<RecordBatch>) {
        let before = self.entries.len();
        self.entries
            .retain(|k, _| !(k.table == key.table && k.evalid == key.evalid));
        self.stats.evictions += before - self.entries.len();
        self.entries.insert(key, batches);
    }

    /// Return cached batches or scan the source, apply the domain and cache
    /// the result
    pub fn get_or_load(
        &mut self,
        source: &dyn TableSource,
        evalid: i64,
        request: &ScanRequest,
        domain: Option<&CompiledDomain>,
    ) -> Result<Vec<RecordBatch>> {
        self.bind_evaluation(evalid);
        let domain_text = domain.map(CompiledDomain::normalized).unwrap_or_default();
        let key = CacheKey {
            table: request.table.clone(),
            evalid,
            fingerprint: fingerprint(request, &domain_text),
        };
        if let Some(batches) = self.get(&key) {
            log::debug!("Cache hit for table {} (evaluation {evalid})", request.table);
            return Ok(batches);
        }

        let mut batches = source.scan(request)?;
        if let Some(domain) = domain {
            batches = batches
                .iter()
                .map(|batch| domain.filter(batch))
                .filter(|filtered| filtered.as_ref().map_or(true, |b| b.num_rows() > 0))
                .collect::<Result<Vec<_>>>()?;
        }
        self.insert(key, batches.clone());
        Ok(batches)
    }

    #[must_use]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Level;
    use crate::storage::{KeyFilter, MemoryStore};
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn store() -> MemoryStore {
        let schema = Arc::new(Schema::new(vec![Field::new("CN", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![1, 2, 3]))])
                .unwrap();
        let mut store = MemoryStore::new();
        store.insert("PLOT", schema, vec![batch]).unwrap();
        store
    }

    #[test]
    fn hits_after_first_load() {
        let store = store();
        let mut cache = TableCache::new();
        let request = ScanRequest::new("PLOT");
        cache.get_or_load(&store, 101, &request, None).unwrap();
        cache.get_or_load(&store, 101, &request, None).unwrap();
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn new_fingerprint_replaces_stale_entry() {
        let store = store();
        let mut cache = TableCache::new();
        let all = ScanRequest::new("PLOT");
        let some = ScanRequest::new("PLOT").with_key_filter(KeyFilter::new("CN", ["1".to_string()]));
        cache.get_or_load(&store, 101, &all, None).unwrap();
        let rows: usize = cache
            .get_or_load(&store, 101, &some, None)
            .unwrap()
            .iter()
            .map(RecordBatch::num_rows)
            .sum();
        assert_eq!(rows, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn binding_other_evaluation_evicts() {
        let store = store();
        let mut cache = TableCache::new();
        cache.get_or_load(&store, 101, &ScanRequest::new("PLOT"), None).unwrap();
        cache.bind_evaluation(102);
        assert!(cache.is_empty());
        assert_eq!(cache.bound_evaluation(), Some(102));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn domain_is_applied_before_caching() {
        let store = store();
        let mut cache = TableCache::new();
        let schema = store.schema("PLOT").unwrap();
        let domain = CompiledDomain::compile("CN >= 2", Level::Plot, &schema).unwrap();
        let request = ScanRequest::new("PLOT");
        let rows: usize = cache
            .get_or_load(&store, 101, &request, Some(&domain))
            .unwrap()
            .iter()
            .map(RecordBatch::num_rows)
            .sum();
        assert_eq!(rows, 2);
        cache.get_or_load(&store, 101, &request, None).unwrap();
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = ScanRequest::new("T").with_key_filter(KeyFilter::new(
            "CN",
            ["1".to_string(), "2".to_string()],
        ));
        let b = ScanRequest::new("T").with_key_filter(KeyFilter::new(
            "CN",
            ["2".to_string(), "1".to_string()],
        ));
        assert_eq!(fingerprint(&a, "x"), fingerprint(&b, "x"));
        assert_ne!(fingerprint(&a, "x"), fingerprint(&a, "y"));
    }
}

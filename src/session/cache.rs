//! Bond-partitioned page cache.
//!
//! The same login can operate under several bonds (student, teacher) whose
//! portal pages differ for identical URLs, so cached pages must never leak
//! across bonds. The cache keeps one partition per bond-switch URL (plus
//! the no-bond partition), created lazily; switching the active bond only
//! re-points which partition subsequent lookups use.
//!
//! Eviction is explicit: each partition is a size-bounded LRU. A cache hit
//! refreshes the entry; inserts beyond capacity evict the least recently
//! used page of that partition only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tracing::trace;
use url::Url;

use crate::page::Page;

/// Default pages kept per bond partition.
pub const DEFAULT_CACHE_CAPACITY: usize = 200;

/// Size-bounded, bond-partitioned store of fetched pages.
///
/// Owned by one session; two client instances in the same process never
/// share cache state. Interior mutability is a plain mutex — no await
/// point ever occurs while it is held, so concurrent session tasks cannot
/// observe a partition mid-update.
#[derive(Debug)]
pub struct PageCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug)]
struct CacheInner {
    /// Partition key is the bond-switch URL; `None` is the no-bond partition.
    partitions: HashMap<Option<String>, Partition>,
    current: Option<String>,
}

/// One bond's pages, in least-recently-used-first order.
#[derive(Debug, Default)]
struct Partition {
    pages: IndexMap<String, Arc<Page>>,
}

impl PageCache {
    /// Creates a cache whose partitions each hold up to `capacity` pages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                partitions: HashMap::from([(None, Partition::default())]),
                current: None,
            }),
        }
    }

    /// Re-points the active partition at `bond`, creating it on first use.
    /// Other partitions keep their contents.
    pub fn set_current_bond(&self, bond: Option<&Url>) {
        let key = bond.map(|url| url.as_str().to_string());
        let mut inner = self.lock();
        if inner.current != key {
            inner.partitions.entry(key.clone()).or_default();
            inner.current = key;
        }
    }

    /// Looks up a page by request fingerprint in the active partition,
    /// refreshing its recency on a hit.
    #[must_use]
    pub fn get_page(&self, fingerprint: &str) -> Option<Arc<Page>> {
        let mut inner = self.lock();
        let current = inner.current.clone();
        Self::refresh(inner.partitions.get_mut(&current)?, fingerprint)
    }

    /// Stores a page in the active partition, evicting the least recently
    /// used entry once the partition is full.
    pub fn store_page(&self, page: Arc<Page>) {
        let mut inner = self.lock();
        let current = inner.current.clone();
        let partition = inner.partitions.entry(current).or_default();
        Self::insert_bounded(partition, self.capacity, page);
    }

    /// Looks up `fingerprint` in `bond`'s partition directly, ignoring the
    /// active-partition pointer. Request plumbing resolves the bond when
    /// the request is issued and passes it here, so a lookup and a
    /// concurrent bond switch cannot interleave.
    pub(crate) fn lookup(&self, bond: Option<&str>, fingerprint: &str) -> Option<Arc<Page>> {
        let key = bond.map(str::to_string);
        let mut inner = self.lock();
        Self::refresh(inner.partitions.get_mut(&key)?, fingerprint)
    }

    /// Stores `page` in `bond`'s partition directly, creating the
    /// partition on first use.
    pub(crate) fn store(&self, bond: Option<&str>, page: Arc<Page>) {
        let key = bond.map(str::to_string);
        let mut inner = self.lock();
        let partition = inner.partitions.entry(key).or_default();
        Self::insert_bounded(partition, self.capacity, page);
    }

    fn refresh(partition: &mut Partition, fingerprint: &str) -> Option<Arc<Page>> {
        let page = partition.pages.shift_remove(fingerprint)?;
        partition.pages.insert(fingerprint.to_string(), Arc::clone(&page));
        trace!(fingerprint, "page cache hit");
        Some(page)
    }

    fn insert_bounded(partition: &mut Partition, capacity: usize, page: Arc<Page>) {
        let fingerprint = page.fingerprint();
        partition.pages.shift_remove(&fingerprint);
        partition.pages.insert(fingerprint, page);
        if partition.pages.len() > capacity {
            partition.pages.shift_remove_index(0);
        }
    }

    /// Releases every partition and its contents. The active bond is kept,
    /// so subsequent stores land in a fresh partition for the same bond.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let current = inner.current.clone();
        inner.partitions.clear();
        inner.partitions.insert(current, Partition::default());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use reqwest::{Method, StatusCode};

    fn page(url: &str, body: &str) -> Arc<Page> {
        Arc::new(Page::new(
            Url::parse(url).unwrap(),
            Method::GET,
            StatusCode::OK,
            HeaderMap::new(),
            body.to_string(),
            None,
        ))
    }

    fn fingerprint_of(page: &Page) -> String {
        page.fingerprint()
    }

    #[test]
    fn stores_and_returns_pages_by_fingerprint() {
        let cache = PageCache::new(10);
        let page = page("https://sigaa.unb.br/sigaa/a.jsf", "body");
        let key = fingerprint_of(&page);
        cache.store_page(Arc::clone(&page));
        let hit = cache.get_page(&key).unwrap();
        assert_eq!(hit.body(), "body");
        assert!(cache.get_page("GET https://sigaa.unb.br/other").is_none());
    }

    #[test]
    fn bonds_do_not_share_entries() {
        let cache = PageCache::new(10);
        let bond_a = Url::parse("https://sigaa.unb.br/sigaa/escolhaVinculo.do?vinculo=1").unwrap();
        let bond_b = Url::parse("https://sigaa.unb.br/sigaa/escolhaVinculo.do?vinculo=2").unwrap();
        let page = page("https://sigaa.unb.br/sigaa/portal.jsf", "student view");
        let key = fingerprint_of(&page);

        cache.set_current_bond(Some(&bond_a));
        cache.store_page(Arc::clone(&page));
        assert!(cache.get_page(&key).is_some());

        cache.set_current_bond(Some(&bond_b));
        assert!(cache.get_page(&key).is_none(), "bond B must not see bond A's pages");

        // Switching back re-points at the existing partition.
        cache.set_current_bond(Some(&bond_a));
        assert!(cache.get_page(&key).is_some());
    }

    #[test]
    fn no_bond_partition_is_separate_from_bonds() {
        let cache = PageCache::new(10);
        let page = page("https://sigaa.unb.br/sigaa/vinculos.jsf", "bond list");
        let key = fingerprint_of(&page);
        cache.store_page(page);

        let bond = Url::parse("https://sigaa.unb.br/sigaa/escolhaVinculo.do?vinculo=1").unwrap();
        cache.set_current_bond(Some(&bond));
        assert!(cache.get_page(&key).is_none());

        cache.set_current_bond(None);
        assert!(cache.get_page(&key).is_some());
    }

    #[test]
    fn clear_empties_every_partition() {
        let cache = PageCache::new(10);
        let bond = Url::parse("https://sigaa.unb.br/sigaa/escolhaVinculo.do?vinculo=1").unwrap();

        let unbonded = page("https://sigaa.unb.br/sigaa/a.jsf", "x");
        let unbonded_key = fingerprint_of(&unbonded);
        cache.store_page(unbonded);

        cache.set_current_bond(Some(&bond));
        let bonded = page("https://sigaa.unb.br/sigaa/b.jsf", "y");
        let bonded_key = fingerprint_of(&bonded);
        cache.store_page(bonded);

        cache.clear();
        assert!(cache.get_page(&bonded_key).is_none());
        cache.set_current_bond(None);
        assert!(cache.get_page(&unbonded_key).is_none());
    }

    #[test]
    fn evicts_least_recently_used_beyond_capacity() {
        let cache = PageCache::new(2);
        let first = page("https://sigaa.unb.br/1", "1");
        let second = page("https://sigaa.unb.br/2", "2");
        let third = page("https://sigaa.unb.br/3", "3");
        let first_key = fingerprint_of(&first);
        let second_key = fingerprint_of(&second);
        let third_key = fingerprint_of(&third);

        cache.store_page(first);
        cache.store_page(second);
        // Touch the first entry so the second becomes least recently used.
        assert!(cache.get_page(&first_key).is_some());
        cache.store_page(third);

        assert!(cache.get_page(&second_key).is_none(), "LRU entry should be evicted");
        assert!(cache.get_page(&first_key).is_some());
        assert!(cache.get_page(&third_key).is_some());
    }

    #[test]
    fn bond_scoped_lookup_ignores_the_active_pointer() {
        let cache = PageCache::new(10);
        let bond = "https://sigaa.unb.br/sigaa/escolhaVinculo.do?vinculo=7";
        let page = page("https://sigaa.unb.br/sigaa/portal.jsf", "scoped");
        let key = fingerprint_of(&page);

        cache.store(Some(bond), Arc::clone(&page));
        // The active pointer still sits at the no-bond partition.
        assert!(cache.get_page(&key).is_none());
        assert!(cache.lookup(Some(bond), &key).is_some());
        assert!(cache.lookup(None, &key).is_none());
    }

    #[test]
    fn restoring_same_fingerprint_replaces_the_entry() {
        let cache = PageCache::new(2);
        let stale = page("https://sigaa.unb.br/portal.jsf", "stale");
        let fresh = page("https://sigaa.unb.br/portal.jsf", "fresh");
        let key = fingerprint_of(&stale);
        cache.store_page(stale);
        cache.store_page(fresh);
        assert_eq!(cache.get_page(&key).unwrap().body(), "fresh");
    }
}

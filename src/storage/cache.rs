//! Edge Response Cache
//!
//! Per-tag copy of the posts last returned by a storage node, together with
//! the version they were returned under.

use hashbrown::HashMap;

use super::store::StampedValues;
use crate::sync::CountingRwLock;

/// Default reader cap for edge caches
pub const DEFAULT_CACHE_READERS: usize = 10;

#[derive(Debug, Default)]
struct CachedTag {
    version: u64,
    posts: StampedValues,
}

/// Tag -> (version, posts) cache
#[derive(Debug)]
pub struct TagCache {
    tags: CountingRwLock<HashMap<String, CachedTag>>,
}

impl Default for TagCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TagCache {
    pub fn new() -> Self {
        Self::with_max_readers(DEFAULT_CACHE_READERS)
    }

    pub fn with_max_readers(max_readers: usize) -> Self {
        Self {
            tags: CountingRwLock::with_max_readers(HashMap::new(), max_readers),
        }
    }

    /// Cached version of `tag`, or `None` if nothing is cached.
    pub fn version(&self, tag: &str) -> Option<u64> {
        self.tags.read().get(tag).map(|cached| cached.version)
    }

    /// Replace everything cached for `tag`.
    pub fn replace(&self, tag: &str, version: u64, posts: StampedValues) {
        self.tags
            .write()
            .insert(tag.to_string(), CachedTag { version, posts });
    }

    /// Cached posts of `tag` in an order consistent with causality: a post
    /// whose stamp precedes another's is listed first.
    pub fn posts(&self, tag: &str) -> Vec<String> {
        let tags = self.tags.read();
        let Some(cached) = tags.get(tag) else {
            return Vec::new();
        };

        let mut ordered: Vec<(u64, &String)> = cached
            .posts
            .iter()
            .map(|(value, stamp)| (stamp.total(), value))
            .collect();
        ordered.sort();
        ordered.into_iter().map(|(_, value)| value.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tags.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

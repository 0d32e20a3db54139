//! Inbound image store.
//!
//! Images received from the editing host are kept in arrival order under a
//! monotonically increasing sequence key. Keys are never reused, even after
//! eviction, so the newest image is always the one with the largest key.

use crate::codec::ChannelMode;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// An image received from the editing host
#[derive(Debug, Clone)]
pub struct ReceivedImage {
    /// Arrival sequence key (starts at 1)
    pub sequence_key: u64,
    /// Decoded raster, shared with readers
    pub image: Arc<DynamicImage>,
    /// Channel mode detected at decode time
    pub mode: ChannelMode,
    /// Label supplied by the sender (layer name)
    pub label: String,
    pub received_at: DateTime<Utc>,
}

/// Metadata view of a stored image
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub image_id: u64,
    pub layer_name: String,
    pub size: String,
    pub mode: ChannelMode,
    pub timestamp: DateTime<Utc>,
}

impl From<&ReceivedImage> for ImageSummary {
    fn from(entry: &ReceivedImage) -> Self {
        Self {
            image_id: entry.sequence_key,
            layer_name: entry.label.clone(),
            size: format!("{}x{}", entry.image.width(), entry.image.height()),
            mode: entry.mode,
            timestamp: entry.received_at,
        }
    }
}

struct StoreInner {
    entries: BTreeMap<u64, ReceivedImage>,
    last_key: u64,
}

/// Thread-safe store of received images.
///
/// `insert` assigns the key and inserts under one write lock; readers take
/// the read lock. A capacity of `0` keeps every image.
pub struct InboundStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
}

impl InboundStore {
    /// Create a store holding at most `capacity` images (`0` = unbounded)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                entries: BTreeMap::new(),
                last_key: 0,
            }),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Insert a decoded image and return its sequence key
    pub fn insert(&self, image: DynamicImage, label: impl Into<String>) -> u64 {
        let mode = ChannelMode::of(&image);
        let label = label.into();

        let mut inner = self.inner.write();
        inner.last_key += 1;
        let key = inner.last_key;

        inner.entries.insert(
            key,
            ReceivedImage {
                sequence_key: key,
                image: Arc::new(image),
                mode,
                label,
                received_at: Utc::now(),
            },
        );

        if self.capacity > 0 {
            while inner.entries.len() > self.capacity {
                if let Some((evicted, _)) = inner.entries.pop_first() {
                    debug!(image_id = evicted, "Evicted oldest received image");
                }
            }
        }

        key
    }

    /// Entry with the largest sequence key, if any
    pub fn latest(&self) -> Option<ReceivedImage> {
        self.inner
            .read()
            .entries
            .last_key_value()
            .map(|(_, entry)| entry.clone())
    }

    pub fn get(&self, sequence_key: u64) -> Option<ReceivedImage> {
        self.inner.read().entries.get(&sequence_key).cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Metadata for every stored image, oldest first
    pub fn summaries(&self) -> Vec<ImageSummary> {
        self.inner
            .read()
            .entries
            .values()
            .map(ImageSummary::from)
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InboundStore {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_support::{solid_rgb, solid_rgba};
    use std::thread;

    #[test]
    fn test_empty_store() {
        let store = InboundStore::unbounded();
        assert!(store.latest().is_none());
        assert_eq!(store.count(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_keys_start_at_one_and_increase() {
        let store = InboundStore::unbounded();
        assert_eq!(store.insert(solid_rgb(1, 1, [0, 0, 0]), "a"), 1);
        assert_eq!(store.insert(solid_rgb(1, 1, [0, 0, 0]), "b"), 2);

        let latest = store.latest().unwrap();
        assert_eq!(latest.sequence_key, 2);
        assert_eq!(latest.label, "b");
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_mode_recorded_on_insert() {
        let store = InboundStore::unbounded();
        let key = store.insert(solid_rgba(2, 2, [1, 2, 3, 4]), "layer");
        assert_eq!(store.get(key).unwrap().mode, ChannelMode::Rgba);
    }

    #[test]
    fn test_concurrent_inserts_are_monotonic() {
        let store = Arc::new(InboundStore::unbounded());
        let threads = 8;
        let per_thread = 25;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut keys = Vec::new();
                    for i in 0..per_thread {
                        keys.push(store.insert(solid_rgb(1, 1, [0, 0, 0]), format!("{}-{}", t, i)));
                    }
                    keys
                })
            })
            .collect();

        let mut all_keys: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all_keys.sort_unstable();

        let n = (threads * per_thread) as u64;
        assert_eq!(all_keys, (1..=n).collect::<Vec<_>>());
        assert_eq!(store.latest().unwrap().sequence_key, n);
        assert_eq!(store.count() as u64, n);
    }

    #[test]
    fn test_capacity_evicts_oldest_without_reusing_keys() {
        let store = InboundStore::new(2);
        for label in ["one", "two", "three"] {
            store.insert(solid_rgb(1, 1, [0, 0, 0]), label);
        }

        assert_eq!(store.count(), 2);
        assert!(store.get(1).is_none());
        assert_eq!(store.latest().unwrap().sequence_key, 3);
        assert_eq!(store.insert(solid_rgb(1, 1, [0, 0, 0]), "four"), 4);
    }

    #[test]
    fn test_summaries() {
        let store = InboundStore::unbounded();
        store.insert(solid_rgb(3, 2, [0, 0, 0]), "background");

        let summaries = store.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].image_id, 1);
        assert_eq!(summaries[0].layer_name, "background");
        assert_eq!(summaries[0].size, "3x2");
        assert_eq!(summaries[0].mode, ChannelMode::Rgb);
    }
}

use super::bitmap::Bitmap;
use super::key::RenderKey;
use super::paint::paint;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Memoizes painted icons by `RenderKey`.
///
/// Cleared whenever appearance or a key-relevant display setting changes.
#[derive(Default)]
pub struct RenderCache {
    entries: Mutex<HashMap<RenderKey, Arc<Bitmap>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&self, key: &RenderKey) -> Arc<Bitmap> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(bitmap) = entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return bitmap.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let bitmap = Arc::new(paint(key));
        entries.insert(*key, bitmap.clone());
        bitmap
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if !entries.is_empty() {
            tracing::debug!(entries = entries.len(), "Clearing render cache");
        }
        entries.clear();
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

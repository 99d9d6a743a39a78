use std::collections::HashMap;
use std::sync::Arc;

use crate::ShaderBin;

/// Registry key: shader names are matched case-insensitively, and a shader and an
/// include of the same name are different binaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinKey {
    pub name: String,
    pub include: bool,
}

impl BinKey {
    pub fn new(name: &str, include: bool) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            include,
        }
    }
}

#[derive(Debug)]
struct Entry {
    bin: Arc<ShaderBin>,
    last_used: u64,
}

/// Every binary loaded or compiled so far, for reuse and memory accounting.
///
/// Once `max_entries` is reached, inserting evicts the least recently used entry.
/// Evicted binaries stay alive for whoever still holds an `Arc` to them.
#[derive(Debug)]
pub struct BinRegistry {
    entries: HashMap<BinKey, Entry>,
    clock: u64,
    max_entries: usize,
}

impl BinRegistry {
    /// `max_entries == 0` means unbounded.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            clock: 0,
            max_entries,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn get(&mut self, key: &BinKey) -> Option<Arc<ShaderBin>> {
        let now = self.tick();
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = now;
            entry.bin.clone()
        })
    }

    /// Insert or replace. Returns the binary evicted to make room, if any.
    pub fn insert(&mut self, key: BinKey, bin: Arc<ShaderBin>) -> Option<Arc<ShaderBin>> {
        let mut evicted = None;

        if self.max_entries > 0
            && !self.entries.contains_key(&key)
            && self.entries.len() >= self.max_entries
        {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());

            if let Some(oldest) = oldest {
                log::debug!("evicting {:?} from the shader cache", oldest.name);
                evicted = self.entries.remove(&oldest).map(|entry| entry.bin);
            }
        }

        let last_used = self.tick();
        self.entries.insert(key, Entry { bin, last_used });
        evicted
    }

    pub fn remove(&mut self, key: &BinKey) -> Option<Arc<ShaderBin>> {
        self.entries.remove(key).map(|entry| entry.bin)
    }

    pub fn contains(&self, key: &BinKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BinKey, &Arc<ShaderBin>)> {
        self.entries.iter().map(|(key, entry)| (key, &entry.bin))
    }

    pub fn size_in_bytes(&self) -> usize {
        self.entries.values().map(|entry| entry.bin.size()).sum()
    }

    /// Drop every entry, or only the includes. Returns how many were dropped.
    pub fn invalidate(&mut self, includes_only: bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| includes_only && !key.include);
        before - self.entries.len()
    }
}

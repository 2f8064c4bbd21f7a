//! Slot table backing every live handle.
//!
//! Each handle owns one slot for its whole lifetime. The slot records
//! whether the handle is a root and which allocation record it is bound
//! to. Slots are recycled through a free list; a per-slot generation
//! counter makes keys of dropped handles distinguishable from the key of
//! whichever handle reuses the slot.

use crate::registry::RecordKey;

// ============================================================================
// HandleKey - tagged slot identifier
// ============================================================================

/// High byte of every encoded key ("H").
const KEY_TAG: u64 = 0x48 << 56;
const TAG_MASK: u64 = 0xFF << 56;
const GENERATION_SHIFT: u32 = 32;
/// Generations are 24 bits wide and wrap.
const GENERATION_MASK: u32 = 0x00FF_FFFF;

/// Identifier of a handle slot.
///
/// A key is stored as the first word of every handle, encoded as
/// `tag (8 bits) | generation (24 bits) | index (32 bits)`. The mark engine
/// recognises embedded handles by finding this encoding, followed by the
/// heap's address, inside object memory.
///
/// The generation wraps after 2^24 reuses of one slot. A stale copy of a
/// key that survives that long in object memory, next to a still-valid heap
/// word, would resolve to whichever handle holds the slot then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HandleKey(u64);

impl HandleKey {
    const fn new(index: u32, generation: u32) -> Self {
        let generation = (generation & GENERATION_MASK) as u64;
        Self(KEY_TAG | (generation << GENERATION_SHIFT) | index as u64)
    }

    /// Decode a word read from object memory.
    ///
    /// Returns `None` if the tag does not match. A matching tag does not
    /// mean the key is live; the table still checks the generation.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Option<Self> {
        if bits & TAG_MASK == KEY_TAG {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// The encoded word.
    #[cfg(test)]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn index(self) -> usize {
        (self.0 as u32) as usize
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn generation(self) -> u32 {
        (self.0 >> GENERATION_SHIFT) as u32 & GENERATION_MASK
    }
}

// ============================================================================
// HandleTable
// ============================================================================

/// Bookkeeping for one live handle.
#[derive(Debug, Clone, Copy)]
pub struct HandleEntry {
    /// Allocation the handle is bound to, `None` when unbound.
    pub record: Option<RecordKey>,
    /// Fixed at construction by the handle's kind.
    pub is_root: bool,
}

struct HandleSlot {
    generation: u32,
    entry: Option<HandleEntry>,
}

/// Every currently-live handle, root or not.
pub struct HandleTable {
    slots: Vec<HandleSlot>,
    free: Vec<u32>,
    live: usize,
    roots: usize,
}

impl HandleTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            live: 0,
            roots: 0,
        }
    }

    /// Register a new handle and return its key.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` handles are alive at once.
    pub fn insert(&mut self, entry: HandleEntry) -> HandleKey {
        self.live += 1;
        if entry.is_root {
            self.roots += 1;
        }

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return HandleKey::new(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len()).expect("handle table exhausted");
        self.slots.push(HandleSlot {
            generation: 0,
            entry: Some(entry),
        });
        HandleKey::new(index, 0)
    }

    /// Deregister a handle, returning its final entry.
    pub fn remove(&mut self, key: HandleKey) -> Option<HandleEntry> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
        #[allow(clippy::cast_possible_truncation)]
        self.free.push(key.index() as u32);

        self.live -= 1;
        if entry.is_root {
            self.roots -= 1;
        }
        Some(entry)
    }

    pub fn get(&self, key: HandleKey) -> Option<&HandleEntry> {
        let slot = self.slots.get(key.index())?;
        if slot.generation == key.generation() {
            slot.entry.as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, key: HandleKey) -> Option<&mut HandleEntry> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation == key.generation() {
            slot.entry.as_mut()
        } else {
            None
        }
    }

    /// Unbind a handle without deregistering it.
    pub fn invalidate(&mut self, key: HandleKey) {
        if let Some(entry) = self.get_mut(key) {
            entry.record = None;
        }
    }

    /// Records targeted by bound root handles.
    pub fn root_targets(&self) -> impl Iterator<Item = RecordKey> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| entry.is_root)
            .filter_map(|entry| entry.record)
    }

    pub const fn len(&self) -> usize {
        self.live
    }

    pub const fn root_count(&self) -> usize {
        self.roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNBOUND: HandleEntry = HandleEntry {
        record: None,
        is_root: false,
    };

    #[test]
    fn test_key_round_trips_through_bits() {
        let key = HandleKey::new(7, 3);
        assert_eq!(HandleKey::from_bits(key.to_bits()), Some(key));
        assert_eq!(key.index(), 7);
        assert_eq!(key.generation(), 3);
    }

    #[test]
    fn test_untagged_words_are_rejected() {
        assert_eq!(HandleKey::from_bits(0), None);
        assert_eq!(HandleKey::from_bits(42), None);
        assert_eq!(HandleKey::from_bits(0x7fff_1234_5678), None);
        assert_eq!(HandleKey::from_bits(0x4700_0000_0000_0001), None);
    }

    #[test]
    fn test_generation_wraps_within_its_field() {
        let key = HandleKey::new(1, GENERATION_MASK);
        assert_eq!(key.generation(), GENERATION_MASK);
        assert_eq!(HandleKey::from_bits(key.to_bits()), Some(key));

        let wrapped = HandleKey::new(1, GENERATION_MASK.wrapping_add(1) & GENERATION_MASK);
        assert_eq!(wrapped.generation(), 0);
        assert_eq!(wrapped.to_bits() & TAG_MASK, KEY_TAG);
    }

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let mut table = HandleTable::with_capacity(4);
        let first = table.insert(UNBOUND);
        assert!(table.remove(first).is_some());

        let second = table.insert(UNBOUND);
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(table.get(first).is_none());
        assert!(table.get(second).is_some());
    }

    #[test]
    fn test_stale_remove_is_ignored() {
        let mut table = HandleTable::with_capacity(4);
        let key = table.insert(UNBOUND);
        assert!(table.remove(key).is_some());
        assert!(table.remove(key).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_root_count_tracks_kind() {
        let mut table = HandleTable::with_capacity(4);
        let root = table.insert(HandleEntry {
            record: None,
            is_root: true,
        });
        let _member = table.insert(UNBOUND);
        assert_eq!(table.len(), 2);
        assert_eq!(table.root_count(), 1);

        table.remove(root);
        assert_eq!(table.root_count(), 0);
        assert_eq!(table.len(), 1);
    }
}

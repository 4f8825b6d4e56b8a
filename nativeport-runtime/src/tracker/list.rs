//! Doubly linked list of live native allocations
//!
//! Entries live in a slab and link to each other by index. A removed entry is
//! left self-linked, so removing it again is a no-op; slots are recycled with
//! a bumped generation so stale ids never touch a reused slot.

/// Identifies one registered allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    index: usize,
    generation: u32,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    prev: Option<usize>,
    next: Option<usize>,
    handle_id: u64,
    bytes: usize,
}

impl Entry {
    fn is_unlinked(&self, index: usize) -> bool {
        self.prev == Some(index) && self.next == Some(index)
    }
}

#[derive(Debug, Default)]
pub(crate) struct DeallocationList {
    entries: Vec<Entry>,
    free: Vec<usize>,
    head: Option<usize>,
    total_bytes: usize,
    len: usize,
}

impl DeallocationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a new entry at the head and charge its bytes
    pub fn add(&mut self, handle_id: u64, bytes: usize) -> EntryId {
        let next = self.head;
        let index = match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.generation = entry.generation.wrapping_add(1);
                entry.prev = None;
                entry.next = next;
                entry.handle_id = handle_id;
                entry.bytes = bytes;
                index
            }
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    prev: None,
                    next,
                    handle_id,
                    bytes,
                });
                self.entries.len() - 1
            }
        };
        if let Some(old_head) = next {
            self.entries[old_head].prev = Some(index);
        }
        self.head = Some(index);
        self.total_bytes += bytes;
        self.len += 1;

        EntryId {
            index,
            generation: self.entries[index].generation,
        }
    }

    /// Unlink an entry and uncharge its bytes.
    ///
    /// Returns the bytes released, or `None` when the entry was already gone.
    pub fn remove(&mut self, id: EntryId) -> Option<usize> {
        let entry = self.entries.get(id.index)?;
        if entry.generation != id.generation || entry.is_unlinked(id.index) {
            return None;
        }
        let (prev, next, bytes) = (entry.prev, entry.next, entry.bytes);

        match prev {
            Some(prev) => self.entries[prev].next = next,
            None => self.head = next,
        }
        if let Some(next) = next {
            self.entries[next].prev = prev;
        }

        let entry = &mut self.entries[id.index];
        entry.prev = Some(id.index);
        entry.next = Some(id.index);
        entry.bytes = 0;
        self.free.push(id.index);
        self.total_bytes -= bytes;
        self.len -= 1;
        Some(bytes)
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.entries
            .get(id.index)
            .map_or(false, |e| e.generation == id.generation && !e.is_unlinked(id.index))
    }

    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Walk live entries from newest to oldest as `(handle_id, bytes)`
    pub fn iter(&self) -> impl Iterator<Item = (u64, usize)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let index = cursor?;
            let entry = &self.entries[index];
            cursor = entry.next;
            Some((entry.handle_id, entry.bytes))
        })
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const COUNTER_BITS: u32 = 48;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// Opaque, globally unique entity identifier.
///
/// The upper 16 bits carry the entity kind, the lower 48 bits a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(u64);

impl Identity {
    pub const fn new(kind: u16, counter: u64) -> Self {
        Identity(((kind as u64) << COUNTER_BITS) | (counter & COUNTER_MASK))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Identity(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn kind(&self) -> u16 {
        (self.0 >> COUNTER_BITS) as u16
    }

    pub const fn counter(&self) -> u64 {
        self.0 & COUNTER_MASK
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Source of identities for freshly created entities.
pub trait IdentityAllocator: Send + Sync {
    fn allocate(&self, kind: u16) -> Identity;
}

/// Allocates identities from one process-wide counter.
///
/// Counters are shared across kinds, so two identities never differ only
/// by kind.
#[derive(Debug)]
pub struct SequentialAllocator {
    next: AtomicU64,
}

impl SequentialAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Resume allocation after identities already handed out by storage.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for SequentialAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityAllocator for SequentialAllocator {
    fn allocate(&self, kind: u16) -> Identity {
        let counter = self.next.fetch_add(1, Ordering::SeqCst);
        debug_assert!(counter <= COUNTER_MASK, "identity counter exhausted");
        Identity::new(kind, counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_packs_kind_and_counter() {
        let id = Identity::new(0x00ab, 42);
        assert_eq!(id.kind(), 0x00ab);
        assert_eq!(id.counter(), 42);
        assert_eq!(Identity::from_raw(id.as_u64()), id);
        assert_eq!(id.to_string(), "00ab00000000002a");
    }

    #[test]
    fn test_sequential_allocator_is_unique_across_kinds() {
        let alloc = SequentialAllocator::new();
        let ids: HashSet<u64> = (0..100)
            .map(|i| alloc.allocate((i % 3) as u16).counter())
            .collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_allocator_resumes_from_offset() {
        let alloc = SequentialAllocator::starting_at(500);
        assert_eq!(alloc.allocate(1).counter(), 500);
        assert_eq!(alloc.peek(), 501);
    }
}

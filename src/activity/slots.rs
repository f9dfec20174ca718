//! Stream slot arena
//!
//! Fixed-capacity table of owned stream handles. Every open stream occupies
//! exactly one slot; the slot index is stable for the stream's lifetime and
//! reused after release (lowest free index first). All access is
//! bounds-checked and returns a result code, never indexes blindly.

use crate::stream::provider::{ProviderStream, StreamError};
use crate::stream::spec::{Direction, StreamConfig};

/// Capacity of the slot table
pub const MAX_STREAMS: usize = 8;

/// Index of one occupied stream slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }

    pub fn as_raw(self) -> i32 {
        self.0 as i32
    }
}

/// One open stream with its negotiated configuration. The configuration is
/// tracked per stream side, not activity-wide, so a duplex pair may
/// negotiate different values.
pub struct SlotEntry {
    pub stream: Box<dyn ProviderStream>,
    pub config: StreamConfig,
    pub direction: Direction,
}

/// Arena of open stream handles
pub struct StreamPool {
    slots: [Option<SlotEntry>; MAX_STREAMS],
}

impl StreamPool {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Place an entry into the lowest free slot.
    pub fn allocate(&mut self, entry: SlotEntry) -> Result<SlotId, StreamError> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(entry);
                return Ok(SlotId(index));
            }
        }
        Err(StreamError::NoFreeSlots(MAX_STREAMS))
    }

    /// Bounds-checked access by raw host index.
    pub fn get(&self, raw: i32) -> Result<&SlotEntry, StreamError> {
        usize::try_from(raw)
            .ok()
            .filter(|&i| i < MAX_STREAMS)
            .and_then(|i| self.slots[i].as_ref())
            .ok_or(StreamError::InvalidSlot(raw))
    }

    pub fn get_mut(&mut self, raw: i32) -> Result<&mut SlotEntry, StreamError> {
        usize::try_from(raw)
            .ok()
            .filter(|&i| i < MAX_STREAMS)
            .and_then(|i| self.slots[i].as_mut())
            .ok_or(StreamError::InvalidSlot(raw))
    }

    /// Release one slot, returning its entry so the caller controls teardown
    /// order.
    pub fn release(&mut self, raw: i32) -> Result<SlotEntry, StreamError> {
        usize::try_from(raw)
            .ok()
            .filter(|&i| i < MAX_STREAMS)
            .and_then(|i| self.slots[i].take())
            .ok_or(StreamError::InvalidSlot(raw))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SlotEntry> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }

    /// First open stream in the given direction.
    pub fn first_mut(&mut self, direction: Direction) -> Option<&mut SlotEntry> {
        self.iter_mut().find(|e| e.direction == direction)
    }
}

impl Default for StreamPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::loopback::{LoopbackOptions, LoopbackProvider};
    use crate::stream::provider::StreamProvider;
    use crate::stream::spec::StreamSpec;

    fn entry(provider: &LoopbackProvider) -> SlotEntry {
        let config = provider
            .negotiate(&StreamSpec::unspecified(Direction::Output))
            .unwrap();
        let stream = provider
            .open_output(&config, Box::new(|_: &mut [f32]| {}))
            .unwrap();
        SlotEntry {
            stream,
            config,
            direction: Direction::Output,
        }
    }

    #[test]
    fn test_allocation_exhausts_at_capacity() {
        let provider = LoopbackProvider::new(LoopbackOptions::default());
        let mut pool = StreamPool::new();

        for i in 0..MAX_STREAMS {
            let id = pool.allocate(entry(&provider)).unwrap();
            assert_eq!(id.index(), i);
        }

        let err = pool.allocate(entry(&provider)).unwrap_err();
        assert!(matches!(err, StreamError::NoFreeSlots(_)));
        // Existing slots untouched
        assert_eq!(pool.occupied(), MAX_STREAMS);
        for i in 0..MAX_STREAMS {
            assert!(pool.get(i as i32).is_ok());
        }
    }

    #[test]
    fn test_released_slot_is_reused() {
        let provider = LoopbackProvider::new(LoopbackOptions::default());
        let mut pool = StreamPool::new();

        let a = pool.allocate(entry(&provider)).unwrap();
        let _b = pool.allocate(entry(&provider)).unwrap();
        pool.release(a.as_raw()).unwrap();

        let c = pool.allocate(entry(&provider)).unwrap();
        assert_eq!(c.index(), a.index(), "Freed slot should be reused");
    }

    #[test]
    fn test_out_of_range_access_is_an_error() {
        let pool = StreamPool::new();
        assert!(matches!(pool.get(-1), Err(StreamError::InvalidSlot(-1))));
        assert!(matches!(pool.get(99), Err(StreamError::InvalidSlot(99))));
        assert!(matches!(pool.get(0), Err(StreamError::InvalidSlot(0))));
    }

    #[test]
    fn test_release_twice_is_an_error() {
        let provider = LoopbackProvider::new(LoopbackOptions::default());
        let mut pool = StreamPool::new();
        let id = pool.allocate(entry(&provider)).unwrap();
        pool.release(id.as_raw()).unwrap();
        assert!(pool.release(id.as_raw()).is_err());
        assert!(pool.is_empty());
    }
}

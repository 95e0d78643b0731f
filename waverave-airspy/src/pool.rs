use crate::Error;
use crate::consts::{PACKED_BUFFER_SIZE, RAW_BUFFER_COUNT, TRANSFER_COUNT, UNPACKED_BUFFER_SIZE};
use crate::convert::{ConvertBuffers, sample_count};

/// Transfer size in bytes for a given packing mode.
pub(crate) fn buffer_size_for(packing: bool) -> usize {
    if packing {
        PACKED_BUFFER_SIZE
    } else {
        UNPACKED_BUFFER_SIZE
    }
}

fn try_alloc<T: Clone + Default>(len: usize) -> Result<Vec<T>, Error> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| Error::NoMem)?;
    v.resize(len, T::default());
    Ok(v)
}

/// All the memory the streaming pipeline works with.
///
/// While the device is idle, every buffer sits here. Starting a stream moves
/// the transfer buffers into the bulk queue, the ring buffers into the ready
/// ring, and the conversion buffers into the consumer thread; stopping moves
/// them all back. Anything lost along the way (a panicked thread, a transfer
/// that never came back) is re-allocated by [`BufferPool::fill`].
pub(crate) struct BufferPool {
    buffer_size: usize,
    packing: bool,
    pub(crate) ring: Vec<Vec<u8>>,
    pub(crate) transfers: Vec<Vec<u8>>,
    pub(crate) convert: ConvertBuffers,
}

impl BufferPool {
    pub(crate) fn allocate(packing: bool) -> Result<Self, Error> {
        let mut pool = Self {
            buffer_size: buffer_size_for(packing),
            packing,
            ring: Vec::new(),
            transfers: Vec::new(),
            convert: ConvertBuffers {
                output: Vec::new(),
                unpacked: Vec::new(),
            },
        };
        pool.fill()?;
        Ok(pool)
    }

    pub(crate) fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub(crate) fn packing(&self) -> bool {
        self.packing
    }

    /// Largest number of samples a single transfer can decode into.
    pub(crate) fn max_samples(&self) -> usize {
        sample_count(self.buffer_size, self.packing)
    }

    /// Top up every buffer set to its full count and size.
    pub(crate) fn fill(&mut self) -> Result<(), Error> {
        while self.ring.len() < RAW_BUFFER_COUNT {
            self.ring.push(try_alloc(self.buffer_size)?);
        }
        while self.transfers.len() < TRANSFER_COUNT {
            self.transfers.push(try_alloc(self.buffer_size)?);
        }
        let samples = self.max_samples();
        if self.convert.output.len() < samples {
            self.convert.output = try_alloc(samples)?;
        }
        if self.packing && self.convert.unpacked.len() < samples {
            self.convert.unpacked = try_alloc(samples)?;
        }
        Ok(())
    }

    /// Release every buffer. Safe to call any number of times.
    pub(crate) fn free_all(&mut self) {
        self.ring = Vec::new();
        self.transfers = Vec::new();
        self.convert.output = Vec::new();
        self.convert.unpacked = Vec::new();
    }

    /// Free everything and re-allocate for a new packing mode.
    pub(crate) fn reconfigure(&mut self, packing: bool) -> Result<(), Error> {
        self.free_all();
        self.packing = packing;
        self.buffer_size = buffer_size_for(packing);
        self.fill()
    }
}

enum Slot {
    Free(Vec<u8>),
    Filled { data: Vec<u8>, dropped: u64 },
    Consuming,
}

/// A buffer taken out of the ring by the consumer. Must be handed back with
/// [`Ring::release`].
pub(crate) struct ReadyBuffer {
    index: usize,
    pub(crate) data: Vec<u8>,
    /// Transfers dropped just before this one was accepted.
    pub(crate) dropped: u64,
}

/// Fixed-capacity queue of completed transfers waiting for the consumer.
///
/// Filled buffers are swapped in, never copied: the producer hands over its
/// completed buffer and gets the free buffer from the head slot back in
/// exchange. `filled` counts both waiting buffers and the one the consumer is
/// working on, so the slot at `head` is always free unless the ring is full.
#[derive(Default)]
pub(crate) struct Ring {
    slots: Vec<Slot>,
    head: usize,
    tail: usize,
    filled: usize,
    dropped_buffers: u64,
}

impl Ring {
    pub(crate) fn new(buffers: Vec<Vec<u8>>) -> Self {
        debug_assert!(buffers.len().is_power_of_two());
        Self {
            slots: buffers.into_iter().map(Slot::Free).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn filled(&self) -> usize {
        self.filled
    }

    /// Swap a completed transfer's buffer into the ring.
    ///
    /// Returns false and counts a dropped transfer if the ring is full, in
    /// which case `data` is left untouched.
    pub(crate) fn push(&mut self, data: &mut Vec<u8>) -> bool {
        if self.filled >= self.slots.len() {
            self.dropped_buffers += 1;
            return false;
        }
        let slot = &mut self.slots[self.head];
        let Slot::Free(buf) = slot else {
            self.dropped_buffers += 1;
            return false;
        };
        std::mem::swap(buf, data);
        let data = std::mem::take(buf);
        *slot = Slot::Filled {
            data,
            dropped: self.dropped_buffers,
        };
        self.dropped_buffers = 0;
        self.head = (self.head + 1) % self.slots.len();
        self.filled += 1;
        true
    }

    /// Take the oldest filled buffer, if there is one.
    pub(crate) fn pop(&mut self) -> Option<ReadyBuffer> {
        if self.filled == 0 {
            return None;
        }
        let index = self.tail;
        match std::mem::replace(&mut self.slots[index], Slot::Consuming) {
            Slot::Filled { data, dropped } => {
                self.tail = (self.tail + 1) % self.slots.len();
                Some(ReadyBuffer {
                    index,
                    data,
                    dropped,
                })
            }
            other => {
                self.slots[index] = other;
                None
            }
        }
    }

    /// Return a consumed buffer to its slot.
    pub(crate) fn release(&mut self, buf: ReadyBuffer) {
        self.slots[buf.index] = Slot::Free(buf.data);
        self.filled -= 1;
    }

    /// Tear the ring down, keeping every buffer that isn't checked out.
    pub(crate) fn into_buffers(self) -> Vec<Vec<u8>> {
        self.slots
            .into_iter()
            .filter_map(|s| match s {
                Slot::Free(data) | Slot::Filled { data, .. } => Some(data),
                Slot::Consuming => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn pool_sizes_follow_packing() {
        let mut pool = BufferPool::allocate(false).unwrap();
        assert_eq!(pool.buffer_size(), 262_144);
        assert_eq!(pool.ring.len(), RAW_BUFFER_COUNT);
        assert_eq!(pool.transfers.len(), TRANSFER_COUNT);
        assert!(pool.transfers.iter().all(|t| t.len() == 262_144));
        assert_eq!(pool.convert.output.len(), 131_072);
        assert!(pool.convert.unpacked.is_empty());

        pool.reconfigure(true).unwrap();
        assert_eq!(pool.buffer_size(), 147_456);
        assert!(pool.ring.iter().all(|r| r.len() == 147_456));
        assert_eq!(pool.convert.output.len(), 98_304);
        assert_eq!(pool.convert.unpacked.len(), 98_304);

        pool.free_all();
        pool.free_all();
        assert!(pool.ring.is_empty() && pool.transfers.is_empty());
    }

    #[test]
    fn fill_replaces_lost_buffers() {
        let mut pool = BufferPool::allocate(false).unwrap();
        pool.transfers.truncate(3);
        pool.ring.clear();
        pool.fill().unwrap();
        assert_eq!(pool.transfers.len(), TRANSFER_COUNT);
        assert_eq!(pool.ring.len(), RAW_BUFFER_COUNT);
    }

    fn tagged(tag: u64) -> Vec<u8> {
        tag.to_le_bytes().to_vec()
    }

    fn tag_of(data: &[u8]) -> u64 {
        u64::from_le_bytes(data[..8].try_into().unwrap())
    }

    #[test]
    fn full_ring_drops_newest() {
        let mut ring = Ring::new((0..4).map(|_| vec![0u8; 8]).collect());
        for i in 0..6 {
            let mut data = tagged(i);
            let pushed = ring.push(&mut data);
            assert_eq!(pushed, i < 4);
            if !pushed {
                assert_eq!(tag_of(&data), i);
            }
        }
        assert_eq!(ring.filled(), 4);

        // Drain and refill one slot: the drop count rides on the next buffer.
        let first = ring.pop().unwrap();
        assert_eq!((tag_of(&first.data), first.dropped), (0, 0));
        ring.release(first);
        let mut data = tagged(6);
        assert!(ring.push(&mut data));

        let tags: Vec<(u64, u64)> = std::iter::from_fn(|| {
            let b = ring.pop()?;
            let out = (tag_of(&b.data), b.dropped);
            ring.release(b);
            Some(out)
        })
        .collect();
        assert_eq!(tags, vec![(1, 0), (2, 0), (3, 0), (6, 2)]);
        assert_eq!(ring.filled(), 0);
    }

    #[test]
    fn interleaved_accounting() {
        // Random interleaving of producer completions and consumer steps.
        let mut ring = Ring::new((0..RAW_BUFFER_COUNT).map(|_| vec![0u8; 8]).collect());
        let mut rng = StdRng::seed_from_u64(0x2545_f491);

        let mut completed = 0u64;
        let mut delivered = 0u64;
        let mut dropped = 0u64;
        let mut last_tag = None;
        let mut held: Option<ReadyBuffer> = None;

        for _ in 0..20_000 {
            match rng.gen_range(0..3) {
                0 | 1 => {
                    let mut data = tagged(completed);
                    completed += 1;
                    ring.push(&mut data);
                }
                _ => {
                    if let Some(b) = held.take() {
                        ring.release(b);
                    } else if let Some(b) = ring.pop() {
                        let tag = tag_of(&b.data);
                        assert!(last_tag.is_none_or(|t| tag > t));
                        last_tag = Some(tag);
                        delivered += 1;
                        dropped += b.dropped;
                        held = Some(b);
                    }
                }
            }
            assert!(ring.filled() <= RAW_BUFFER_COUNT);
        }
        if let Some(b) = held.take() {
            ring.release(b);
        }
        while let Some(b) = ring.pop() {
            delivered += 1;
            dropped += b.dropped;
            ring.release(b);
        }
        // Drops after the last accepted buffer haven't been reported yet.
        dropped += ring.dropped_buffers;
        assert_eq!(delivered + dropped, completed);
        assert_eq!(ring.into_buffers().len(), RAW_BUFFER_COUNT);
    }
}

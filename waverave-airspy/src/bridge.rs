//! Hand sample blocks from the streaming callback to another thread.
//!
//! A [`HostBridge`] is a fixed pool of byte buffers passed around between two
//! bounded channels. The callback from [`HostBridge::callback`] copies each
//! block into an empty buffer and sends it to the filled side; the host thread
//! receives filled blocks and [recycles][HostBridge::recycle] them once done.
//! When the host falls behind and there's no empty buffer left, the block is
//! dropped and its samples are counted, both in
//! [`host_dropped`][HostBridge::host_dropped] and in the `dropped_samples` of
//! the next block that makes it through.
//!
//! Each bridge belongs to one device's stream, so any number of receivers can
//! run side by side, each with its own bridge.
//!
//! ```no_run
//! # use anyhow::Result;
//! # fn main() -> Result<()> {
//! use std::io::Write;
//! use waverave_airspy::HostBridge;
//!
//! let airspy = waverave_airspy::open_first()?;
//! let bridge = HostBridge::new(16, airspy.buffer_size() * 2);
//! airspy.start(bridge.callback())?;
//!
//! let mut out = std::io::stdout().lock();
//! for _ in 0..100 {
//!     let block = bridge.recv()?;
//!     out.write_all(block.bytes())?;
//!     bridge.recycle(block);
//! }
//! airspy.stop()?;
//! # Ok(())
//! # }
//! ```
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{
    Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded,
};

use crate::{SampleBlock, SampleType};

/// A block of samples copied out of the streaming callback.
#[derive(Debug)]
pub struct FilledBlock {
    data: Vec<u8>,
    sample_count: usize,
    dropped_samples: u64,
    sample_type: SampleType,
}

impl FilledBlock {
    /// The samples, as raw bytes in the block's [sample type][Self::sample_type].
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of samples in the block. IQ pairs count as one sample.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Samples lost just before this block, whether on the device side or
    /// because the host didn't keep up.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// Sample format of the block's bytes.
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }
}

/// A per-stream channel pair carrying sample blocks to a host thread.
pub struct HostBridge {
    empty_tx: Sender<Vec<u8>>,
    empty_rx: Receiver<Vec<u8>>,
    filled_tx: Sender<FilledBlock>,
    filled_rx: Receiver<FilledBlock>,
    host_dropped: Arc<AtomicU64>,
}

impl HostBridge {
    /// Create a bridge with `pool_size` buffers, each with room for
    /// `block_bytes` bytes.
    ///
    /// Blocks larger than `block_bytes` still get through; the buffer just
    /// grows to fit.
    pub fn new(pool_size: usize, block_bytes: usize) -> Self {
        let pool_size = pool_size.max(1);
        let (empty_tx, empty_rx) = bounded(pool_size);
        let (filled_tx, filled_rx) = bounded(pool_size);
        for _ in 0..pool_size {
            let _ = empty_tx.try_send(Vec::with_capacity(block_bytes));
        }
        Self {
            empty_tx,
            empty_rx,
            filled_tx,
            filled_rx,
            host_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make a sample callback feeding this bridge, to pass to
    /// [`Airspy::start`][crate::Airspy::start].
    ///
    /// The callback ends the stream once the bridge itself is dropped.
    pub fn callback(&self) -> impl FnMut(&SampleBlock<'_>) -> ControlFlow<()> + Send + 'static {
        let empty_rx = self.empty_rx.clone();
        let filled_tx = self.filled_tx.clone();
        let host_dropped = self.host_dropped.clone();
        let mut pending_drop = 0u64;
        move |block| {
            let mut data = match empty_rx.try_recv() {
                Ok(data) => data,
                Err(TryRecvError::Empty) => {
                    let count = block.sample_count() as u64;
                    host_dropped.fetch_add(count, Ordering::Relaxed);
                    pending_drop += count;
                    return ControlFlow::Continue(());
                }
                Err(TryRecvError::Disconnected) => return ControlFlow::Break(()),
            };
            data.clear();
            data.extend_from_slice(block.bytes());
            let filled = FilledBlock {
                data,
                sample_count: block.sample_count(),
                dropped_samples: block.dropped_samples() + pending_drop,
                sample_type: block.sample_type(),
            };
            match filled_tx.try_send(filled) {
                Ok(()) => {
                    pending_drop = 0;
                    ControlFlow::Continue(())
                }
                Err(TrySendError::Full(filled)) => {
                    // The filled side is sized for the whole pool, so this
                    // needs the two channels out of step. Still a lost block.
                    let count = filled.sample_count as u64;
                    host_dropped.fetch_add(count, Ordering::Relaxed);
                    pending_drop = filled.dropped_samples + count;
                    ControlFlow::Continue(())
                }
                Err(TrySendError::Disconnected(_)) => ControlFlow::Break(()),
            }
        }
    }

    /// Wait for the next filled block.
    pub fn recv(&self) -> Result<FilledBlock, RecvError> {
        self.filled_rx.recv()
    }

    /// Wait up to `timeout` for the next filled block.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<FilledBlock, RecvTimeoutError> {
        self.filled_rx.recv_timeout(timeout)
    }

    /// Get the next filled block, if one is waiting.
    pub fn try_recv(&self) -> Result<FilledBlock, TryRecvError> {
        self.filled_rx.try_recv()
    }

    /// Hand a block's buffer back to the pool.
    pub fn recycle(&self, block: FilledBlock) {
        let _ = self.empty_tx.try_send(block.data);
    }

    /// Recycle every filled block that hasn't been received yet.
    pub fn flush(&self) {
        while let Ok(block) = self.filled_rx.try_recv() {
            self.recycle(block);
        }
    }

    /// Total samples dropped because no empty buffer was available.
    pub fn host_dropped(&self) -> u64 {
        self.host_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{ConvertBuffers, decode_block};
    use crate::iqconverter::IqConverters;

    fn feed<F>(callback: &mut F, raw: &[u8], dropped_buffers: u64) -> ControlFlow<()>
    where
        F: FnMut(&SampleBlock<'_>) -> ControlFlow<()>,
    {
        let mut bufs = ConvertBuffers {
            output: Vec::new(),
            unpacked: Vec::new(),
        };
        let mut iq = IqConverters::default();
        let block = decode_block(raw, &mut bufs, &mut iq, SampleType::Raw, false, dropped_buffers);
        callback(&block)
    }

    #[test]
    fn blocks_arrive_in_order() {
        let bridge = HostBridge::new(4, 8);
        let mut cb = bridge.callback();
        for i in 0..3u8 {
            assert!(feed(&mut cb, &[i; 8], 0).is_continue());
        }
        for i in 0..3u8 {
            let block = bridge.try_recv().unwrap();
            assert_eq!(block.bytes(), &[i; 8]);
            assert_eq!(block.sample_count(), 4);
            assert_eq!(block.sample_type(), SampleType::Raw);
            bridge.recycle(block);
        }
        assert!(bridge.try_recv().is_err());
        assert_eq!(bridge.host_dropped(), 0);
    }

    #[test]
    fn slow_host_drops_are_counted() {
        let bridge = HostBridge::new(2, 8);
        let mut cb = bridge.callback();
        for _ in 0..5 {
            assert!(feed(&mut cb, &[0; 8], 0).is_continue());
        }
        // Two made it, three were dropped at 4 samples each.
        assert_eq!(bridge.host_dropped(), 12);
        let a = bridge.recv().unwrap();
        let b = bridge.recv().unwrap();
        assert_eq!((a.dropped_samples(), b.dropped_samples()), (0, 0));
        bridge.recycle(a);
        bridge.recycle(b);

        // Host-side drops ride on the next block, on top of device-side ones.
        feed(&mut cb, &[1; 8], 1);
        let c = bridge.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(c.dropped_samples(), 12 + 4);
    }

    #[test]
    fn full_filled_channel_counts_drop() {
        let (empty_tx, empty_rx) = bounded(4);
        let (filled_tx, filled_rx) = bounded(1);
        for _ in 0..4 {
            empty_tx.send(Vec::new()).unwrap();
        }
        let bridge = HostBridge {
            empty_tx,
            empty_rx,
            filled_tx,
            filled_rx,
            host_dropped: Arc::new(AtomicU64::new(0)),
        };
        let mut cb = bridge.callback();
        feed(&mut cb, &[0; 8], 0);
        assert!(feed(&mut cb, &[1; 8], 2).is_continue());
        // Host-side loss only; the 2 buffers the device lost ride along below.
        assert_eq!(bridge.host_dropped(), 4);

        let first = bridge.recv().unwrap();
        assert_eq!(first.bytes(), &[0; 8]);
        feed(&mut cb, &[2; 8], 0);
        let next = bridge.recv().unwrap();
        assert_eq!(next.bytes(), &[2; 8]);
        assert_eq!(next.dropped_samples(), 4 + 8);
    }

    #[test]
    fn flush_returns_buffers() {
        let bridge = HostBridge::new(2, 8);
        let mut cb = bridge.callback();
        feed(&mut cb, &[0; 8], 0);
        feed(&mut cb, &[0; 8], 0);
        bridge.flush();
        assert!(bridge.try_recv().is_err());
        feed(&mut cb, &[0; 8], 0);
        assert_eq!(bridge.host_dropped(), 0);
    }

    #[test]
    fn dropped_bridge_ends_stream() {
        let bridge = HostBridge::new(2, 8);
        let mut cb = bridge.callback();
        drop(bridge);
        assert!(feed(&mut cb, &[0; 8], 0).is_break());
    }
}

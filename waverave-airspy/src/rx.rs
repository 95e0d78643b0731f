use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, error, warn};

use crate::Error;
use crate::consts::TRANSFER_WAIT;
use crate::convert::{ConvertBuffers, SampleBlock, SampleType, decode_block};
use crate::iqconverter::IqConverters;
use crate::pool::{BufferPool, ReadyBuffer, Ring};
use crate::transport::BulkIn;

/// Streaming state shared between a device handle and its pipeline threads.
///
/// One of these lives for as long as the device is open, so every stream on
/// that device hands buffers through the same ring.
pub(crate) struct Shared {
    ring: Mutex<Ring>,
    ready: Condvar,
    streaming: AtomicBool,
    stop_requested: AtomicBool,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            ring: Mutex::new(Ring::default()),
            ready: Condvar::new(),
            streaming: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    fn lock_ring(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire) && !self.stop_requested.load(Ordering::Acquire)
    }

    /// Mark the stream as finished and wake the consumer so it can exit.
    pub(crate) fn halt(&self) {
        self.streaming.store(false, Ordering::Release);
        let _ring = self.lock_ring();
        self.ready.notify_all();
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.halt();
    }

    fn produce(&self, data: &mut Vec<u8>) {
        let mut ring = self.lock_ring();
        if ring.push(data) {
            self.ready.notify_one();
        } else {
            warn!(filled = ring.filled(), "Ready ring full, dropping transfer");
        }
    }

    /// Take the next filled buffer, sleeping until one arrives. Returns `None`
    /// once the stream has stopped.
    fn next_ready(&self) -> Option<ReadyBuffer> {
        let mut ring = self.lock_ring();
        loop {
            if !self.is_streaming() {
                return None;
            }
            if let Some(ready) = ring.pop() {
                return Some(ready);
            }
            ring = self
                .ready
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Everything the consumer thread owns for the duration of a stream.
pub(crate) struct ConsumerState {
    pub(crate) convert: ConvertBuffers,
    pub(crate) iq: IqConverters,
}

/// A running stream: the pipeline threads and the pool they borrowed from.
pub(crate) struct Session {
    /// Holds the buffer sizes; its buffers are out with the threads.
    pool: BufferPool,
    transfer: JoinHandle<Vec<Vec<u8>>>,
    consumer: JoinHandle<ConsumerState>,
    consumer_id: ThreadId,
}

impl Session {
    /// Spin up the transfer and consumer threads.
    ///
    /// The caller has already switched the receiver on. The transfers in the
    /// pool are all submitted to `queue` before the threads start. On failure,
    /// the stream is torn down and the pool and converters are handed back
    /// alongside the error.
    pub(crate) fn spawn<B, F>(
        shared: &Arc<Shared>,
        mut pool: BufferPool,
        mut queue: B,
        iq: IqConverters,
        sample_type: SampleType,
        mut callback: F,
    ) -> Result<Self, (Error, BufferPool, IqConverters)>
    where
        B: BulkIn,
        F: FnMut(&SampleBlock<'_>) -> ControlFlow<()> + Send + 'static,
    {
        let buffer_size = pool.buffer_size();
        let packing = pool.packing();

        *shared.lock_ring() = Ring::new(std::mem::take(&mut pool.ring));
        shared.stop_requested.store(false, Ordering::Release);
        shared.streaming.store(true, Ordering::Release);
        for buf in pool.transfers.drain(..) {
            queue.submit(buf, buffer_size);
        }

        let thread_shared = shared.clone();
        let transfer = thread::Builder::new()
            .name("airspy-transfer".into())
            .spawn(move || run_transfers(queue, &thread_shared, buffer_size));
        let transfer = match transfer {
            Ok(t) => t,
            Err(e) => {
                // The queue went down with the closure, cancelling its transfers.
                shared.halt();
                pool.ring = std::mem::take(&mut *shared.lock_ring()).into_buffers();
                return Err((Error::Thread(e), pool, iq));
            }
        };

        let mut state = ConsumerState {
            convert: std::mem::replace(
                &mut pool.convert,
                ConvertBuffers {
                    output: Vec::new(),
                    unpacked: Vec::new(),
                },
            ),
            iq,
        };
        let thread_shared = shared.clone();
        let consumer = thread::Builder::new()
            .name("airspy-consumer".into())
            .spawn(move || {
                run_consumer(&thread_shared, &mut state, sample_type, packing, &mut callback);
                state
            });
        let consumer = match consumer {
            Ok(c) => c,
            Err(e) => {
                shared.request_stop();
                if let Ok(spare) = transfer.join() {
                    pool.transfers = spare;
                }
                pool.ring = std::mem::take(&mut *shared.lock_ring()).into_buffers();
                return Err((Error::Thread(e), pool, IqConverters::default()));
            }
        };

        let consumer_id = consumer.thread().id();
        Ok(Self {
            pool,
            transfer,
            consumer,
            consumer_id,
        })
    }

    pub(crate) fn packing(&self) -> bool {
        self.pool.packing()
    }

    pub(crate) fn consumer_id(&self) -> ThreadId {
        self.consumer_id
    }

    /// True if called from inside this session's sample callback.
    pub(crate) fn is_consumer_thread(&self) -> bool {
        thread::current().id() == self.consumer_id
    }

    /// Wait for both threads to exit and collect every buffer back into the
    /// pool. The caller must already have requested a stop.
    ///
    /// The pool and converters always come back, even if a thread panicked or
    /// the lost buffers couldn't be replaced; that error is returned alongside.
    pub(crate) fn finish(self, shared: &Shared) -> (BufferPool, IqConverters, Result<(), Error>) {
        let mut pool = self.pool;
        let mut result = Ok(());

        match self.transfer.join() {
            Ok(spare) => pool.transfers = spare,
            Err(_) => {
                error!("Transfer thread panicked");
                result = Err(Error::StreamingThread);
            }
        }
        let iq = match self.consumer.join() {
            Ok(state) => {
                pool.convert = state.convert;
                state.iq
            }
            Err(_) => {
                error!("Consumer thread panicked");
                result = Err(Error::StreamingThread);
                IqConverters::default()
            }
        };
        pool.ring = std::mem::take(&mut *shared.lock_ring()).into_buffers();

        if let Err(e) = pool.fill() {
            warn!("Couldn't replace buffers lost while streaming");
            result = result.and(Err(e));
        }
        (pool, iq, result)
    }
}

/// Body of the transfer thread: keep every transfer in flight, pass completed
/// ones to the ring, and stop on the first failure.
///
/// Returns the transfer buffers that came back.
fn run_transfers<B: BulkIn>(mut queue: B, shared: &Shared, buffer_size: usize) -> Vec<Vec<u8>> {
    let mut spare = Vec::new();
    while shared.is_streaming() {
        if queue.pending() == 0 {
            error!("No transfers left in flight");
            shared.halt();
            break;
        }
        let Some(done) = queue.wait(TRANSFER_WAIT) else {
            continue;
        };
        let mut data = done.data;
        match done.status {
            Ok(()) if data.len() == buffer_size => {
                shared.produce(&mut data);
                queue.submit(data, buffer_size);
            }
            Ok(()) => {
                error!(
                    len = data.len(),
                    expected = buffer_size,
                    "Short bulk transfer, stopping stream"
                );
                spare.push(data);
                shared.halt();
            }
            Err(e) => {
                if shared.is_streaming() {
                    error!("Bulk transfer failed, stopping stream: {e}");
                }
                spare.push(data);
                shared.halt();
            }
        }
    }

    queue.cancel_all();
    while queue.pending() > 0 {
        match queue.wait(TRANSFER_WAIT) {
            Some(done) => spare.push(done.data),
            None => {
                warn!(
                    pending = queue.pending(),
                    "Gave up waiting on cancelled transfers"
                );
                break;
            }
        }
    }
    spare
}

/// Body of the consumer thread: decode each filled buffer and hand it to the
/// callback, until the stream stops or the callback asks it to.
fn run_consumer<F>(
    shared: &Shared,
    state: &mut ConsumerState,
    sample_type: SampleType,
    packing: bool,
    callback: &mut F,
) where
    F: FnMut(&SampleBlock<'_>) -> ControlFlow<()>,
{
    while let Some(ready) = shared.next_ready() {
        if ready.dropped > 0 {
            debug!(dropped = ready.dropped, "Consumer fell behind");
        }
        let block = decode_block(
            &ready.data,
            &mut state.convert,
            &mut state.iq,
            sample_type,
            packing,
            ready.dropped,
        );
        if callback(&block).is_break() {
            debug!("Callback ended the stream");
            shared.halt();
        }
        shared.lock_ring().release(ready);
    }
}

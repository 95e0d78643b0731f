//! Drives the device API against a scripted USB transport.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use anyhow::Result;
use nusb::transfer::{Completion, TransferError};
use waverave_airspy::transport::{BulkIn, Transport};
use waverave_airspy::{Airspy, Error, ReceiverFamily, RfPort, SampleType};

const RESET: u8 = 0;
const RECEIVER_MODE: u8 = 1;
const VERSION_STRING_READ: u8 = 10;
const BOARD_PARTID_SERIALNO_READ: u8 = 11;
const SET_SAMPLERATE: u8 = 12;
const SET_FREQ: u8 = 13;
const SET_LNA_GAIN: u8 = 14;
const SET_MIXER_GAIN: u8 = 15;
const SET_VGA_GAIN: u8 = 16;
const SET_LNA_AGC: u8 = 17;
const SET_MIXER_AGC: u8 = 18;
const SET_RF_BIAS: u8 = 20;
const GPIO_WRITE: u8 = 21;
const GET_SAMPLERATES: u8 = 25;
const SET_PACKING: u8 = 26;
const SET_RF_PORT: u8 = 28;

const RATES: [u32; 2] = [10_000_000, 2_500_000];
const NEVER: usize = usize::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Req {
    In { request: u8, value: u16, index: u16 },
    Out { request: u8, value: u16, index: u16, data: Vec<u8> },
    ClearHalt(u8),
}

#[derive(Default)]
struct Script {
    log: Mutex<Vec<Req>>,
    /// Fail every request with this code.
    fail_request: Mutex<Option<u8>>,
    /// Set once a reset request is seen; everything after fails.
    gone: AtomicBool,
    /// Bulk transfers completed so far.
    completed: AtomicUsize,
    /// Stop completing transfers after this many.
    limit: AtomicUsize,
    /// Fail the transfer with this sequence number.
    fail_at: AtomicUsize,
    /// Fail every clear-halt request.
    stuck_halt: AtomicBool,
}

impl Script {
    fn new() -> Arc<Self> {
        let s = Self::default();
        s.limit.store(NEVER, Ordering::Relaxed);
        s.fail_at.store(NEVER, Ordering::Relaxed);
        Arc::new(s)
    }

    fn take_log(&self) -> Vec<Req> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }

    fn check(&self, request: u8) -> Result<(), Error> {
        if self.gone.load(Ordering::Relaxed) || *self.fail_request.lock().unwrap() == Some(request)
        {
            return Err(Error::Transfer(TransferError::Disconnected));
        }
        if request == RESET {
            self.gone.store(true, Ordering::Relaxed);
        }
        Ok(())
    }
}

struct MockUsb {
    script: Arc<Script>,
    version: &'static str,
}

impl Transport for MockUsb {
    type Bulk = MockBulk;

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Result<Vec<u8>, Error> {
        self.script.log.lock().unwrap().push(Req::In {
            request,
            value,
            index,
        });
        self.script.check(request)?;
        let mut resp = match (request, index) {
            (GET_SAMPLERATES, 0) => (RATES.len() as u32).to_le_bytes().to_vec(),
            (GET_SAMPLERATES, _) => RATES.iter().flat_map(|r| r.to_le_bytes()).collect(),
            (VERSION_STRING_READ, _) => {
                let mut v = self.version.as_bytes().to_vec();
                v.resize(length as usize, 0);
                v
            }
            (BOARD_PARTID_SERIALNO_READ, _) => [0xa000_cb3c_u32, 0, 0, 0, 0x1234_5678, 0x9abc_def0]
                .iter()
                .flat_map(|w| w.to_le_bytes())
                .collect(),
            _ => vec![1],
        };
        resp.truncate(length as usize);
        Ok(resp)
    }

    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<(), Error> {
        self.script.log.lock().unwrap().push(Req::Out {
            request,
            value,
            index,
            data: data.to_vec(),
        });
        self.script.check(request)
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), Error> {
        self.script.log.lock().unwrap().push(Req::ClearHalt(endpoint));
        if self.script.stuck_halt.load(Ordering::Relaxed) {
            return Err(Error::Transfer(TransferError::Stall));
        }
        Ok(())
    }

    fn bulk_in(&self, _endpoint: u8) -> Result<MockBulk, Error> {
        Ok(MockBulk {
            script: self.script.clone(),
            pending: VecDeque::new(),
            cancelled: false,
        })
    }
}

/// Completes transfers as fast as they're waited on, tagging each one with
/// its sequence number in the first 8 bytes.
struct MockBulk {
    script: Arc<Script>,
    pending: VecDeque<(Vec<u8>, usize)>,
    cancelled: bool,
}

impl BulkIn for MockBulk {
    fn submit(&mut self, buf: Vec<u8>, len: usize) {
        self.pending.push_back((buf, len));
    }

    fn wait(&mut self, timeout: Duration) -> Option<Completion<Vec<u8>>> {
        assert!(!self.pending.is_empty(), "wait with nothing pending");
        if self.cancelled {
            let (data, _) = self.pending.pop_front()?;
            return Some(Completion {
                data,
                status: Err(TransferError::Cancelled),
            });
        }
        let seq = self.script.completed.load(Ordering::Relaxed);
        if seq >= self.script.limit.load(Ordering::Relaxed) {
            std::thread::sleep(timeout.min(Duration::from_millis(5)));
            return None;
        }
        self.script.completed.store(seq + 1, Ordering::Relaxed);
        let (mut data, len) = self.pending.pop_front()?;
        data.clear();
        data.resize(len, 0);
        data[..8].copy_from_slice(&(seq as u64).to_le_bytes());
        let status = if self.script.fail_at.load(Ordering::Relaxed) == seq {
            Err(TransferError::Stall)
        } else {
            Ok(())
        };
        Some(Completion { data, status })
    }

    fn cancel_all(&mut self) {
        self.cancelled = true;
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}

fn open(family: ReceiverFamily) -> (Airspy<MockUsb>, Arc<Script>) {
    let script = Script::new();
    let usb = MockUsb {
        script: script.clone(),
        version: match family {
            ReceiverFamily::Airspy => "AirSpy NOS v1.0.0-rc10",
            ReceiverFamily::HydraSdr => "HydraSDR RFOne v1.0.0",
        },
    };
    let dev = Airspy::from_transport(usb, family).unwrap();
    script.take_log();
    (dev, script)
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn set_in(request: u8, index: u16) -> Req {
    Req::In {
        request,
        value: 0,
        index,
    }
}

#[test]
fn open_reads_rates_and_disables_packing() {
    let script = Script::new();
    let usb = MockUsb {
        script: script.clone(),
        version: "AirSpy",
    };
    let dev = Airspy::from_transport(usb, ReceiverFamily::Airspy).unwrap();
    assert_eq!(
        script.take_log(),
        vec![
            set_in(GET_SAMPLERATES, 0),
            set_in(GET_SAMPLERATES, 2),
            set_in(SET_PACKING, 0),
        ]
    );
    assert_eq!(dev.sample_type(), SampleType::Float32Iq);
    assert_eq!(dev.sample_rates(), RATES.to_vec());
    assert!(!dev.packing_enabled());
    assert_eq!(dev.buffer_size(), 262_144);
}

#[test]
fn combined_gain_request_order() -> Result<()> {
    let (dev, script) = open(ReceiverFamily::Airspy);
    dev.set_linearity_gain(21)?;
    assert_eq!(
        script.take_log(),
        vec![
            set_in(SET_MIXER_AGC, 0),
            set_in(SET_LNA_AGC, 0),
            set_in(SET_VGA_GAIN, 13),
            set_in(SET_MIXER_GAIN, 12),
            set_in(SET_LNA_GAIN, 14),
        ]
    );
    Ok(())
}

#[test]
fn combined_gain_stops_at_first_failure() {
    let (dev, script) = open(ReceiverFamily::Airspy);
    *script.fail_request.lock().unwrap() = Some(SET_VGA_GAIN);
    assert!(dev.set_sensitivity_gain(10).is_err());
    assert_eq!(script.take_log().len(), 3);
}

#[test]
fn direct_gains_clamp() -> Result<()> {
    let (dev, script) = open(ReceiverFamily::Airspy);
    dev.set_lna_gain(200)?;
    dev.set_mixer_gain(16)?;
    dev.set_vga_gain(3)?;
    assert_eq!(
        script.take_log(),
        vec![
            set_in(SET_LNA_GAIN, 14),
            set_in(SET_MIXER_GAIN, 15),
            set_in(SET_VGA_GAIN, 3),
        ]
    );
    Ok(())
}

#[test]
fn sample_rate_encoding() -> Result<()> {
    let (dev, script) = open(ReceiverFamily::Airspy);
    dev.set_sample_rate(2_500_000)?;
    dev.set_sample_rate(6_000_000)?;
    dev.set_sample_type(SampleType::Float32Real)?;
    dev.set_sample_rate(6_000_000)?;
    assert_eq!(
        script.take_log(),
        vec![
            Req::ClearHalt(0x81),
            set_in(SET_SAMPLERATE, 1),
            Req::ClearHalt(0x81),
            set_in(SET_SAMPLERATE, 12_000),
            Req::ClearHalt(0x81),
            set_in(SET_SAMPLERATE, 6_000),
        ]
    );
    assert_eq!(dev.sample_rates(), vec![20_000_000, 5_000_000]);
    Ok(())
}

#[test]
fn frequency_width_follows_family() -> Result<()> {
    let (airspy, script) = open(ReceiverFamily::Airspy);
    airspy.set_freq(100_000_000)?;
    assert!(matches!(
        airspy.set_freq(5_000_000_000),
        Err(Error::InvalidParameter(_))
    ));
    assert_eq!(
        script.take_log(),
        vec![Req::Out {
            request: SET_FREQ,
            value: 0,
            index: 0,
            data: 100_000_000u32.to_le_bytes().to_vec(),
        }]
    );

    let (hydra, script) = open(ReceiverFamily::HydraSdr);
    hydra.set_freq(5_000_000_000)?;
    assert_eq!(
        script.take_log(),
        vec![Req::Out {
            request: SET_FREQ,
            value: 0,
            index: 0,
            data: 5_000_000_000u64.to_le_bytes().to_vec(),
        }]
    );
    Ok(())
}

#[test]
fn bias_tee_and_rf_port() -> Result<()> {
    let (airspy, script) = open(ReceiverFamily::Airspy);
    airspy.set_rf_bias(true)?;
    assert!(matches!(
        airspy.set_rf_port(RfPort::Rx1),
        Err(Error::Unsupported(_))
    ));
    assert_eq!(
        script.take_log(),
        vec![Req::Out {
            request: GPIO_WRITE,
            value: 1,
            index: (1 << 5) | 13,
            data: vec![],
        }]
    );

    let (hydra, script) = open(ReceiverFamily::HydraSdr);
    hydra.set_rf_bias(true)?;
    hydra.set_rf_port(RfPort::Rx2)?;
    assert_eq!(
        script.take_log(),
        vec![
            Req::Out {
                request: SET_RF_BIAS,
                value: 0,
                index: 1,
                data: vec![],
            },
            set_in(SET_RF_PORT, 2),
        ]
    );
    Ok(())
}

#[test]
fn info_reads() -> Result<()> {
    let (dev, _script) = open(ReceiverFamily::HydraSdr);
    let info = dev.info();
    assert_eq!(info.version_string()?, "HydraSDR RFOne v1.0.0");
    let serial = info.part_id_serial()?;
    assert_eq!(serial.part_id[0], 0xa000_cb3c);
    assert_eq!(serial.serial(), 0x1234_5678_9abc_def0);
    Ok(())
}

#[test]
fn delivery_order_and_drop_accounting() -> Result<()> {
    let (dev, _script) = open(ReceiverFamily::Airspy);
    dev.set_sample_type(SampleType::Raw)?;
    let samples_per_buffer = (dev.buffer_size() / 2) as u64;

    let (tx, rx) = mpsc::channel();
    let mut seen = 0;
    dev.start(move |block| {
        let tag = u64::from_le_bytes(block.bytes()[..8].try_into().unwrap());
        let _ = tx.send((tag, block.dropped_samples()));
        seen += 1;
        // Fall behind now and then so the ring overflows.
        if seen % 7 == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
        if seen == 200 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    wait_until(|| !dev.is_streaming());
    dev.stop()?;

    let blocks: Vec<(u64, u64)> = rx.try_iter().collect();
    assert_eq!(blocks.len(), 200);
    let mut expected = 0;
    for (tag, dropped) in blocks {
        assert_eq!(dropped % samples_per_buffer, 0);
        // Every transfer between two delivered ones was dropped, and counted.
        assert_eq!(tag - expected, dropped / samples_per_buffer);
        expected = tag + 1;
    }
    Ok(())
}

#[test]
fn busy_while_streaming() -> Result<()> {
    let (dev, script) = open(ReceiverFamily::Airspy);
    script.limit.store(0, Ordering::Relaxed);
    dev.start(|_| ControlFlow::Continue(()))?;
    assert!(dev.is_streaming());

    assert!(matches!(dev.set_packing(true), Err(Error::Busy)));
    assert!(!dev.packing_enabled());
    assert_eq!(dev.buffer_size(), 262_144);
    assert!(matches!(
        dev.set_sample_type(SampleType::Int16Iq),
        Err(Error::Busy)
    ));
    assert!(matches!(
        dev.set_conversion_filter_f32(&[0.25, 0.5, 0.25]),
        Err(Error::Busy)
    ));
    assert!(matches!(dev.start(|_| ControlFlow::Continue(())), Err(Error::Busy)));
    dev.set_freq(433_920_000)?;
    dev.set_vga_gain(5)?;

    dev.stop()?;
    dev.stop()?;
    assert!(!dev.is_streaming());

    dev.set_packing(true)?;
    assert!(dev.packing_enabled());
    assert_eq!(dev.buffer_size(), 147_456);
    dev.set_conversion_filter_f32(&[0.25, 0.5, 0.25])?;
    assert!(matches!(
        dev.set_conversion_filter_i16(&[1, 2]),
        Err(Error::InvalidParameter(_))
    ));
    Ok(())
}

#[test]
fn start_switches_receiver_on() -> Result<()> {
    let (dev, script) = open(ReceiverFamily::Airspy);
    script.limit.store(0, Ordering::Relaxed);
    dev.start(|_| ControlFlow::Continue(()))?;
    dev.stop()?;
    let mode = |value| Req::Out {
        request: RECEIVER_MODE,
        value,
        index: 0,
        data: vec![],
    };
    assert_eq!(
        script.take_log(),
        vec![mode(0), Req::ClearHalt(0x81), mode(1), mode(0)]
    );
    Ok(())
}

#[test]
fn start_ignores_stuck_halt() -> Result<()> {
    let (dev, script) = open(ReceiverFamily::Airspy);
    script.limit.store(0, Ordering::Relaxed);
    script.stuck_halt.store(true, Ordering::Relaxed);
    dev.start(|_| ControlFlow::Continue(()))?;
    assert!(dev.is_streaming());
    dev.stop()?;
    Ok(())
}

#[test]
fn idle_stop_switches_receiver_off() -> Result<()> {
    let (dev, script) = open(ReceiverFamily::HydraSdr);
    dev.stop()?;
    assert_eq!(
        script.take_log(),
        vec![Req::Out {
            request: RECEIVER_MODE,
            value: 0,
            index: 0,
            data: vec![],
        }]
    );
    Ok(())
}

#[test]
fn concurrent_stops_both_wait_for_threads() -> Result<()> {
    let (dev, _script) = open(ReceiverFamily::Airspy);
    let dev = Arc::new(dev);
    let in_callback = Arc::new(AtomicBool::new(false));
    let flag = in_callback.clone();
    dev.start(move |_| {
        flag.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(300));
        flag.store(false, Ordering::SeqCst);
        ControlFlow::Continue(())
    })?;
    wait_until(|| in_callback.load(Ordering::SeqCst));

    let other = dev.clone();
    let first = std::thread::spawn(move || other.stop());
    std::thread::sleep(Duration::from_millis(20));
    dev.stop()?;

    // Both threads are joined by the time either stop returns.
    assert!(!in_callback.load(Ordering::SeqCst));
    dev.set_packing(true)?;
    assert!(first.join().unwrap().is_ok());
    Ok(())
}

#[test]
fn stop_from_callback_is_refused() -> Result<()> {
    let (dev, _script) = open(ReceiverFamily::Airspy);
    let dev = Arc::new(dev);
    let (tx, rx) = mpsc::channel();
    let inner = dev.clone();
    dev.start(move |_| {
        let _ = tx.send(inner.stop());
        ControlFlow::Break(())
    })?;
    let result = rx.recv_timeout(Duration::from_secs(10))?;
    assert!(matches!(result, Err(Error::Busy)));
    wait_until(|| !dev.is_streaming());
    dev.stop()?;
    Ok(())
}

#[test]
fn finished_stream_is_reaped_on_restart() -> Result<()> {
    let (dev, _script) = open(ReceiverFamily::Airspy);
    dev.start(|_| ControlFlow::Break(()))?;
    wait_until(|| !dev.is_streaming());

    // No explicit stop: the next start cleans up the old stream first.
    let (tx, rx) = mpsc::channel();
    dev.start(move |_| {
        let _ = tx.send(());
        ControlFlow::Break(())
    })?;
    rx.recv_timeout(Duration::from_secs(10))?;
    wait_until(|| !dev.is_streaming());
    dev.stop()?;
    Ok(())
}

#[test]
fn transfer_error_ends_stream() -> Result<()> {
    let (dev, script) = open(ReceiverFamily::Airspy);
    script.fail_at.store(3, Ordering::Relaxed);
    dev.start(|_| ControlFlow::Continue(()))?;
    wait_until(|| !dev.is_streaming());
    dev.stop()?;

    // Lost buffers are replaced, so a new stream starts cleanly.
    script.fail_at.store(NEVER, Ordering::Relaxed);
    script.limit.store(0, Ordering::Relaxed);
    dev.start(|_| ControlFlow::Continue(()))?;
    assert!(dev.is_streaming());
    dev.stop()?;
    Ok(())
}

#[test]
fn close_after_reset_ignores_errors() -> Result<()> {
    let (dev, script) = open(ReceiverFamily::Airspy);
    script.limit.store(0, Ordering::Relaxed);
    dev.start(|_| ControlFlow::Continue(()))?;
    dev.reset()?;
    assert!(script.gone.load(Ordering::Relaxed));
    dev.close()?;
    Ok(())
}

#[test]
fn close_reports_stop_errors() -> Result<()> {
    let (dev, script) = open(ReceiverFamily::Airspy);
    script.limit.store(0, Ordering::Relaxed);
    dev.start(|_| ControlFlow::Continue(()))?;
    *script.fail_request.lock().unwrap() = Some(RECEIVER_MODE);
    assert!(dev.close().is_err());
    Ok(())
}

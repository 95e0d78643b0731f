/*!

This is a complete host crate for the [Airspy][airspy] family of USB receivers
(the Airspy R2/Mini and the [HydraSDR RFOne][hydrasdr]), made using the
pure-rust [`nusb`] crate for USB interfacing. It covers the functionality of
the original `libairspy` and `libhydrasdr` libraries.

[airspy]: https://airspy.com/
[hydrasdr]: https://hydrasdr.com/

The standard entry point for this library is [`open_first()`], which will open
the first available receiver. [`list_devices()`] and [`open_by_serial()`] pick a
specific one, and [`open_fd()`] wraps a USB file descriptor handed out by the
platform (as on Android).

Once a receiver is open, configure it and call [`Airspy::start`] with a sample
callback. Streaming runs on two threads owned by the device: one keeps bulk
transfers in flight, the other unpacks, converts, and filters each transfer
into a [`SampleBlock`] and hands it to the callback. The callback can return
[`ControlFlow::Break`] to end the stream, and [`Airspy::stop`] ends it from
the outside. A receiver can be started and stopped as many times as needed.

While streaming, anything that changes buffer sizes or sample formats is
refused with [`Error::Busy`]; tuning and gain changes are always allowed.

Here's an example program that tunes to the FM broadcast band, streams for a
few seconds, and estimates the average received power relative to full scale:

```no_run
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use waverave_airspy::{SampleType, Samples};

fn main() -> Result<()> {
    let airspy = waverave_airspy::open_first()?;

    airspy.set_sample_type(SampleType::Float32Iq)?;
    airspy.set_sample_rate(10_000_000)?;
    airspy.set_linearity_gain(12)?;
    airspy.set_freq(100_000_000)?;

    let power = Arc::new(Mutex::new((0.0f64, 0usize)));
    let sink = power.clone();
    airspy.start(move |block| {
        if let Samples::ComplexF32(samples) = block.samples() {
            let mut p = sink.lock().unwrap();
            for x in samples {
                p.0 += x.norm_sqr() as f64;
            }
            p.1 += samples.len();
        }
        ControlFlow::Continue(())
    })?;
    std::thread::sleep(std::time::Duration::from_secs(3));
    airspy.stop()?;

    let (sum, count) = *power.lock().unwrap();
    let average_power = (sum / count as f64).log10() * 10.;
    println!("Average Power = {average_power} dbFS");
    Ok(())
}
```

*/

#![warn(missing_docs)]

pub mod bridge;
mod consts;
mod convert;
pub mod debug;
mod error;
mod gain;
pub mod info;
pub mod iqconverter;
mod pool;
mod rx;
pub mod transport;

use std::ops::ControlFlow;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use bytemuck::Pod;
use core::mem::size_of;
use tracing::{debug, info, warn};

use crate::consts::*;
use crate::debug::Debug;
use crate::info::Info;
use crate::iqconverter::{IqConverterF32, IqConverterI16, IqConverters};
use crate::pool::BufferPool;
use crate::rx::{Session, Shared};
use crate::transport::{Transport, UsbTransport};

pub use crate::bridge::HostBridge;
pub use crate::convert::{
    ComplexF32, ComplexI16, SampleBlock, SampleType, Samples, convert_f32, convert_i16,
    le_samples, sample_count, unpack_samples,
};
pub use crate::error::{Error, ErrorCode};
pub use crate::gain::{GAIN_INDEX_MAX, GainCurve, GainStages};

/// Get the version of this library.
pub fn lib_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Which family of receiver a device belongs to.
///
/// The two families speak the same vendor protocol, with a few differences:
/// HydraSDR takes a 64-bit tuning frequency, has a dedicated bias-tee request,
/// and has a selectable RF input port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiverFamily {
    /// Airspy R2 and Airspy Mini.
    Airspy,
    /// HydraSDR RFOne.
    HydraSdr,
}

impl std::fmt::Display for ReceiverFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Airspy => f.write_str("Airspy"),
            Self::HydraSdr => f.write_str("HydraSDR"),
        }
    }
}

impl ReceiverFamily {
    /// Prefix of the USB serial-number descriptor. The rest is 16 hex digits.
    pub fn serial_prefix(self) -> &'static str {
        match self {
            Self::Airspy => "AIRSPY SN:",
            Self::HydraSdr => "HYDRASDR SN:",
        }
    }

    /// Prefix every firmware version string of this family starts with.
    pub fn firmware_prefix(self) -> &'static str {
        match self {
            Self::Airspy => "AirSpy",
            Self::HydraSdr => "HydraSDR RFOne",
        }
    }

    /// Identify the family from a firmware version string.
    pub fn from_firmware(version: &str) -> Option<Self> {
        [Self::HydraSdr, Self::Airspy]
            .into_iter()
            .find(|f| version.starts_with(f.firmware_prefix()))
    }

    /// Parse a serial-number descriptor of this family into its 64-bit value.
    pub fn parse_serial(self, serial: &str) -> Option<u64> {
        let hex = serial.strip_prefix(self.serial_prefix())?;
        if hex.len() != 16 {
            return None;
        }
        u64::from_str_radix(hex, 16).ok()
    }
}

/// An RF input port on the HydraSDR RFOne.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfPort {
    Rx0 = 0,
    Rx1 = 1,
    Rx2 = 2,
}

impl RfPort {
    /// Convert a port number into a port.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Rx0),
            1 => Some(Self::Rx1),
            2 => Some(Self::Rx2),
            _ => None,
        }
    }
}

impl std::fmt::Display for RfPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rx0 => f.write_str("RX0"),
            Self::Rx1 => f.write_str("RX1"),
            Self::Rx2 => f.write_str("RX2"),
        }
    }
}

/// A receiver that was found on the bus, and can be opened.
///
/// These are mostly returned from calling [`list_devices`].
pub struct AirspyDescriptor {
    info: nusb::DeviceInfo,
    family: ReceiverFamily,
}

impl AirspyDescriptor {
    fn from_info(info: nusb::DeviceInfo) -> Option<Self> {
        let family = match (info.vendor_id(), info.product_id()) {
            (HYDRASDR_USB_VID, HYDRASDR_USB_PID) => ReceiverFamily::HydraSdr,
            // Shared by the Airspy and the legacy HydraSDR boards.
            (OPENMOKO_USB_VID, AIRSPY_USB_PID) => {
                let hydra = ReceiverFamily::HydraSdr.serial_prefix();
                match info.serial_number() {
                    Some(s) if s.starts_with(hydra) => ReceiverFamily::HydraSdr,
                    _ => ReceiverFamily::Airspy,
                }
            }
            _ => return None,
        };
        Some(Self { info, family })
    }

    /// Get the serial-number descriptor string, as reported over USB.
    pub fn serial_str(&self) -> Option<&str> {
        self.info.serial_number()
    }

    /// Get the 64-bit serial number, if the descriptor is well-formed.
    pub fn serial(&self) -> Option<u64> {
        self.family.parse_serial(self.info.serial_number()?)
    }

    /// The receiver family, as guessed from the USB descriptors. The
    /// firmware's own answer is checked on [`open`][Self::open].
    pub fn family(&self) -> ReceiverFamily {
        self.family
    }

    /// Try and open this receiver.
    ///
    /// The firmware version string must identify it as one of the supported
    /// families, or this fails with [`Error::NotFound`].
    pub fn open(self) -> Result<Airspy, Error> {
        let transport = UsbTransport::open(&self.info)?;
        let version = read_version(&transport)?;
        let Some(family) = ReceiverFamily::from_firmware(&version) else {
            debug!(%version, "Firmware version not recognized");
            return Err(Error::NotFound);
        };
        if family != self.family {
            debug!(expected = %self.family, found = %family, "Firmware family differs from USB descriptor");
        }
        Airspy::from_transport(transport, family)
    }
}

/// List all receivers of either family on the bus.
pub fn list_devices() -> Result<Vec<AirspyDescriptor>, Error> {
    Ok(nusb::list_devices()?
        .filter_map(AirspyDescriptor::from_info)
        .collect())
}

/// Open the first receiver that passes its identity check.
///
/// Candidates that fail to open are skipped over.
pub fn open_first() -> Result<Airspy, Error> {
    for desc in list_devices()? {
        match desc.open() {
            Ok(dev) => return Ok(dev),
            Err(e) => debug!("Skipping receiver: {e}"),
        }
    }
    Err(Error::NotFound)
}

/// Open the receiver with the given 64-bit serial number.
pub fn open_by_serial(serial: u64) -> Result<Airspy, Error> {
    for desc in list_devices()? {
        if desc.serial() != Some(serial) {
            continue;
        }
        match desc.open() {
            Ok(dev) => return Ok(dev),
            Err(e) => debug!("Skipping receiver: {e}"),
        }
    }
    Err(Error::NotFound)
}

/// Open a receiver from a USB file descriptor, as handed out by the Android
/// USB manager.
///
/// The family is taken from the firmware version string when it's
/// recognizable, and from `family` otherwise.
#[cfg(any(target_os = "android", target_os = "linux"))]
pub fn open_fd(fd: std::os::fd::OwnedFd, family: ReceiverFamily) -> Result<Airspy, Error> {
    let transport = UsbTransport::from_fd(fd)?;
    let family = read_version(&transport)
        .ok()
        .and_then(|v| ReceiverFamily::from_firmware(&v))
        .unwrap_or(family);
    Airspy::from_transport(transport, family)
}

/// Opening from a file descriptor is only possible on Linux and Android.
#[cfg(not(any(target_os = "android", target_os = "linux")))]
pub fn open_fd<Fd>(_fd: Fd, _family: ReceiverFamily) -> Result<Airspy, Error> {
    Err(Error::Unsupported("opening from a file descriptor"))
}

pub(crate) fn read_version<T: Transport>(transport: &T) -> Result<String, Error> {
    let mut resp = transport.control_in(
        ControlRequest::VersionStringRead as u8,
        0,
        0,
        VERSION_STRING_LEN,
    )?;
    if let Some(end) = resp.iter().position(|&b| b == 0) {
        resp.truncate(end);
    }
    String::from_utf8(resp).map_err(|_| Error::ReturnData)
}

/// Pick the value sent with the set-samplerate request.
///
/// A rate that exactly matches an entry in the device's table is sent as that
/// entry's index. Any other rate of at least 1 MHz is sent by value in kHz,
/// doubled for IQ output since the receiver's ADC runs at twice the IQ rate.
/// Anything below 1 MHz is taken to already be a table index.
pub fn encode_sample_rate(table: &[u32], rate: u32, iq: bool) -> Result<u16, Error> {
    let mut value = rate;
    if rate >= MIN_SAMPLERATE_BY_VALUE {
        if let Some(i) = table.iter().position(|&r| r == rate) {
            value = i as u32;
        } else {
            if iq {
                value = value.saturating_mul(2);
            }
            value /= 1000;
        }
    }
    u16::try_from(value).map_err(|_| Error::ValueRange {
        range: 0..(u16::MAX as u32 + 1),
        val: value,
    })
}

enum State {
    Configured {
        pool: BufferPool,
        iq: IqConverters,
    },
    Streaming(Session),
    /// A stop is in progress on another thread. Holds the stream's consumer
    /// thread, which can't wait for that stop to finish.
    Stopping(Option<ThreadId>),
    Closed,
}

struct Inner {
    state: State,
    sample_type: SampleType,
    reset_command: bool,
}

/// An Airspy-family receiver. This is the main struct for talking to the
/// hardware.
///
/// Every method takes `&self`, so the device can be shared between threads
/// (say, in an [`Arc`]) and retuned from one while streaming is controlled
/// from another. The sample callback can also call back into the device, as
/// long as it doesn't try to [stop][Self::stop] the stream it's running in.
///
/// Dropping the device stops any running stream and releases the USB
/// interface. Use [`close`][Self::close] to see any error from that.
pub struct Airspy<T: Transport = UsbTransport> {
    transport: T,
    family: ReceiverFamily,
    sample_rates: Vec<u32>,
    shared: Arc<Shared>,
    inner: Mutex<Inner>,
    /// Signalled whenever the state leaves `Stopping`.
    settled: Condvar,
}

impl<T: Transport> Airspy<T> {
    /// Set up a receiver on an already-claimed transport.
    ///
    /// This reads the device's sample rate table, turns sample packing off,
    /// and allocates all streaming buffers. The sample type starts out as
    /// [`SampleType::Float32Iq`].
    pub fn from_transport(transport: T, family: ReceiverFamily) -> Result<Self, Error> {
        let pool = BufferPool::allocate(false)?;
        let mut dev = Self {
            transport,
            family,
            sample_rates: Vec::new(),
            shared: Arc::new(Shared::new()),
            inner: Mutex::new(Inner {
                state: State::Configured {
                    pool,
                    iq: IqConverters::default(),
                },
                sample_type: SampleType::default(),
                reset_command: false,
            }),
            settled: Condvar::new(),
        };
        dev.sample_rates = dev.read_sample_rates()?;
        dev.set_param(ControlRequest::SetPacking, 0)?;
        info!(
            family = %family,
            rates = ?dev.sample_rates,
            "Opened receiver"
        );
        Ok(dev)
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the device state, waiting out a stop running on another thread.
    ///
    /// Fails with [`Error::Busy`] on the consumer thread of the stream being
    /// stopped, as that stop is waiting on it.
    fn lock_settled(&self) -> Result<MutexGuard<'_, Inner>, Error> {
        let mut inner = self.lock_inner();
        loop {
            match &inner.state {
                State::Stopping(Some(id)) if *id == thread::current().id() => {
                    return Err(Error::Busy);
                }
                State::Stopping(_) => {
                    inner = self
                        .settled
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                _ => return Ok(inner),
            }
        }
    }

    /// Lock the device state, making sure no stream is running.
    ///
    /// A stream that already ended on its own (the callback broke out, or a
    /// transfer failed) is cleaned up first.
    fn lock_idle(&self) -> Result<MutexGuard<'_, Inner>, Error> {
        loop {
            let inner = self.lock_settled()?;
            let finished = match &inner.state {
                State::Configured { .. } => return Ok(inner),
                State::Streaming(s) => !self.shared.is_streaming() && !s.is_consumer_thread(),
                State::Stopping(_) | State::Closed => false,
            };
            if !finished {
                return Err(Error::Busy);
            }
            drop(inner);
            self.stop()?;
        }
    }

    fn read_u8(&self, req: ControlRequest, idx: u16) -> Result<u8, Error> {
        let ret = self.transport.control_in(req as u8, 0, idx, 1)?;
        ret.first().copied().ok_or(Error::ReturnData)
    }

    /// Most settings are sent as IN requests, with the value in the index
    /// field and a one-byte status coming back.
    fn set_param(&self, req: ControlRequest, idx: u16) -> Result<(), Error> {
        self.read_u8(req, idx).map(|_| ())
    }

    fn write_u16(&self, req: ControlRequest, idx: u16, val: u16) -> Result<(), Error> {
        self.transport.control_out(req as u8, val, idx, &[])
    }

    fn write_bytes(&self, req: ControlRequest, data: &[u8]) -> Result<(), Error> {
        self.transport.control_out(req as u8, 0, 0, data)
    }

    fn read_bytes(&self, req: ControlRequest, len: u16) -> Result<Vec<u8>, Error> {
        self.transport.control_in(req as u8, 0, 0, len)
    }

    fn read_struct<S>(&self, req: ControlRequest) -> Result<S, Error>
    where
        S: Pod,
    {
        let size = size_of::<S>();
        let mut resp = self.read_bytes(req, size as u16)?;
        if resp.len() < size {
            return Err(Error::ReturnData);
        }
        resp.truncate(size);
        Ok(bytemuck::pod_read_unaligned(&resp))
    }

    fn read_sample_rates(&self) -> Result<Vec<u32>, Error> {
        let req = ControlRequest::GetSamplerates as u8;
        let count = self.transport.control_in(req, 0, 0, 4)?;
        let count: [u8; 4] = count
            .get(..4)
            .and_then(|c| c.try_into().ok())
            .ok_or(Error::ReturnData)?;
        let count = u32::from_le_bytes(count);
        let len = count
            .checked_mul(4)
            .and_then(|l| u16::try_from(l).ok())
            .ok_or(Error::ReturnData)?;
        let table = self.transport.control_in(req, 0, count as u16, len)?;
        if table.len() < len as usize {
            return Err(Error::ReturnData);
        }
        Ok(table
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn set_receiver_mode(&self, mode: ReceiverMode) -> Result<(), Error> {
        self.write_u16(ControlRequest::ReceiverMode, 0, mode as u16)
    }

    /// Access the debug commands for the receiver.
    pub fn debug(&self) -> Debug<'_, T> {
        Debug::new(self)
    }

    /// Access the info commands for the receiver.
    pub fn info(&self) -> Info<'_, T> {
        Info::new(self)
    }

    /// Get the receiver family.
    pub fn family(&self) -> ReceiverFamily {
        self.family
    }

    /// Start streaming, handing each block of samples to `callback` on a
    /// dedicated consumer thread.
    ///
    /// The callback can return [`ControlFlow::Break`] to end the stream. The
    /// device then stays in its streaming state until [`stop`][Self::stop] is
    /// called, or until the next call that needs the device idle.
    ///
    /// Fails with [`Error::Busy`] if a stream is already running.
    pub fn start<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnMut(&SampleBlock<'_>) -> ControlFlow<()> + Send + 'static,
    {
        let mut inner = self.lock_idle()?;
        let (mut pool, mut iq) = match std::mem::replace(&mut inner.state, State::Stopping(None))
        {
            State::Configured { pool, iq } => (pool, iq),
            other => {
                inner.state = other;
                return Err(Error::Busy);
            }
        };

        let prepared = pool.fill().and_then(|()| {
            self.set_receiver_mode(ReceiverMode::Off)?;
            if let Err(e) = self.transport.clear_halt(RX_ENDPOINT_ADDRESS) {
                debug!("Couldn't clear halt on the receive endpoint: {e}");
            }
            let queue = self.transport.bulk_in(RX_ENDPOINT_ADDRESS)?;
            self.set_receiver_mode(ReceiverMode::Receive)?;
            Ok(queue)
        });
        let queue = match prepared {
            Ok(queue) => queue,
            Err(e) => {
                inner.state = State::Configured { pool, iq };
                self.settled.notify_all();
                return Err(e);
            }
        };

        iq.reset();
        match Session::spawn(&self.shared, pool, queue, iq, inner.sample_type, callback) {
            Ok(session) => {
                debug!(
                    sample_type = %inner.sample_type,
                    "Streaming started"
                );
                inner.state = State::Streaming(session);
                Ok(())
            }
            Err((e, pool, iq)) => {
                inner.state = State::Configured { pool, iq };
                self.settled.notify_all();
                drop(inner);
                let _ = self.set_receiver_mode(ReceiverMode::Off);
                Err(e)
            }
        }
    }

    /// Stop streaming and wait for the pipeline threads to finish.
    ///
    /// The receiver is switched off even if it wasn't streaming. If another
    /// thread is already stopping the stream, this waits for it to finish.
    /// Calling this from inside the sample callback fails with
    /// [`Error::Busy`]; return [`ControlFlow::Break`] from the callback
    /// instead.
    pub fn stop(&self) -> Result<(), Error> {
        let session = {
            let mut inner = self.lock_settled()?;
            let consumer = match &inner.state {
                State::Streaming(s) if s.is_consumer_thread() => return Err(Error::Busy),
                State::Streaming(s) => s.consumer_id(),
                State::Closed => return Ok(()),
                State::Configured { .. } | State::Stopping(_) => {
                    drop(inner);
                    return self.set_receiver_mode(ReceiverMode::Off);
                }
            };
            match std::mem::replace(&mut inner.state, State::Stopping(Some(consumer))) {
                State::Streaming(s) => s,
                other => {
                    inner.state = other;
                    return Ok(());
                }
            }
        };

        self.shared.request_stop();
        let mode = self.set_receiver_mode(ReceiverMode::Off);
        let (pool, iq, joined) = session.finish(&self.shared);
        self.lock_inner().state = State::Configured { pool, iq };
        self.settled.notify_all();
        debug!("Streaming stopped");
        mode.and(joined)
    }

    /// Check if the device is actively streaming.
    ///
    /// Goes false as soon as a stop is requested, the callback ends the
    /// stream, or a transfer fails.
    pub fn is_streaming(&self) -> bool {
        self.shared.is_streaming()
    }

    /// Stop streaming and release the device.
    ///
    /// If the device was [reset][Self::reset] beforehand, errors from stopping
    /// are ignored, as the receiver has already dropped off the bus.
    pub fn close(self) -> Result<(), Error> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<(), Error> {
        let stopped = self.stop();
        if stopped.is_err() {
            // Could be the consumer thread dropping the last handle.
            self.shared.request_stop();
        }
        let mut inner = self.lock_inner();
        let reset = inner.reset_command;
        inner.state = State::Closed;
        match stopped {
            Err(e) if !reset => Err(e),
            _ => Ok(()),
        }
    }

    /// Set the tuning frequency, in Hz.
    ///
    /// Airspy receivers take a 32-bit frequency; HydraSDR takes the full 64
    /// bits.
    pub fn set_freq(&self, freq_hz: u64) -> Result<(), Error> {
        match self.family {
            ReceiverFamily::HydraSdr => {
                self.write_bytes(ControlRequest::SetFreq, &freq_hz.to_le_bytes())
            }
            ReceiverFamily::Airspy => {
                let freq = u32::try_from(freq_hz)
                    .map_err(|_| Error::InvalidParameter("frequency must fit in 32 bits"))?;
                self.write_bytes(ControlRequest::SetFreq, &freq.to_le_bytes())
            }
        }
    }

    /// Get the sample rates the receiver supports, in samples per second of
    /// the current [sample type][Self::set_sample_type].
    ///
    /// Real sample types run at twice the IQ rate.
    pub fn sample_rates(&self) -> Vec<u32> {
        let iq = self.sample_type().is_iq();
        self.sample_rates
            .iter()
            .map(|&r| if iq { r } else { r * 2 })
            .collect()
    }

    /// Set the sample rate.
    ///
    /// This can be a rate from [`sample_rates`][Self::sample_rates], an index
    /// into that table, or any other rate of at least 1 MHz, which the
    /// firmware will try to synthesize. See [`encode_sample_rate`] for the
    /// exact rules.
    pub fn set_sample_rate(&self, rate: u32) -> Result<(), Error> {
        let iq = self.sample_type().is_iq();
        let value = encode_sample_rate(&self.sample_rates, rate, iq)?;
        if let Err(e) = self.transport.clear_halt(RX_ENDPOINT_ADDRESS) {
            debug!("Couldn't clear halt on the receive endpoint: {e}");
        }
        self.set_param(ControlRequest::SetSamplerate, value)
    }

    /// Get the current sample type.
    pub fn sample_type(&self) -> SampleType {
        self.lock_inner().sample_type
    }

    /// Set the sample type delivered to the callback.
    ///
    /// Fails with [`Error::Busy`] while streaming.
    pub fn set_sample_type(&self, sample_type: SampleType) -> Result<(), Error> {
        let mut inner = self.lock_idle()?;
        inner.sample_type = sample_type;
        Ok(())
    }

    /// Turn 12-bit sample packing on or off.
    ///
    /// Packing cuts USB bandwidth by a quarter, at the cost of unpacking on the
    /// host. The streaming buffers are re-allocated to suit the new transfer
    /// size. Fails with [`Error::Busy`] while streaming.
    pub fn set_packing(&self, enable: bool) -> Result<(), Error> {
        let mut inner = self.lock_idle()?;
        let State::Configured { pool, .. } = &mut inner.state else {
            return Err(Error::Busy);
        };
        self.set_param(ControlRequest::SetPacking, enable as u16)?;
        if pool.packing() != enable {
            pool.reconfigure(enable)?;
        }
        Ok(())
    }

    /// Check whether sample packing is on.
    pub fn packing_enabled(&self) -> bool {
        match &self.lock_inner().state {
            State::Configured { pool, .. } => pool.packing(),
            State::Streaming(s) => s.packing(),
            State::Stopping(_) | State::Closed => false,
        }
    }

    /// Size of each USB transfer, in bytes.
    pub fn buffer_size(&self) -> usize {
        pool::buffer_size_for(self.packing_enabled())
    }

    /// Replace the half-band filter used for floating-point IQ output.
    ///
    /// The kernel must have an odd number of taps, at least 3. Fails with
    /// [`Error::Busy`] while streaming.
    pub fn set_conversion_filter_f32(&self, kernel: &[f32]) -> Result<(), Error> {
        let converter = IqConverterF32::new(kernel)?;
        let mut inner = self.lock_idle()?;
        let State::Configured { iq, .. } = &mut inner.state else {
            return Err(Error::Busy);
        };
        iq.f32 = converter;
        Ok(())
    }

    /// Replace the half-band filter used for 16-bit integer IQ output.
    ///
    /// The kernel must have an odd number of taps, at least 3. Fails with
    /// [`Error::Busy`] while streaming.
    pub fn set_conversion_filter_i16(&self, kernel: &[i16]) -> Result<(), Error> {
        let converter = IqConverterI16::new(kernel)?;
        let mut inner = self.lock_idle()?;
        let State::Configured { iq, .. } = &mut inner.state else {
            return Err(Error::Busy);
        };
        iq.i16 = converter;
        Ok(())
    }

    /// Set the LNA gain, 0-14. Larger values are clamped.
    pub fn set_lna_gain(&self, value: u8) -> Result<(), Error> {
        self.set_param(ControlRequest::SetLnaGain, value.min(14) as u16)
    }

    /// Set the mixer gain, 0-15. Larger values are clamped.
    pub fn set_mixer_gain(&self, value: u8) -> Result<(), Error> {
        self.set_param(ControlRequest::SetMixerGain, value.min(15) as u16)
    }

    /// Set the VGA (IF) gain, 0-15. Larger values are clamped.
    pub fn set_vga_gain(&self, value: u8) -> Result<(), Error> {
        self.set_param(ControlRequest::SetVgaGain, value.min(15) as u16)
    }

    /// Turn the LNA's automatic gain control on or off.
    pub fn set_lna_agc(&self, enable: bool) -> Result<(), Error> {
        self.set_param(ControlRequest::SetLnaAgc, enable as u16)
    }

    /// Turn the mixer's automatic gain control on or off.
    pub fn set_mixer_agc(&self, enable: bool) -> Result<(), Error> {
        self.set_param(ControlRequest::SetMixerAgc, enable as u16)
    }

    /// Set all three gain stages from a single index along a gain curve.
    ///
    /// Both AGCs are switched off first. Indices above [`GAIN_INDEX_MAX`] are
    /// clamped. Stops at the first failed request.
    pub fn set_combined_gain(&self, curve: GainCurve, index: u8) -> Result<(), Error> {
        let stages = curve.stages(index);
        self.set_mixer_agc(false)?;
        self.set_lna_agc(false)?;
        self.set_vga_gain(stages.vga)?;
        self.set_mixer_gain(stages.mixer)?;
        self.set_lna_gain(stages.lna)
    }

    /// Set the combined gain along the [linearity curve][GainCurve::Linearity].
    pub fn set_linearity_gain(&self, index: u8) -> Result<(), Error> {
        self.set_combined_gain(GainCurve::Linearity, index)
    }

    /// Set the combined gain along the [sensitivity curve][GainCurve::Sensitivity].
    pub fn set_sensitivity_gain(&self, index: u8) -> Result<(), Error> {
        self.set_combined_gain(GainCurve::Sensitivity, index)
    }

    /// Turn the bias tee on the antenna port on or off.
    pub fn set_rf_bias(&self, enable: bool) -> Result<(), Error> {
        match self.family {
            ReceiverFamily::HydraSdr => {
                self.write_u16(ControlRequest::SetRfBias, enable as u16, 0)
            }
            ReceiverFamily::Airspy => {
                self.debug()
                    .gpio_write(AIRSPY_BIAS_PORT, AIRSPY_BIAS_PIN, enable)
            }
        }
    }

    /// Select the RF input port. Only the HydraSDR has more than one.
    pub fn set_rf_port(&self, port: RfPort) -> Result<(), Error> {
        match self.family {
            ReceiverFamily::HydraSdr => self.set_param(ControlRequest::SetRfPort, port as u16),
            ReceiverFamily::Airspy => Err(Error::Unsupported("RF port selection on Airspy")),
        }
    }

    /// Reset the receiver.
    ///
    /// The receiver drops off the bus immediately, so the request's result is
    /// ignored. The handle should be [closed][Self::close] afterwards.
    pub fn reset(&self) -> Result<(), Error> {
        if let Err(e) = self.set_param(ControlRequest::Reset, 0) {
            debug!("Reset request didn't complete cleanly: {e}");
        }
        self.lock_inner().reset_command = true;
        warn!("Receiver reset; the handle should be closed");
        Ok(())
    }
}

impl<T: Transport> Drop for Airspy<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error while closing receiver: {e}");
        }
    }
}

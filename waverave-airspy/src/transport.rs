//! USB transport seam.
//!
//! Everything the driver needs from USB goes through the [`Transport`] and
//! [`BulkIn`] traits: vendor control transfers against the device, clearing a
//! halted endpoint, and a queue of bulk-IN transfers. [`UsbTransport`] is the
//! real implementation on top of [`nusb`]. Other implementations (a scripted
//! mock in tests, or a host-provided USB stack) can be handed to
//! [`Airspy::from_transport`][crate::Airspy::from_transport].
//!
//! All calls are blocking. Control transfers are driven to completion with
//! [`futures_lite::future::block_on`], so they can be made from inside an
//! async task. Bulk completions are waited on by the streaming thread with a
//! small Tokio runtime of its own, under [`tokio::time::timeout`], so it can
//! notice a stop request.

use std::time::Duration;

use futures_lite::future::block_on;
use nusb::transfer::{Completion, ControlIn, ControlOut, ControlType, Queue, Recipient, RequestBuffer};

use crate::Error;

/// Vendor control and bulk-IN access to one claimed USB interface.
pub trait Transport: Send + Sync + 'static {
    /// Bulk-IN queue type handed to the streaming thread.
    type Bulk: BulkIn;

    /// Issue a vendor IN request to the device and return the response bytes.
    fn control_in(&self, request: u8, value: u16, index: u16, length: u16)
    -> Result<Vec<u8>, Error>;

    /// Issue a vendor OUT request to the device.
    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<(), Error>;

    /// Clear a halt/stall condition on an endpoint.
    fn clear_halt(&self, endpoint: u8) -> Result<(), Error>;

    /// Open a queue of bulk-IN transfers on an endpoint.
    fn bulk_in(&self, endpoint: u8) -> Result<Self::Bulk, Error>;
}

/// A queue of bulk-IN transfers, owned by the streaming thread.
pub trait BulkIn: Send + 'static {
    /// Submit a transfer reading `len` bytes, reusing `buf`'s allocation.
    fn submit(&mut self, buf: Vec<u8>, len: usize);

    /// Wait up to `timeout` for the oldest pending transfer to complete.
    ///
    /// Returns `None` on timeout. Must only be called with at least one
    /// transfer pending.
    fn wait(&mut self, timeout: Duration) -> Option<Completion<Vec<u8>>>;

    /// Request cancellation of every pending transfer. Cancelled transfers
    /// still complete, with an error status, and must be waited on.
    fn cancel_all(&mut self);

    /// Number of submitted transfers that haven't been returned by `wait`.
    fn pending(&self) -> usize;
}

/// The [`nusb`] implementation of [`Transport`].
pub struct UsbTransport {
    interface: nusb::Interface,
}

impl UsbTransport {
    /// Open a USB device and claim interface 0.
    pub fn open(info: &nusb::DeviceInfo) -> Result<Self, Error> {
        let device = info.open()?;
        Self::claim(device)
    }

    /// Wrap an already-opened USB file descriptor, as handed out by the
    /// Android USB manager.
    #[cfg(any(target_os = "android", target_os = "linux"))]
    pub fn from_fd(fd: std::os::fd::OwnedFd) -> Result<Self, Error> {
        let device = nusb::Device::from_fd(fd)?;
        Self::claim(device)
    }

    fn claim(device: nusb::Device) -> Result<Self, Error> {
        #[cfg(not(target_os = "windows"))]
        {
            let config = device
                .active_configuration()
                .map_err(std::io::Error::from)?;
            if config.configuration_value() != 1 {
                device.detach_kernel_driver(0)?;
                device.set_configuration(1)?;
            }
        }
        let interface = device.detach_and_claim_interface(0)?;
        Ok(Self { interface })
    }
}

impl Transport for UsbTransport {
    type Bulk = UsbBulkIn;

    fn control_in(
        &self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Result<Vec<u8>, Error> {
        Ok(block_on(self.interface.control_in(ControlIn {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
            length,
        }))
        .into_result()?)
    }

    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<(), Error> {
        block_on(self.interface.control_out(ControlOut {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
            data,
        }))
        .into_result()?;
        Ok(())
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), Error> {
        Ok(self.interface.clear_halt(endpoint)?)
    }

    fn bulk_in(&self, endpoint: u8) -> Result<UsbBulkIn, Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        Ok(UsbBulkIn {
            queue: self.interface.bulk_in_queue(endpoint),
            rt: Some(rt),
        })
    }
}

/// Bulk-IN queue backed by [`nusb`].
///
/// Carries the runtime its waits run on. It's only ever entered from the
/// streaming thread.
pub struct UsbBulkIn {
    queue: Queue<RequestBuffer>,
    rt: Option<tokio::runtime::Runtime>,
}

impl BulkIn for UsbBulkIn {
    fn submit(&mut self, buf: Vec<u8>, len: usize) {
        self.queue.submit(RequestBuffer::reuse(buf, len));
    }

    fn wait(&mut self, timeout: Duration) -> Option<Completion<Vec<u8>>> {
        let rt = self.rt.as_ref()?;
        // `next_complete` is cancel-safe, so giving up on it loses nothing.
        rt.block_on(tokio::time::timeout(timeout, self.queue.next_complete()))
            .ok()
    }

    fn cancel_all(&mut self) {
        self.queue.cancel_all();
    }

    fn pending(&self) -> usize {
        self.queue.pending()
    }
}

impl Drop for UsbBulkIn {
    fn drop(&mut self) {
        // The queue can be dropped on the caller's thread if starting fails,
        // and that thread may itself be inside a runtime.
        if let Some(rt) = self.rt.take() {
            rt.shutdown_background();
        }
    }
}

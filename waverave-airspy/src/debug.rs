/*!
Debug operations for the receiver.

The receiver exposes a number of internal debugging operations through the
[`Debug`][struct@Debug] struct, allowing for direct read & write of the clock
generator, the tuner, the MCU's GPIO pins, and the SPI flash holding the
firmware.

The way to do this is by calling [`Airspy::debug`] with an open receiver, like
so:

```no_run

# use anyhow::Result;
# fn main() -> Result<()> {

use waverave_airspy::debug::*;

let airspy = waverave_airspy::open_first()?;
let debug = airspy.debug();

// Dump the tuner's register file
for reg in 0..32 {
    println!("R82x[{reg:2}] = 0x{:02x}", debug.r82x_read(reg)?);
}

# Ok(())
# }
```

 */
use std::ops::Range;

use crate::consts::{ControlRequest, SPIFLASH_END_ADDR};
use crate::transport::Transport;
use crate::{Airspy, Error};

const GPIO_PORTS: u32 = 8;
const GPIO_PINS: u32 = 32;

/// Debug operations for the receiver, including programming operations.
///
/// Borrows the device while doing operations.
pub struct Debug<'a, T: Transport> {
    inner: &'a Airspy<T>,
}

impl<'a, T: Transport> Debug<'a, T> {
    pub(crate) fn new(inner: &'a Airspy<T>) -> Debug<'a, T> {
        Self { inner }
    }

    /// Access the attached SPI flash.
    ///
    /// See [`SpiFlash`] for what to do with it.
    pub fn spi_flash(&self) -> SpiFlash<'_, T> {
        SpiFlash { inner: self.inner }
    }

    /// Read a register from the SI5351C clock generator.
    pub fn si5351c_read(&self, register: u8) -> Result<u8, Error> {
        self.inner
            .read_u8(ControlRequest::Si5351cRead, register as u16)
    }

    /// Write a register to the SI5351C clock generator.
    pub fn si5351c_write(&self, register: u8, value: u8) -> Result<(), Error> {
        self.inner
            .write_u16(ControlRequest::Si5351cWrite, register as u16, value as u16)
    }

    /// Read a register from the R820T tuner.
    pub fn r82x_read(&self, register: u8) -> Result<u8, Error> {
        self.inner
            .read_u8(ControlRequest::R82xRead, register as u16)
    }

    /// Write a register to the R820T tuner.
    pub fn r82x_write(&self, register: u8, value: u8) -> Result<(), Error> {
        self.inner
            .write_u16(ControlRequest::R82xWrite, register as u16, value as u16)
    }

    /// Read the level of a GPIO pin.
    pub fn gpio_read(&self, port: u8, pin: u8) -> Result<bool, Error> {
        let idx = port_pin(port, pin)?;
        Ok(self.inner.read_u8(ControlRequest::GpioRead, idx)? != 0)
    }

    /// Drive a GPIO pin high or low.
    pub fn gpio_write(&self, port: u8, pin: u8, value: bool) -> Result<(), Error> {
        let idx = port_pin(port, pin)?;
        self.inner
            .write_u16(ControlRequest::GpioWrite, idx, value as u16)
    }

    /// Read the direction of a GPIO pin. True means output.
    pub fn gpiodir_read(&self, port: u8, pin: u8) -> Result<bool, Error> {
        let idx = port_pin(port, pin)?;
        Ok(self.inner.read_u8(ControlRequest::GpiodirRead, idx)? != 0)
    }

    /// Set the direction of a GPIO pin. True means output.
    pub fn gpiodir_write(&self, port: u8, pin: u8, output: bool) -> Result<(), Error> {
        let idx = port_pin(port, pin)?;
        self.inner
            .write_u16(ControlRequest::GpiodirWrite, idx, output as u16)
    }
}

/// Pack a GPIO port and pin into a request index.
fn port_pin(port: u8, pin: u8) -> Result<u16, Error> {
    if port as u32 >= GPIO_PORTS {
        return Err(Error::ValueRange {
            range: Range {
                start: 0,
                end: GPIO_PORTS,
            },
            val: port as u32,
        });
    }
    if pin as u32 >= GPIO_PINS {
        return Err(Error::ValueRange {
            range: Range {
                start: 0,
                end: GPIO_PINS,
            },
            val: pin as u32,
        });
    }
    Ok(((port as u16) << 5) | pin as u16)
}

/// Accessor for the SPI flash holding the receiver's firmware.
///
/// ⚠️ WARNING: This allows for directly manipulating the SPI flash, which is a
/// great way to brick your receiver and require recovery through the MCU's
/// DFU bootloader.
///
/// The general write procedure is to [erase][SpiFlash::erase] the flash,
/// [write][SpiFlash::write] all bytes to it starting from address 0, then
/// verify by [reading][SpiFlash::read] the flash to verify a successful write.
pub struct SpiFlash<'a, T: Transport> {
    inner: &'a Airspy<T>,
}

impl<T: Transport> SpiFlash<'_, T> {
    fn check_range(addr: u32, len: usize) -> Result<(), Error> {
        if addr >= SPIFLASH_END_ADDR {
            return Err(Error::AddressRange {
                range: Range {
                    start: 0,
                    end: SPIFLASH_END_ADDR,
                },
                addr,
            });
        }

        if (len + addr as usize) > (SPIFLASH_END_ADDR as usize) {
            let end = SPIFLASH_END_ADDR - addr;
            return Err(Error::ValueRange {
                range: Range { start: 0, end },
                val: len as u32,
            });
        }
        Ok(())
    }

    /// Erase the entire flash memory.
    ///
    /// Should be immediately followed by writing a new image, or the receiver
    /// won't boot.
    pub fn erase(&self) -> Result<(), Error> {
        self.inner.write_u16(ControlRequest::SpiflashErase, 0, 0)
    }

    /// Erase a single sector of the flash memory.
    pub fn erase_sector(&self, sector: u16) -> Result<(), Error> {
        self.inner
            .write_u16(ControlRequest::SpiflashEraseSector, 0, sector)
    }

    /// Write firmware to the flash memory.
    ///
    /// Needs to be preceded by an erase of the region being written.
    ///
    /// Writes can be up to the max size of the memory; this command will split
    /// them into sub-commands if needed.
    pub fn write(&self, addr: u32, data: &[u8]) -> Result<(), Error> {
        Self::check_range(addr, data.len())?;

        let mut addr = addr;
        let mut data = data;
        let mut chunk: &[u8];
        while !data.is_empty() {
            // Split so that all writes are within a 256-byte page.
            let len = (0x100 - ((addr & 0xff) as usize)).min(data.len());
            (chunk, data) = data.split_at(len);
            self.inner.transport.control_out(
                ControlRequest::SpiflashWrite as u8,
                (addr >> 16) as u16,
                (addr & 0xFFFF) as u16,
                chunk,
            )?;
            addr += len as u32;
        }
        Ok(())
    }

    /// Read from the flash memory.
    ///
    /// Reads can be up to the max size of the memory; this command will split
    /// them into sub-commands if needed.
    pub fn read(&self, addr: u32, len: usize) -> Result<Vec<u8>, Error> {
        Self::check_range(addr, len)?;

        let mut addr = addr;
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            // Read from one 256-byte page at a time, dividing up as needed.
            let block_len = (0x100 - ((addr & 0xff) as usize)).min(len - data.len());
            let resp = self.inner.transport.control_in(
                ControlRequest::SpiflashRead as u8,
                (addr >> 16) as u16,
                (addr & 0xFFFF) as u16,
                block_len as u16,
            )?;
            if resp.is_empty() {
                return Err(Error::ReturnData);
            }
            data.extend_from_slice(&resp);
            addr += resp.len() as u32;
        }
        Ok(data)
    }
}

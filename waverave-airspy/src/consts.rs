use std::time::Duration;

/// Vendor ID shared by the Airspy and legacy HydraSDR boards.
pub const OPENMOKO_USB_VID: u16 = 0x1d50;
/// Product ID shared by the Airspy and legacy HydraSDR boards.
pub const AIRSPY_USB_PID: u16 = 0x60a1;
/// Vendor ID of the official HydraSDR RFOne.
pub const HYDRASDR_USB_VID: u16 = 0x38af;
/// Product ID of the official HydraSDR RFOne.
pub const HYDRASDR_USB_PID: u16 = 0x0001;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlRequest {
    Reset = 0,
    ReceiverMode = 1,
    Si5351cWrite = 2,
    Si5351cRead = 3,
    R82xWrite = 4,
    R82xRead = 5,
    SpiflashErase = 6,
    SpiflashWrite = 7,
    SpiflashRead = 8,
    BoardIdRead = 9,
    VersionStringRead = 10,
    BoardPartidSerialnoRead = 11,
    SetSamplerate = 12,
    SetFreq = 13,
    SetLnaGain = 14,
    SetMixerGain = 15,
    SetVgaGain = 16,
    SetLnaAgc = 17,
    SetMixerAgc = 18,
    SetRfBias = 20,
    GpioWrite = 21,
    GpioRead = 22,
    GpiodirWrite = 23,
    GpiodirRead = 24,
    GetSamplerates = 25,
    SetPacking = 26,
    SpiflashEraseSector = 27,
    SetRfPort = 28,
}

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiverMode {
    Off = 0,
    Receive = 1,
}

pub const RX_ENDPOINT_ADDRESS: u8 = 0x81;

/// Number of bulk transfers kept in flight while streaming.
pub const TRANSFER_COUNT: usize = 16;
/// Number of slots in the ready-buffer ring. Must be a power of two.
pub const RAW_BUFFER_COUNT: usize = 8;

pub const UNPACKED_BUFFER_SIZE: usize = 262_144;
pub const PACKED_BUFFER_SIZE: usize = 6144 * 24;

/// Rates at or above this are sent as a literal kHz value when they aren't in
/// the device's own table.
pub const MIN_SAMPLERATE_BY_VALUE: u32 = 1_000_000;

/// Upper bound on how long the transfer thread blocks waiting for a completion.
pub const TRANSFER_WAIT: Duration = Duration::from_millis(500);

pub const VERSION_STRING_LEN: u16 = 127;

pub const SAMPLE_RESOLUTION: u32 = 12;
pub const SAMPLE_ENCAPSULATION: u32 = 16;
pub const SAMPLE_SHIFT: u32 = SAMPLE_ENCAPSULATION - SAMPLE_RESOLUTION;
pub const SAMPLE_SCALE: f32 = 1.0 / (1 << (15 - SAMPLE_SHIFT)) as f32;
pub const SAMPLE_OFFSET: i16 = 1 << (SAMPLE_RESOLUTION - 1);

pub const SPIFLASH_END_ADDR: u32 = 0x10_0000;

/// GPIO used to drive the Airspy bias tee.
pub const AIRSPY_BIAS_PORT: u8 = 1;
pub const AIRSPY_BIAS_PIN: u8 = 13;

use std::ops::Range;

/// An error from operating an Airspy-family receiver.
///
/// Some errors are recoverable:
///
/// - `Io` & `Transfer` may just be a failed packet operation on the USB cable,
///   and can potentially be recovered from without giving up on the receiver.
/// - `AddressRange`, `ValueRange`, and `InvalidParameter` all mean the
///   arguments to a function were out of range, and may even provide a hint of
///   how to fix them.
/// - `Busy` means the operation isn't allowed while streaming. Stop the stream
///   first and try again.
/// - `ReturnData` means the receiver replied to a USB transaction with something
///   unintelligible. Most of the time this means something is seriously wrong.
///
/// Every error maps onto the numeric [`ErrorCode`] set used by the C drivers,
/// through [`Error::code`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Underlying OS I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Transfer error from `nusb`.
    #[error("USB transfer error")]
    Transfer(#[from] nusb::transfer::TransferError),

    /// The provided address (usually for register or flash I/O) is out of range.
    #[error("Address (0x{addr:x}) out of range (0x{}..0x{})", .range.start, .range.end)]
    #[allow(missing_docs)]
    AddressRange { range: Range<u32>, addr: u32 },

    /// The provided argument value is out of range.
    #[error("Value (0x{val:x}) out of range (0x{}..0x{})", .range.start, .range.end)]
    #[allow(missing_docs)]
    ValueRange { range: Range<u32>, val: u32 },

    /// Some argument to a function is invalid in a way not easily expressed as
    /// a range.
    #[error("Invalid Parameter: {0}")]
    InvalidParameter(&'static str),

    /// No matching receiver was found, or every candidate failed its identity
    /// check.
    #[error("No matching receiver found")]
    NotFound,

    /// The operation isn't allowed in the current streaming state.
    #[error("Receiver is busy streaming")]
    Busy,

    /// A buffer allocation failed.
    #[error("Out of memory while allocating sample buffers")]
    NoMem,

    /// This receiver family or platform doesn't support the operation.
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    /// A pipeline thread couldn't be spawned.
    #[error("Failed to spawn streaming thread")]
    Thread(#[source] std::io::Error),

    /// A pipeline thread panicked while streaming.
    #[error("Streaming thread panicked")]
    StreamingThread,

    /// Returned data from a receiver didn't make any sense.
    #[error("Invalid return data")]
    ReturnData,
}

/// Numeric result codes, matching the values returned by `libairspy` and
/// `libhydrasdr`.
///
/// These are mostly useful when handing results across a language boundary.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ErrorCode {
    Success = 0,
    True = 1,
    InvalidParam = -2,
    NotFound = -5,
    Busy = -6,
    NoMem = -11,
    Unsupported = -12,
    Libusb = -1000,
    Thread = -1001,
    StreamingThreadErr = -1002,
    StreamingStopped = -1003,
    Other = -9999,
}

impl ErrorCode {
    /// Get the raw numeric value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Convert a raw numeric value back into a code. Unknown values become
    /// [`ErrorCode::Other`].
    pub fn from_i32(v: i32) -> Self {
        use ErrorCode::*;
        match v {
            0 => Success,
            1 => True,
            -2 => InvalidParam,
            -5 => NotFound,
            -6 => Busy,
            -11 => NoMem,
            -12 => Unsupported,
            -1000 => Libusb,
            -1001 => Thread,
            -1002 => StreamingThreadErr,
            -1003 => StreamingStopped,
            _ => Other,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::True => f.write_str("true"),
            Self::InvalidParam => f.write_str("invalid parameter"),
            Self::NotFound => f.write_str("not found"),
            Self::Busy => f.write_str("busy"),
            Self::NoMem => f.write_str("out of memory"),
            Self::Unsupported => f.write_str("unsupported"),
            Self::Libusb => f.write_str("USB transport error"),
            Self::Thread => f.write_str("thread error"),
            Self::StreamingThreadErr => f.write_str("streaming thread error"),
            Self::StreamingStopped => f.write_str("streaming stopped"),
            Self::Other => f.write_str("unknown error"),
        }
    }
}

impl Error {
    /// Get the numeric [`ErrorCode`] for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) | Self::Transfer(_) | Self::ReturnData => ErrorCode::Libusb,
            Self::AddressRange { .. } | Self::ValueRange { .. } | Self::InvalidParameter(_) => {
                ErrorCode::InvalidParam
            }
            Self::NotFound => ErrorCode::NotFound,
            Self::Busy => ErrorCode::Busy,
            Self::NoMem => ErrorCode::NoMem,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::Thread(_) => ErrorCode::Thread,
            Self::StreamingThread => ErrorCode::StreamingThreadErr,
        }
    }
}

impl<T> From<&Result<T, Error>> for ErrorCode {
    fn from(value: &Result<T, Error>) -> Self {
        match value {
            Ok(_) => ErrorCode::Success,
            Err(e) => e.code(),
        }
    }
}

/*!
Scan-line delivery channel.

Scan lines travel to the PRU through a ring of [`QUEUE_LEN`] slots in shared
memory, each a command byte followed by [`SCANLINE_DATA_SIZE`] data bytes.
The host fills empty slots and publishes them by writing the command; the PRU
exposes the line and marks the slot empty again. Writing [`ScanCommand::Exit`]
asks the PRU to stop, which it acknowledges with [`ScanCommand::Done`]. If the
PRU stops on its own it also writes `Done`, after putting the reason into the
error register behind the ring.

[`QUEUE_LEN`]: crate::protocol::QUEUE_LEN
[`SCANLINE_DATA_SIZE`]: crate::protocol::SCANLINE_DATA_SIZE
*/

mod dry_run;
pub mod pru;
mod ring;

pub use dry_run::DryRunSender;
pub use ring::{ConsumerView, HeapMemory, ProducerView, RingChannel};

use std::fmt;
use std::sync::atomic::AtomicU8;
use thiserror::Error;

/// Slot commands, as written into the first byte of every ring slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanCommand {
    /// Free for the host to fill
    Empty = 0,
    /// Expose the line, then advance the sled one step
    ScanData = 1,
    /// Expose the line without moving the sled
    ScanDataNoSled = 2,
    /// Host requests the PRU to stop
    Exit = 3,
    /// PRU has stopped
    Done = 4,
}

impl ScanCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Empty),
            1 => Some(Self::ScanData),
            2 => Some(Self::ScanDataNoSled),
            3 => Some(Self::Exit),
            4 => Some(Self::Done),
            _ => None,
        }
    }
}

/// Reason the PRU gave for stopping, read from the error register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruError {
    None,
    /// Firmware hit a debug break point
    DebugBreak,
    /// The h-sync sensor did not see the laser within the expected time
    MirrorSync,
    /// A scan line took longer than the mirror segment
    TimeOverrun,
    /// Code this host does not know about
    Unknown(u8),
}

impl PruError {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::None,
            1 => Self::DebugBreak,
            2 => Self::MirrorSync,
            3 => Self::TimeOverrun,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::DebugBreak => 1,
            Self::MirrorSync => 2,
            Self::TimeOverrun => 3,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for PruError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("stopped without error"),
            Self::DebugBreak => f.write_str("debug break"),
            Self::MirrorSync => f.write_str("mirror sync failure (is the mirror spinning?)"),
            Self::TimeOverrun => f.write_str("time overrun"),
            Self::Unknown(code) => write!(f, "unknown error code {code}"),
        }
    }
}

/// Lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Running,
    /// Cleanly shut down; no more lines accepted
    Shutdown,
    /// The PRU stopped unexpectedly
    Failed(PruError),
}

/// Delivery channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel is not running")]
    NotRunning,

    #[error("PRU stopped: {0}")]
    Coprocessor(PruError),

    #[error("Scan line has {actual} bytes, expected {expected}")]
    LineSize { expected: usize, actual: usize },

    #[error("Cannot access {path}: {source}")]
    Device {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Shared memory has {actual} bytes, the ring needs {required}")]
    SharedMemorySize { required: usize, actual: usize },

    #[error("Firmware: {0}")]
    Firmware(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    pub fn device(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Device {
            path: path.into(),
            source,
        }
    }
}

/// Producer side of the delivery channel
pub trait ScanLineSender {
    /// Queue one line of exactly `SCANLINE_DATA_SIZE` bytes, blocking while
    /// the ring is full.
    fn enqueue(&mut self, line: &[u8], advance_sled: bool) -> Result<(), ChannelError>;

    /// Let the PRU drain the ring, stop it and release it. Calling this again
    /// after a clean shutdown does nothing.
    fn shutdown(&mut self) -> Result<(), ChannelError>;

    fn status(&self) -> ChannelStatus;

    /// Lines accepted so far
    fn lines_sent(&self) -> u64;

    /// `false` for the dry run
    fn is_hardware(&self) -> bool;
}

/// What a [`RingChannel`] needs from the machine: the shared memory and a
/// way to sleep until the consumer did something.
pub trait RingBackend {
    /// The shared memory, at least `SHARED_MEMORY_SIZE` bytes
    fn cells(&self) -> &[AtomicU8];

    /// Block until the consumer signalled an event. Spurious returns are
    /// fine, the caller re-checks.
    fn wait_event(&mut self) -> Result<(), ChannelError>;

    /// Stop the consumer. Called once per shutdown attempt.
    fn release(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn is_hardware(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_values_match_firmware() {
        assert_eq!(ScanCommand::Empty as u8, 0);
        assert_eq!(ScanCommand::ScanData as u8, 1);
        assert_eq!(ScanCommand::ScanDataNoSled as u8, 2);
        assert_eq!(ScanCommand::Exit as u8, 3);
        assert_eq!(ScanCommand::Done as u8, 4);
        assert_eq!(ScanCommand::from_u8(3), Some(ScanCommand::Exit));
        assert_eq!(ScanCommand::from_u8(5), None);
    }

    #[test]
    fn test_error_codes() {
        for code in 0..4 {
            assert_eq!(PruError::from_code(code).code(), code);
        }
        assert_eq!(PruError::from_code(2), PruError::MirrorSync);
        assert_eq!(PruError::from_code(9), PruError::Unknown(9));
        assert!(ChannelError::Coprocessor(PruError::MirrorSync).to_string().contains("mirror sync"));
    }
}

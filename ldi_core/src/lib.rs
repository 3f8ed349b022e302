/*!
# Laser Direct-Imaging Core

This crate contains the exposure image pipeline and the scan-line delivery
protocol of the laser direct-imaging scanner. A raster image is turned into
exactly the bits the rotating polygon mirror needs, line by line, and the
lines are streamed to the PRU through its shared-memory ring buffer.

## Core Types

- [`PackedBitImage`] - byte-aligned 1-bit image, the substrate of every stage
- [`ScanGeometryTable`] - tangent lookup from scan ticks to image rows
- [`ScanLineSender`] - producer side of the delivery channel
- [`LaserScanner`] - exposure orchestrator

## Modules

- [`bitmap`] - packed bit image and PBM import/export
- [`thinning`] - structure thinning along rows and columns
- [`geometry`] - scan geometry lookup, resampling and board fit
- [`rotate`] - 8x8 block-transpose rotation
- [`channel`] - ring buffer protocol, PRU bring-up and dry run
- [`scanner`] - exposure orchestration
- [`loader`] - PNG loading and black/white quantization
- [`test_chart`] - thinning calibration chart
- [`config`] - machine geometry configuration
- [`error`] - common error types
*/

pub mod bitmap;
pub mod channel;
pub mod config;
pub mod error;
pub mod geometry;
pub mod loader;
pub mod rotate;
pub mod scanner;
pub mod test_chart;
pub mod thinning;

// Re-export commonly used types
pub use bitmap::PackedBitImage;
pub use channel::{ChannelError, ChannelStatus, DryRunSender, PruError, ScanCommand, ScanLineSender};
pub use config::ScannerConfig;
pub use error::{Result, RotationHint, ScannerError};
pub use geometry::{BoardAxis, ScanGeometryTable};
pub use scanner::{ExposureOutcome, ExposurePlan, LaserScanner};

/// Version information for the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol constants shared with the PRU firmware
pub mod protocol {
    /// A single byte containing the command of a ring buffer slot
    pub const SCANLINE_HEADER_SIZE: usize = 1;

    /// Data bytes following the command: one bit per scan tick
    pub const SCANLINE_DATA_SIZE: usize = 512;

    /// Size of one ring buffer slot
    pub const SCANLINE_ITEM_SIZE: usize = SCANLINE_HEADER_SIZE + SCANLINE_DATA_SIZE;

    /// Number of slots in the ring buffer
    pub const QUEUE_LEN: usize = 8;

    /// Offset of the error register, directly behind the ring
    pub const ERROR_REGISTER_OFFSET: usize = QUEUE_LEN * SCANLINE_ITEM_SIZE;

    /// Total shared memory used by the protocol
    pub const SHARED_MEMORY_SIZE: usize = ERROR_REGISTER_OFFSET + 1;

    /// Scan ticks per line that carry data
    pub const SCAN_PIXELS: usize = SCANLINE_DATA_SIZE * 8;
}

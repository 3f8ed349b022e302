/*!
Common error types for the exposure pipeline and the scanner facade.
*/

use crate::channel::ChannelError;
use crate::geometry::BoardAxis;
use std::fmt;
use thiserror::Error;

/// Common result type used throughout the core library
pub type Result<T> = std::result::Result<T, ScannerError>;

/// Error type for all scanner operations
#[derive(Error, Debug)]
pub enum ScannerError {
    /// The image does not fit on the bed along one axis
    #[error(
        "Image does not fit along the {axis} axis: {image_mm:.1}mm but only {limit_mm:.1}mm available ({rotation})"
    )]
    DoesNotFit {
        axis: BoardAxis,
        image_mm: f64,
        limit_mm: f64,
        rotation: RotationHint,
    },

    /// Exposure multiplier below one
    #[error("Invalid exposure factor {0}: must be at least 1")]
    InvalidExposureFactor(u32),

    /// Resolution that cannot describe a physical image
    #[error("Invalid resolution: {0} mm per pixel")]
    InvalidResolution(f64),

    /// Exposure requested before any image was set
    #[error("No image prepared; call set_image() first")]
    NoImage,

    /// Operation that only makes sense with the real PRU attached
    #[error("{0} requires the PRU; not available in dry-run")]
    RequiresHardware(&'static str),

    /// Delivery channel failures
    #[error("Scan line channel: {0}")]
    Channel(#[from] ChannelError),

    /// I/O errors (file operations, device access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// PNG metadata errors
    #[error("PNG error: {0}")]
    Png(#[from] png::DecodingError),

    /// File format errors
    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Whether a quarter turn would make a rejected image fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationHint {
    RotateToFit,
    NoOrientationFits,
}

impl fmt::Display for RotationHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RotateToFit => f.write_str("rotating the image by 90 degrees would make it fit"),
            Self::NoOrientationFits => f.write_str("it does not fit in either orientation"),
        }
    }
}

impl ScannerError {
    /// Create a new invalid file format error
    pub fn invalid_file_format(msg: impl Into<String>) -> Self {
        Self::InvalidFileFormat(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// For a board-fit rejection: whether rotating the image would help
    pub fn rotation_would_fit(&self) -> Option<bool> {
        match self {
            Self::DoesNotFit { rotation, .. } => Some(*rotation == RotationHint::RotateToFit),
            _ => None,
        }
    }

    /// True for errors the caller can fix by changing its input
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DoesNotFit { .. }
                | Self::InvalidExposureFactor(_)
                | Self::InvalidResolution(_)
                | Self::NoImage
                | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_does_not_fit_message_mentions_rotation() {
        let err = ScannerError::DoesNotFit {
            axis: BoardAxis::Sled,
            image_mm: 200.0,
            limit_mm: 160.0,
            rotation: RotationHint::RotateToFit,
        };
        let msg = err.to_string();
        assert!(msg.contains("sled"));
        assert!(msg.contains("200.0mm"));
        assert!(msg.contains("rotating the image by 90 degrees would make it fit"));
        assert!(err.is_configuration());
        assert_eq!(err.rotation_would_fit(), Some(true));
    }

    #[test]
    fn test_does_not_fit_message_without_rotation() {
        let err = ScannerError::DoesNotFit {
            axis: BoardAxis::Scan,
            image_mm: 300.0,
            limit_mm: 100.0,
            rotation: RotationHint::NoOrientationFits,
        };
        assert!(err.to_string().contains("does not fit in either orientation"));
    }

    #[test]
    fn test_channel_error_is_not_configuration() {
        let err = ScannerError::from(ChannelError::NotRunning);
        assert!(!err.is_configuration());
        assert_eq!(err.rotation_would_fit(), None);
    }
}

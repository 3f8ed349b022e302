/*!
Machine geometry configuration.

These values depend on the physical set-up of the scanner: the polygon
mirror, its distance to the work surface, the sled lead screw and the PRU
line frequency.
*/

use crate::error::{Result, ScannerError};
use serde::{Deserialize, Serialize};

/// Stepper motor + lead settings: 1/4 stepping, 200 steps, 24 threads/inch
pub const DEFAULT_SLED_MM_PER_STEP: f64 = (25.4 / 24.0) / 200.0 / 4.0;

/// Scanner geometry and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Distance between the rotating mirror and the work surface
    pub radius_mm: f64,

    /// Usable width of the laser line across the bed (scan axis)
    pub bed_width_mm: f64,

    /// Usable sled travel (sled axis)
    pub bed_length_mm: f64,

    /// Number of faces of the polygon mirror
    pub mirror_faces: u32,

    /// Ticks between the h-sync sensor and the start of the image data
    pub hsync_shoulder: usize,

    /// Sled travel per motor step
    pub sled_mm_per_step: f64,

    /// Scan lines per second, measured at the mirror
    pub line_frequency_hz: f64,

    /// Laser dot diameter along the sled axis
    pub laser_sled_dot_mm: f64,

    /// Laser dot diameter along the scan axis
    pub laser_scan_dot_mm: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            radius_mm: 133.0,
            bed_width_mm: 100.0,
            bed_length_mm: 160.0,
            mirror_faces: 6,
            hsync_shoulder: 100,
            sled_mm_per_step: DEFAULT_SLED_MM_PER_STEP,
            line_frequency_hz: 257.0,
            laser_sled_dot_mm: 0.04,
            laser_scan_dot_mm: 0.04,
        }
    }
}

impl ScannerConfig {
    /// Angle of one mirror facet. The reflection covers twice that, but data
    /// is only sent for the first half.
    pub fn segment_data_angle(&self) -> f64 {
        std::f64::consts::TAU / f64::from(self.mirror_faces)
    }

    /// Reject values that cannot describe a working machine
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("radius_mm", self.radius_mm),
            ("bed_width_mm", self.bed_width_mm),
            ("bed_length_mm", self.bed_length_mm),
            ("sled_mm_per_step", self.sled_mm_per_step),
            ("line_frequency_hz", self.line_frequency_hz),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ScannerError::config(format!("{name} must be positive, got {value}")));
            }
        }
        for (name, value) in [
            ("laser_sled_dot_mm", self.laser_sled_dot_mm),
            ("laser_scan_dot_mm", self.laser_scan_dot_mm),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ScannerError::config(format!("{name} must not be negative, got {value}")));
            }
        }
        if self.mirror_faces == 0 {
            return Err(ScannerError::config("mirror_faces must be at least 1"));
        }
        if self.hsync_shoulder >= crate::protocol::SCAN_PIXELS {
            return Err(ScannerError::config(format!(
                "hsync_shoulder {} leaves no room for data",
                self.hsync_shoulder
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ScannerConfig::default();
        assert_eq!(config.radius_mm, 133.0);
        assert_eq!(config.bed_width_mm, 100.0);
        assert_eq!(config.mirror_faces, 6);
        assert!((config.sled_mm_per_step - 0.001_322_916).abs() < 1e-8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_segment_angle_for_hexagon() {
        let config = ScannerConfig::default();
        assert!((config.segment_data_angle().to_degrees() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let mut config = ScannerConfig::default();
        config.line_frequency_hz = 0.0;
        assert!(config.validate().is_err());

        let mut config = ScannerConfig::default();
        config.mirror_faces = 0;
        assert!(config.validate().is_err());

        let mut config = ScannerConfig::default();
        config.laser_scan_dot_mm = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ScannerConfig = serde_json::from_str(r#"{"radius_mm": 150.0}"#).unwrap();
        assert_eq!(config.radius_mm, 150.0);
        assert_eq!(config.bed_length_mm, 160.0);
    }
}

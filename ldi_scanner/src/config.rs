/*!
Configuration file of the scanner front-end.
*/

use anyhow::{Context, Result};
use ldi_core::loader::DEFAULT_THRESHOLD;
use ldi_core::ScannerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub machine: ScannerConfig,
    pub hardware: HardwareConfig,
    pub exposure: ExposureConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file. Missing entries keep their
    /// default value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {} as TOML", path.as_ref().display()))?;

        config
            .machine
            .validate()
            .with_context(|| format!("Invalid machine section in {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

/// Where the hardware lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// UIO device of the PRU subsystem
    pub uio_device: PathBuf,

    /// Binary image of the scan firmware for PRU0
    pub pru_firmware: PathBuf,

    /// Step rate when moving the sled from the host
    pub sled_step_frequency_hz: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            uio_device: PathBuf::from("/dev/uio0"),
            pru_firmware: PathBuf::from("/lib/firmware/ldi-scanner-pru0.bin"),
            sled_step_frequency_hz: 2000.0,
        }
    }
}

/// Defaults for the `expose` and `plan` command line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// How often every scan line is sent
    pub exposure_factor: u32,

    /// Gray level above which a PNG pixel is exposed
    pub threshold: u8,

    /// Expose the dark parts of the image instead
    pub invert: bool,

    /// Counter-clockwise quarter turns applied to every image
    pub quarter_turns: u32,

    /// Resolution for images that do not carry one
    pub fallback_dpi: Option<f64>,

    /// Drive the sled back to the start after exposure
    pub return_sled: bool,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            exposure_factor: 1,
            threshold: DEFAULT_THRESHOLD,
            invert: false,
            quarter_turns: 0,
            fallback_dpi: None,
            return_sled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_roundtrip() {
        let mut config = AppConfig::default();
        config.machine.mirror_faces = 8;
        config.hardware.uio_device = PathBuf::from("/dev/uio3");
        config.exposure.fallback_dpi = Some(1200.0);

        let temp_file = NamedTempFile::new().unwrap();
        config.save_to_file(temp_file.path()).unwrap();

        let loaded_config = AppConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded_config, config);
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();
        assert_eq!(config.machine.mirror_faces, 6);
        assert_eq!(config.hardware.uio_device, PathBuf::from("/dev/uio0"));
        assert_eq!(config.exposure.exposure_factor, 1);
        assert_eq!(config.exposure.threshold, DEFAULT_THRESHOLD);
        assert!(config.exposure.fallback_dpi.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[machine]\nbed_width_mm = 120.0\n\n[exposure]\ninvert = true").unwrap();

        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.machine.bed_width_mm, 120.0);
        assert_eq!(config.machine.radius_mm, ScannerConfig::default().radius_mm);
        assert!(config.exposure.invert);
        assert_eq!(config.hardware, HardwareConfig::default());
    }

    #[test]
    fn test_invalid_machine_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[machine]\nmirror_faces = 0").unwrap();

        let err = AppConfig::load_from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("machine"), "{err:#}");
    }

    #[test]
    fn test_missing_file() {
        assert!(AppConfig::load_from_file("/nonexistent/ldi-scanner.toml").is_err());
    }
}

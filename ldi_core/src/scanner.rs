/*!
Exposure orchestration.

[`LaserScanner`] turns a source image into a prepared scan image and streams
it line by line to the delivery channel, one sled step per line.
*/

use crate::bitmap::PackedBitImage;
use crate::channel::ScanLineSender;
use crate::config::ScannerConfig;
use crate::error::{Result, ScannerError};
use crate::geometry::{check_board_fit, resample_to_scan_image, ScanGeometryTable};
use crate::protocol::{SCANLINE_DATA_SIZE, SCAN_PIXELS};
use crate::rotate::rotate_quarter_turns;
use crate::thinning::thin_image_structures;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Length of a jitter diagnostic mark in scan ticks
const JITTER_MARK_TICKS: usize = 8;

/// Everything worth knowing about a prepared exposure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExposurePlan {
    /// Exposure size along the sled
    pub sled_mm: f64,
    /// Exposure size along the scan line
    pub scan_mm: f64,
    pub mm_per_pixel: f64,
    pub dpi: f64,
    pub sled_steps_per_pixel: f64,
    /// Guaranteed laser dots per image pixel, at the ends of the scan line
    pub laser_dots_per_pixel: f64,
    /// Laser dots per image pixel measured over the first 5% of the line
    pub sampled_laser_dots_per_pixel: Option<f64>,
    /// Size of the coarsest laser dot on the bed
    pub laser_dot_mm: f64,
    pub modulation_khz: f64,
    /// Scan ticks carrying image data
    pub scan_ticks: usize,
    pub scan_thinning_radius: usize,
    pub sled_thinning_radius: usize,
    pub scanlines: u64,
    pub exposure_factor: u32,
    pub estimated_seconds: f64,
}

/// How an exposure ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureOutcome {
    /// All scan lines sent
    Completed { scanlines: u64 },
    /// The progress callback asked to stop before `at_scanline`
    Cancelled { at_scanline: u64 },
}

struct PreparedExposure {
    scan_image: PackedBitImage,
    plan: ExposurePlan,
}

/// Exposure orchestrator owning the delivery channel
pub struct LaserScanner {
    config: ScannerConfig,
    sender: Box<dyn ScanLineSender>,
    exposure_factor: u32,
    sled_dot_mm: f64,
    scan_dot_mm: f64,
    quarter_turns: u32,
    prepared: Option<PreparedExposure>,
}

impl LaserScanner {
    /// `exposure_factor` is how often every line is sent; the sled only
    /// moves on the first.
    pub fn new(config: ScannerConfig, sender: Box<dyn ScanLineSender>, exposure_factor: u32) -> Result<Self> {
        config.validate()?;
        if exposure_factor < 1 {
            return Err(ScannerError::InvalidExposureFactor(exposure_factor));
        }
        Ok(Self {
            sled_dot_mm: config.laser_sled_dot_mm,
            scan_dot_mm: config.laser_scan_dot_mm,
            config,
            sender,
            exposure_factor,
            quarter_turns: 0,
            prepared: None,
        })
    }

    /// Laser dot diameter used for thinning. Non-positive values fall back to
    /// the configured default.
    pub fn set_laser_dot_size(&mut self, sled_mm: f64, scan_mm: f64) {
        self.sled_dot_mm = if sled_mm > 0.0 { sled_mm } else { self.config.laser_sled_dot_mm };
        self.scan_dot_mm = if scan_mm > 0.0 { scan_mm } else { self.config.laser_scan_dot_mm };
    }

    /// (sled, scan) laser dot diameter in mm
    pub fn laser_dot_size(&self) -> (f64, f64) {
        (self.sled_dot_mm, self.scan_dot_mm)
    }

    /// Counter-clockwise quarter turns applied to the next image
    pub fn set_orientation(&mut self, quarter_turns: u32) {
        self.quarter_turns = quarter_turns % 4;
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn sender(&self) -> &dyn ScanLineSender {
        self.sender.as_ref()
    }

    pub fn plan(&self) -> Option<&ExposurePlan> {
        self.prepared.as_ref().map(|p| &p.plan)
    }

    /// The prepared image, one row per scan line
    pub fn scan_image(&self) -> Option<&PackedBitImage> {
        self.prepared.as_ref().map(|p| &p.scan_image)
    }

    /// Prepare `image` for exposure. Its width runs along the sled, its
    /// height along the scan line (after orientation).
    pub fn set_image(&mut self, image: PackedBitImage, mm_per_pixel: f64) -> Result<&ExposurePlan> {
        self.prepared = None;
        if !(mm_per_pixel.is_finite() && mm_per_pixel > 0.0) {
            return Err(ScannerError::InvalidResolution(mm_per_pixel));
        }

        let image = rotate_quarter_turns(image, self.quarter_turns);
        check_board_fit(&image, mm_per_pixel, &self.config)?;

        let table = ScanGeometryTable::build(
            self.config.radius_mm / mm_per_pixel,
            self.config.bed_width_mm / mm_per_pixel,
            SCAN_PIXELS,
            self.config.segment_data_angle(),
        );
        debug!("Geometry correction of {}x{} image", image.content_width(), image.height());
        let mut scan_image = resample_to_scan_image(&image, &table, self.config.hsync_shoulder);

        let scan_thinning_radius = if table.is_empty() {
            0
        } else {
            let laser_mm_per_tick = self.config.bed_width_mm / table.len() as f64;
            (self.scan_dot_mm / laser_mm_per_tick / 2.0) as usize
        };
        let sled_thinning_radius = (self.sled_dot_mm / mm_per_pixel / 2.0) as usize;
        thin_image_structures(&mut scan_image, scan_thinning_radius, sled_thinning_radius);

        let sled_steps_per_pixel = mm_per_pixel / self.config.sled_mm_per_step;
        let scanlines = (image.content_width() as f64 * sled_steps_per_pixel) as u64;
        let laser_dots_per_pixel = table.worst_case_ticks_per_pixel();
        let plan = ExposurePlan {
            sled_mm: image.content_width() as f64 * mm_per_pixel,
            scan_mm: image.height() as f64 * mm_per_pixel,
            mm_per_pixel,
            dpi: 25.4 / mm_per_pixel,
            sled_steps_per_pixel,
            laser_dots_per_pixel,
            sampled_laser_dots_per_pixel: table.sampled_edge_ticks_per_pixel(),
            laser_dot_mm: mm_per_pixel / laser_dots_per_pixel,
            modulation_khz: self.config.line_frequency_hz * SCAN_PIXELS as f64 / 1000.0,
            scan_ticks: table.len(),
            scan_thinning_radius,
            sled_thinning_radius,
            scanlines,
            exposure_factor: self.exposure_factor,
            estimated_seconds: scanlines as f64 * f64::from(self.exposure_factor) / self.config.line_frequency_hz,
        };
        info!(
            "📐 Exposure size: {:.1}mm along sled, {:.1}mm wide. Resolution {:.0}dpi: \
             {:.1} sled steps per pixel, {:.2} laser dots per pixel ({:.3}mm dots @ {:.0}kHz)",
            plan.sled_mm,
            plan.scan_mm,
            plan.dpi,
            plan.sled_steps_per_pixel,
            plan.laser_dots_per_pixel,
            plan.laser_dot_mm,
            plan.modulation_khz
        );

        let prepared = self.prepared.insert(PreparedExposure { scan_image, plan });
        Ok(&prepared.plan)
    }

    /// Seconds the prepared exposure takes, zero without an image
    pub fn estimated_time_seconds(&self) -> f64 {
        self.plan().map_or(0.0, |plan| plan.estimated_seconds)
    }

    /// Send the prepared image. `progress(done, total)` is called before
    /// every scan line; returning `false` stops the exposure.
    pub fn scan_expose<F>(&mut self, advance_sled: bool, mut progress: F) -> Result<ExposureOutcome>
    where
        F: FnMut(u64, u64) -> bool,
    {
        let prepared = self.prepared.as_ref().ok_or(ScannerError::NoImage)?;
        let total = prepared.plan.scanlines;
        let steps_per_pixel = prepared.plan.sled_steps_per_pixel;
        let max_row = prepared.scan_image.height();
        info!(
            "🔦 Exposing {} scan lines, {} times each{}",
            total,
            self.exposure_factor,
            if advance_sled { "" } else { " (sled not moving)" }
        );

        let mut current: Option<(usize, &[u8])> = None;
        let mut sent = 0;
        for scan in 0..total {
            if !progress(scan, total) {
                warn!("Exposure cancelled at scan line {}/{}", scan, total);
                return Ok(ExposureOutcome::Cancelled { at_scanline: scan });
            }
            let row = (scan as f64 / steps_per_pixel).round() as usize;
            if row >= max_row {
                debug!("Last scan line {} rounds past the image", scan);
                break;
            }
            let line = match current {
                Some((index, data)) if index == row => data,
                _ => {
                    let data = prepared.scan_image.row(row);
                    current = Some((row, data));
                    data
                }
            };
            for repeat in 0..self.exposure_factor {
                self.sender.enqueue(line, advance_sled && repeat == 0).map_err(|e| {
                    error!("❌ Issue synchronizing at scan line {}: {}", scan, e);
                    e
                })?;
            }
            sent += 1;
        }
        Ok(ExposureOutcome::Completed { scanlines: sent })
    }

    /// Expose short marks, one per mirror facet and shifted by facet, to make
    /// facet timing differences visible. Needs the real PRU.
    pub fn jitter_diagnostic(&mut self, mirror_facets: usize, repeats: usize) -> Result<()> {
        if !self.sender.is_hardware() {
            return Err(ScannerError::RequiresHardware("Jitter diagnostic"));
        }
        let facets = mirror_facets.max(1);
        info!("〰️ Jitter diagnostic: {} facets, {} repeats", facets, repeats);
        let lines: Vec<Vec<u8>> = (0..facets)
            .map(|facet| jitter_line(self.config.hsync_shoulder, facet, facets))
            .collect();
        for _ in 0..repeats {
            for line in &lines {
                self.sender.enqueue(line, true)?;
            }
        }
        Ok(())
    }

    /// Shut the delivery channel down
    pub fn shutdown(&mut self) -> Result<()> {
        self.sender.shutdown()?;
        Ok(())
    }
}

impl Drop for LaserScanner {
    fn drop(&mut self) {
        if let Err(e) = self.sender.shutdown() {
            warn!("Channel shutdown on drop failed: {}", e);
        }
    }
}

/// Scan line with one mark, placed per facet across the usable scan width
fn jitter_line(hsync_shoulder: usize, facet: usize, facets: usize) -> Vec<u8> {
    let usable = SCAN_PIXELS.saturating_sub(hsync_shoulder + JITTER_MARK_TICKS);
    let start = hsync_shoulder + facet * (usable / facets);
    let mut line = PackedBitImage::new(SCAN_PIXELS, 1);
    for tick in start..(start + JITTER_MARK_TICKS).min(SCAN_PIXELS) {
        line.set(tick, 0, true);
    }
    debug_assert_eq!(line.as_bytes().len(), SCANLINE_DATA_SIZE);
    line.as_bytes().to_vec()
}

/*!
Scan geometry correction.

The polygon mirror turns at constant angular speed, so equally spaced scan
ticks hit the bed at `radius * tan(angle)`: densely in the center of the scan
line and sparsely at its ends. The [`ScanGeometryTable`] maps every scan tick
to the image pixel that lies under the laser at that moment, and
[`resample_to_scan_image`] uses it to turn a source image into the exact bit
stream of each scan line.
*/

use crate::bitmap::PackedBitImage;
use crate::config::ScannerConfig;
use crate::error::{Result, RotationHint, ScannerError};
use crate::protocol::SCAN_PIXELS;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// The two axes of the bed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardAxis {
    /// Direction of sled travel, one scan line per step
    Sled,
    /// Direction of the laser sweep
    Scan,
}

impl fmt::Display for BoardAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sled => f.write_str("sled"),
            Self::Scan => f.write_str("scan"),
        }
    }
}

/// Mapping from scan tick index to source pixel offset along the scan axis
#[derive(Debug, Clone, PartialEq)]
pub struct ScanGeometryTable {
    offsets: Vec<usize>,
    radius: f64,
    range: f64,
    angle_step: f64,
}

impl ScanGeometryTable {
    /// Build the lookup for a mirror at `radius` pixels from the bed, covering
    /// `range` pixels of scan width. `num` ticks span `segment_data_angle`.
    ///
    /// The scan starts at the angle where the laser hits offset 0 and stops at
    /// the first tick that would land beyond `range`, so the table never has
    /// more than `num` entries.
    pub fn build(radius: f64, range: f64, num: usize, segment_data_angle: f64) -> Self {
        debug_assert!(radius > 0.0 && range > 0.0 && num > 0);
        let scan_angle_range = 2.0 * (range / 2.0 / radius).atan();
        let start = -scan_angle_range / 2.0;
        let angle_step = segment_data_angle / num as f64;

        let mut offsets = Vec::with_capacity(num);
        for i in 0..num {
            let angle = start + i as f64 * angle_step;
            // Float noise around the start angle must not go negative.
            let value = (angle.tan() * radius + range / 2.0).round().max(0.0);
            if value > range {
                break;
            }
            offsets.push(value as usize);
        }
        debug!(
            "Scan geometry: {} ticks cover {:.0} pixels ({:.2} degrees of {:.2})",
            offsets.len(),
            range,
            scan_angle_range.to_degrees(),
            segment_data_angle.to_degrees()
        );

        Self {
            offsets,
            radius,
            range,
            angle_step,
        }
    }

    /// Number of scan ticks that carry image data
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Source pixel offset for every tick
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Scan width in pixels this table was built for
    pub fn range(&self) -> f64 {
        self.range
    }

    /// Angle between two ticks
    pub fn angle_step(&self) -> f64 {
        self.angle_step
    }

    /// Ticks per pixel in the center of the scan line, the best case
    pub fn center_ticks_per_pixel(&self) -> f64 {
        1.0 / (self.radius * self.angle_step)
    }

    /// Guaranteed ticks per pixel anywhere on the scan line.
    ///
    /// `d/dθ (r·tan θ) = r·sec²θ` grows toward the ends, so the edge of the
    /// arc has the largest distance between two ticks.
    pub fn worst_case_ticks_per_pixel(&self) -> f64 {
        let edge_tan = self.range / 2.0 / self.radius;
        let sec_squared = 1.0 + edge_tan * edge_tan;
        1.0 / (self.radius * sec_squared * self.angle_step)
    }

    /// Ticks per pixel measured over the first 5% of the table.
    ///
    /// `None` if the table is too short to tell.
    pub fn sampled_edge_ticks_per_pixel(&self) -> Option<f64> {
        let n = self.offsets.len() / 20;
        if n == 0 {
            return None;
        }
        let covered = self.offsets[n] - self.offsets[0];
        (covered > 0).then(|| n as f64 / covered as f64)
    }
}

/// Check that an image of the given resolution fits on the bed.
///
/// The image width runs along the sled, the height along the scan line.
pub fn check_board_fit(image: &PackedBitImage, mm_per_pixel: f64, config: &ScannerConfig) -> Result<()> {
    let width_mm = image.content_width() as f64 * mm_per_pixel;
    let height_mm = image.height() as f64 * mm_per_pixel;

    let (axis, image_mm, limit_mm) = if width_mm > config.bed_length_mm {
        (BoardAxis::Sled, width_mm, config.bed_length_mm)
    } else if height_mm > config.bed_width_mm {
        (BoardAxis::Scan, height_mm, config.bed_width_mm)
    } else {
        return Ok(());
    };

    let rotation = if height_mm <= config.bed_length_mm && width_mm <= config.bed_width_mm {
        RotationHint::RotateToFit
    } else {
        RotationHint::NoOrientationFits
    };
    Err(ScannerError::DoesNotFit {
        axis,
        image_mm,
        limit_mm,
        rotation,
    })
}

/// Resample `source` into one scan line per source column.
///
/// The result is `SCAN_PIXELS` wide; tick `i` of line `x` is placed at
/// `hsync_shoulder + i` and shows source pixel `(x, height - 1 - offset[i])`.
/// Ticks past the top of the image stay dark.
pub fn resample_to_scan_image(
    source: &PackedBitImage,
    table: &ScanGeometryTable,
    hsync_shoulder: usize,
) -> PackedBitImage {
    let mut out = PackedBitImage::new(SCAN_PIXELS, source.content_width());
    let usable = table.len().min(SCAN_PIXELS.saturating_sub(hsync_shoulder));
    if usable < table.len() {
        warn!(
            "Scan line clipped: {} ticks after a shoulder of {} exceed {} pixels",
            table.len(),
            hsync_shoulder,
            SCAN_PIXELS
        );
    }

    let height = source.height();
    for x in 0..source.content_width() {
        for (i, &offset) in table.offsets()[..usable].iter().enumerate() {
            if offset >= height {
                break;
            }
            if source.get(x, height - 1 - offset) {
                out.set(i + hsync_shoulder, x, true);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Radius so large that one tick is one pixel and tan() is linear
    fn linear_table(range: usize) -> ScanGeometryTable {
        let radius = 1e6;
        let num = 64;
        ScanGeometryTable::build(radius, range as f64, num, num as f64 / radius)
    }

    fn machine_table() -> ScanGeometryTable {
        let config = ScannerConfig::default();
        let mm_per_pixel = 0.025;
        ScanGeometryTable::build(
            config.radius_mm / mm_per_pixel,
            config.bed_width_mm / mm_per_pixel,
            SCAN_PIXELS,
            config.segment_data_angle(),
        )
    }

    #[test]
    fn test_linear_table_is_identity() {
        let table = linear_table(4);
        assert_eq!(table.offsets(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_lookup_bounds() {
        let table = machine_table();
        assert!(!table.is_empty());
        assert!(table.len() <= SCAN_PIXELS);
        assert_eq!(table.offsets()[0], 0);
        let last = *table.offsets().last().unwrap();
        assert!(last as f64 <= table.range());
        assert!(last as f64 >= table.range() - 2.0);
    }

    #[test]
    fn test_lookup_is_non_decreasing() {
        let table = machine_table();
        assert!(table.offsets().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_distance_to_center_shrinks_then_grows() {
        let table = machine_table();
        let center = table.range() / 2.0;
        let distance: Vec<f64> = table.offsets().iter().map(|&v| (v as f64 - center).abs()).collect();
        let closest = distance
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!(distance[..=closest].windows(2).all(|w| w[0] >= w[1]));
        assert!(distance[closest..].windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_steps_are_coarsest_at_the_edges() {
        let table = machine_table();
        let offsets = table.offsets();
        let window = 200;
        let span = |from: usize| offsets[from + window] - offsets[from];
        let mid = offsets.len() / 2 - window / 2;
        assert!(span(0) > span(mid));
        assert!(span(offsets.len() - window - 1) > span(mid));
    }

    #[test]
    fn test_worst_case_resolution_is_at_the_edge() {
        let table = machine_table();
        let worst = table.worst_case_ticks_per_pixel();
        assert!(worst < table.center_ticks_per_pixel());
        let sampled = table.sampled_edge_ticks_per_pixel().unwrap();
        // The sampled window lies slightly inside the edge and is rounded.
        assert!(sampled >= worst * 0.95, "sampled {sampled} vs analytic {worst}");
        assert!(sampled < table.center_ticks_per_pixel());
    }

    #[test]
    fn test_short_table_has_no_sampled_resolution() {
        assert_eq!(linear_table(4).sampled_edge_ticks_per_pixel(), None);
    }

    #[test]
    fn test_resample_places_rows_after_shoulder() {
        let mut source = PackedBitImage::new(8, 4);
        source.set(2, 3, true); // bottom row, first tick
        source.set(5, 0, true); // top row, last tick inside the image

        let out = resample_to_scan_image(&source, &linear_table(4), 100);
        assert_eq!(out.width(), SCAN_PIXELS);
        assert_eq!(out.height(), 8);
        assert!(out.get(100, 2));
        assert!(out.get(103, 5));
        assert_eq!(out.count_ones(), 2);
    }

    #[test]
    fn test_resample_stops_above_image() {
        let mut source = PackedBitImage::new(8, 2);
        for x in 0..8 {
            source.set(x, 0, true);
            source.set(x, 1, true);
        }
        let out = resample_to_scan_image(&source, &linear_table(4), 0);
        for x in 0..8 {
            let lit: Vec<usize> = (0..8).filter(|&t| out.get(t, x)).collect();
            assert_eq!(lit, vec![0, 1]);
        }
    }

    #[test]
    fn test_resample_clips_at_scan_width() {
        let mut source = PackedBitImage::new(8, 4);
        source.set(0, 0, true);
        let out = resample_to_scan_image(&source, &linear_table(4), SCAN_PIXELS - 2);
        assert_eq!(out.count_ones(), 0);
    }

    #[test]
    fn test_board_fit() {
        let config = ScannerConfig::default();
        // 120mm x 80mm fits the 160mm x 100mm bed
        assert!(check_board_fit(&PackedBitImage::new(1200, 800), 0.1, &config).is_ok());
    }

    #[test]
    fn test_too_long_image_suggests_rotation() {
        let config = ScannerConfig::default();
        // 170mm along the sled, 90mm across; turned it is 90mm x 170mm: no.
        let err = check_board_fit(&PackedBitImage::new(1700, 900), 0.1, &config).unwrap_err();
        assert!(matches!(err, ScannerError::DoesNotFit { axis: BoardAxis::Sled, .. }));
        assert_eq!(err.rotation_would_fit(), Some(false));

        // 60mm along the sled, 140mm across; turned it fits.
        let err = check_board_fit(&PackedBitImage::new(600, 1400), 0.1, &config).unwrap_err();
        assert!(matches!(err, ScannerError::DoesNotFit { axis: BoardAxis::Scan, .. }));
        assert_eq!(err.rotation_would_fit(), Some(true));
    }

    #[test]
    fn test_axis_names() {
        assert_eq!(BoardAxis::Sled.to_string(), "sled");
        assert_eq!(serde_json::to_string(&BoardAxis::Scan).unwrap(), "\"scan\"");
    }
}

/*!
Thinning calibration chart.

A row of samples, each 10mm along the sled and 20mm across. The upper half
of a sample holds stripes running along the sled, the lower half stripes
running across it. Every sample is thinned for a different laser diameter,
so after exposure the sample with the truest line width tells the real dot
size.
*/

use crate::bitmap::PackedBitImage;
use crate::thinning::thin_image_structures;
use tracing::debug;

const SAMPLE_LENGTH_MM: f64 = 10.0;
const SAMPLE_WIDTH_MM: f64 = 20.0;
const SAMPLE_GAP_MM: f64 = 1.0;

fn mm_to_pixels(mm: f64, mm_per_pixel: f64) -> usize {
    (mm / mm_per_pixel).round() as usize
}

/// Create `count` samples with lines of `line_width_mm`, pre-thinned for
/// laser diameters `start_diameter`, `start_diameter + step`, ...
pub fn thinning_test_chart(
    mm_per_pixel: f64,
    line_width_mm: f64,
    count: usize,
    start_diameter: f64,
    step: f64,
) -> PackedBitImage {
    let sample_length = mm_to_pixels(SAMPLE_LENGTH_MM, mm_per_pixel);
    let sample_width = mm_to_pixels(SAMPLE_WIDTH_MM, mm_per_pixel);
    let gap = mm_to_pixels(SAMPLE_GAP_MM, mm_per_pixel).min(sample_length);
    let line = mm_to_pixels(line_width_mm, mm_per_pixel).max(1);
    let mut chart = PackedBitImage::new(count * sample_length, sample_width);

    for k in 0..count {
        let diameter = start_diameter + k as f64 * step;
        let radius = (diameter / mm_per_pixel / 2.0).max(0.0) as usize;
        debug!("Chart sample {}: {:.3}mm laser diameter, thinning by {} pixels", k, diameter, radius);

        let mut sample = PackedBitImage::new(sample_length - gap, sample_width);
        for y in 0..sample_width {
            for x in 0..sample.content_width() {
                let stripe = if y < sample_width / 2 { y / line } else { x / line };
                if stripe % 2 == 1 {
                    sample.set(x, y, true);
                }
            }
        }
        thin_image_structures(&mut sample, radius, radius);

        let offset = k * sample_length + gap / 2;
        for y in 0..sample_width {
            for x in 0..sample.content_width() {
                if sample.get(x, y) {
                    chart.set(offset + x, y, true);
                }
            }
        }
    }
    chart
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_lengths(img: &PackedBitImage, x: usize, rows: std::ops::Range<usize>) -> Vec<usize> {
        let mut runs = Vec::new();
        let mut current = 0;
        for y in rows {
            if img.get(x, y) {
                current += 1;
            } else if current > 0 {
                runs.push(current);
                current = 0;
            }
        }
        if current > 0 {
            runs.push(current);
        }
        runs
    }

    #[test]
    fn test_chart_dimensions() {
        let chart = thinning_test_chart(0.1, 0.5, 3, 0.0, 0.2);
        assert_eq!(chart.content_width(), 300);
        assert_eq!(chart.height(), 200);
    }

    #[test]
    fn test_samples_are_thinned_progressively() {
        let chart = thinning_test_chart(0.1, 0.5, 3, 0.0, 0.2);
        // Column 12 of each sample crosses the stripes of the upper half and
        // lies in a gap between the stripes of the lower half.
        let column = |k: usize| k * 100 + 5 + 12;

        let runs = run_lengths(&chart, column(0), 0..100);
        assert_eq!(runs.len(), 10);
        assert!(runs.iter().all(|&r| r == 5), "{runs:?}");

        let runs = run_lengths(&chart, column(1), 0..100);
        assert!(runs.iter().all(|&r| r == 3), "{runs:?}");

        let runs = run_lengths(&chart, column(2), 0..100);
        assert!(runs.iter().all(|&r| r == 1), "{runs:?}");

        assert!(run_lengths(&chart, column(0), 100..200).is_empty());
    }

    #[test]
    fn test_gap_between_samples_is_clear() {
        let chart = thinning_test_chart(0.1, 0.5, 2, 0.0, 0.0);
        for y in 0..200 {
            for x in 95..105 {
                assert!(!chart.get(x, y), "({x}, {y}) in the gap");
            }
        }
    }
}

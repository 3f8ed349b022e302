/*!
Structure thinning.

The laser dot has a finite diameter, so every exposed stroke grows by about a
dot radius on each side. Thinning erodes strokes by that radius beforehand,
one axis at a time, but never removes a stroke completely: a stroke that is
too thin to survive erosion keeps its center pixel.
*/

use crate::bitmap::PackedBitImage;
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// Read access to a one-dimensional line of bits.
pub trait BitLine {
    fn len(&self) -> usize;
    fn get(&self, pos: usize) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write access to a one-dimensional line of bits.
pub trait BitLineMut: BitLine {
    fn set(&mut self, pos: usize, value: bool);
}

/// One row of a packed image, along the scan direction.
pub struct Row<I> {
    image: I,
    y: usize,
}

impl<I: Deref<Target = PackedBitImage>> Row<I> {
    pub fn new(image: I, y: usize) -> Self {
        debug_assert!(y < image.height());
        Self { image, y }
    }
}

impl<I: Deref<Target = PackedBitImage>> BitLine for Row<I> {
    fn len(&self) -> usize {
        self.image.width()
    }

    fn get(&self, pos: usize) -> bool {
        self.image.get(pos, self.y)
    }
}

impl<I: DerefMut<Target = PackedBitImage>> BitLineMut for Row<I> {
    fn set(&mut self, pos: usize, value: bool) {
        let y = self.y;
        self.image.set(pos, y, value);
    }
}

/// One column of a packed image, along the sled direction.
pub struct Column<I> {
    image: I,
    x: usize,
}

impl<I: Deref<Target = PackedBitImage>> Column<I> {
    pub fn new(image: I, x: usize) -> Self {
        debug_assert!(x < image.width());
        Self { image, x }
    }
}

impl<I: Deref<Target = PackedBitImage>> BitLine for Column<I> {
    fn len(&self) -> usize {
        self.image.height()
    }

    fn get(&self, pos: usize) -> bool {
        self.image.get(self.x, pos)
    }
}

impl<I: DerefMut<Target = PackedBitImage>> BitLineMut for Column<I> {
    fn set(&mut self, pos: usize, value: bool) {
        let x = self.x;
        self.image.set(x, pos, value);
    }
}

impl BitLine for [bool] {
    fn len(&self) -> usize {
        <[bool]>::len(self)
    }

    fn get(&self, pos: usize) -> bool {
        self[pos]
    }
}

impl BitLineMut for [bool] {
    fn set(&mut self, pos: usize, value: bool) {
        self[pos] = value;
    }
}

/// Thin all runs of set bits found in `source` by `radius`, writing into
/// `target`.
///
/// A run of at most `2 * radius` bits is replaced by its single middle bit
/// (rounded toward the start); longer runs lose `radius` bits at each end.
/// Only bits of runs are written, everything else in `target` is left as is.
pub fn thin_line<S, T>(source: &S, target: &mut T, radius: usize)
where
    S: BitLine + ?Sized,
    T: BitLineMut + ?Sized,
{
    debug_assert_eq!(source.len(), target.len());
    if radius == 0 {
        return;
    }
    let max = source.len();
    let mut pos = 0;
    while pos < max {
        while pos < max && !source.get(pos) {
            pos += 1;
        }
        if pos == max {
            break;
        }
        let start = pos;
        while pos < max && source.get(pos) {
            pos += 1;
        }
        let end = pos; // exclusive

        if end - start <= 2 * radius {
            for i in start..end {
                target.set(i, false);
            }
            target.set((start + end - 1) / 2, true);
        } else {
            for i in start..start + radius {
                target.set(i, false);
            }
            for i in end - radius..end {
                target.set(i, false);
            }
        }
    }
}

/// Thin structures of the image along rows by `x_radius` and along columns
/// by `y_radius`.
///
/// Both passes detect runs on the unmodified input, so edits of the row pass
/// never influence what the column pass sees.
pub fn thin_image_structures(img: &mut PackedBitImage, x_radius: usize, y_radius: usize) {
    if x_radius == 0 && y_radius == 0 {
        return;
    }
    debug!("Thinning structures by {}x{} pixels", x_radius, y_radius);
    let snapshot = img.clone();

    if x_radius > 0 {
        for y in 0..snapshot.height() {
            thin_line(&Row::new(&snapshot, y), &mut Row::new(&mut *img, y), x_radius);
        }
    }
    if y_radius > 0 {
        for x in 0..snapshot.width() {
            thin_line(&Column::new(&snapshot, x), &mut Column::new(&mut *img, x), y_radius);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bits(pattern: &str) -> Vec<bool> {
        pattern.chars().map(|c| c == '#').collect()
    }

    fn render(line: &[bool]) -> String {
        line.iter().map(|&b| if b { '#' } else { '.' }).collect()
    }

    fn thinned(pattern: &str, radius: usize) -> String {
        let source = bits(pattern);
        let mut target = source.clone();
        thin_line(source.as_slice(), target.as_mut_slice(), radius);
        render(&target)
    }

    /// (start, exclusive end) of every run of set bits
    fn runs(line: &[bool]) -> Vec<(usize, usize)> {
        let mut result = Vec::new();
        let mut pos = 0;
        while pos < line.len() {
            if line[pos] {
                let start = pos;
                while pos < line.len() && line[pos] {
                    pos += 1;
                }
                result.push((start, pos));
            } else {
                pos += 1;
            }
        }
        result
    }

    #[test]
    fn test_wide_run_loses_radius_at_each_end() {
        assert_eq!(thinned("..########..", 2), "....####....");
    }

    #[test]
    fn test_short_run_keeps_middle_bit() {
        assert_eq!(thinned("..####..", 2), "...#....");
        assert_eq!(thinned("..###...", 2), "...#....");
        assert_eq!(thinned(".##.....", 1), ".#......");
    }

    #[test]
    fn test_single_pixel_survives() {
        assert_eq!(thinned("#...#..#", 3), "#...#..#");
    }

    #[test]
    fn test_run_touching_both_edges() {
        assert_eq!(thinned("######", 1), ".####.");
        assert_eq!(thinned("######", 3), "..#...");
    }

    #[test]
    fn test_radius_zero_is_noop() {
        assert_eq!(thinned(".##.###.#", 0), ".##.###.#");
    }

    #[test]
    fn test_image_passes_read_from_unmodified_input() {
        // A 3x3 block: the row pass alone would leave the middle column, the
        // column pass alone the middle row. Both read the original block, so
        // the result is the intersection of the clears plus both survivors.
        let mut img = PackedBitImage::new(8, 5);
        for y in 1..4 {
            for x in 1..4 {
                img.set(x, y, true);
            }
        }
        thin_image_structures(&mut img, 2, 2);

        let set: Vec<(usize, usize)> = (0..5)
            .flat_map(|y| (0..8).map(move |x| (x, y)))
            .filter(|&(x, y)| img.get(x, y))
            .collect();
        // Row pass keeps x=2 in every row, column pass then clears rows 1 and
        // 3 of every column and keeps y=2.
        assert_eq!(set, vec![(1, 2), (2, 2), (3, 2)]);
    }

    #[test]
    fn test_image_radius_zero_is_noop() {
        let mut img = PackedBitImage::new(16, 4);
        img.set(3, 1, true);
        img.set(4, 1, true);
        let before = img.clone();
        thin_image_structures(&mut img, 0, 0);
        assert_eq!(img, before);
    }

    #[test]
    fn test_column_view_thins_vertically_only() {
        let mut img = PackedBitImage::new(8, 8);
        for y in 0..8 {
            img.set(2, y, true);
        }
        thin_image_structures(&mut img, 0, 2);
        let column: Vec<bool> = (0..8).map(|y| img.get(2, y)).collect();
        assert_eq!(render(&column), "..####..");
    }

    proptest! {
        #[test]
        fn prop_no_run_disappears(
            line in proptest::collection::vec(any::<bool>(), 0..200),
            radius in 0usize..8,
        ) {
            let mut target = line.clone();
            thin_line(line.as_slice(), target.as_mut_slice(), radius);
            for (start, end) in runs(&line) {
                prop_assert!(target[start..end].iter().any(|&b| b));
            }
            // Thinning only ever clears bits or keeps a bit of an original run.
            for (i, &b) in target.iter().enumerate() {
                prop_assert!(!b || line[i]);
            }
        }

        #[test]
        fn prop_short_runs_collapse_to_midpoint(
            line in proptest::collection::vec(any::<bool>(), 0..200),
            radius in 1usize..8,
        ) {
            let mut target = line.clone();
            thin_line(line.as_slice(), target.as_mut_slice(), radius);
            for (start, end) in runs(&line) {
                let kept: Vec<usize> = (start..end).filter(|&i| target[i]).collect();
                if end - start <= 2 * radius {
                    prop_assert_eq!(kept, vec![(start + end - 1) / 2]);
                } else {
                    prop_assert_eq!(kept, (start + radius..end - radius).collect::<Vec<_>>());
                }
            }
        }

        #[test]
        fn prop_radius_zero_is_identity(line in proptest::collection::vec(any::<bool>(), 0..200)) {
            let mut target = line.clone();
            thin_line(line.as_slice(), target.as_mut_slice(), 0);
            prop_assert_eq!(target, line);
        }
    }
}

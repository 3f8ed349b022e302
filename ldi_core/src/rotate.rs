/*!
Lossless quarter turns of packed bit images.

The image is processed in 8x8 pixel blocks: eight bytes from eight
consecutive rows are transposed as a bit matrix and written out to the
destination rows in reverse order, which turns the block counter-clockwise.
*/

use crate::bitmap::PackedBitImage;
use tracing::debug;

/// Transpose an 8x8 bit matrix, row `i` being byte `i` with its MSB in
/// column 0 (Hacker's Delight, transpose8rS32).
#[inline]
fn transpose8(a: [u8; 8]) -> [u8; 8] {
    let mut x = u32::from_be_bytes([a[0], a[1], a[2], a[3]]);
    let mut y = u32::from_be_bytes([a[4], a[5], a[6], a[7]]);

    let mut t = (x ^ (x >> 7)) & 0x00AA_00AA;
    x = x ^ t ^ (t << 7);
    t = (y ^ (y >> 7)) & 0x00AA_00AA;
    y = y ^ t ^ (t << 7);

    t = (x ^ (x >> 14)) & 0x0000_CCCC;
    x = x ^ t ^ (t << 14);
    t = (y ^ (y >> 14)) & 0x0000_CCCC;
    y = y ^ t ^ (t << 14);

    t = (x & 0xF0F0_F0F0) | ((y >> 4) & 0x0F0F_0F0F);
    y = ((x << 4) & 0xF0F0_F0F0) | (y & 0x0F0F_0F0F);
    x = t;

    let [b0, b1, b2, b3] = x.to_be_bytes();
    let [b4, b5, b6, b7] = y.to_be_bytes();
    [b0, b1, b2, b3, b4, b5, b6, b7]
}

/// Rotate by 90 degrees counter-clockwise.
///
/// Pixel `(x, y)` moves to `(y, content_width - 1 - x)`. The new content
/// width is the old height; the new height is the old content width, so
/// padding columns of the source never show up as blank rows.
pub fn rotate_ccw(source: &PackedBitImage) -> PackedBitImage {
    let content_width = source.content_width();
    let height = source.height();
    let mut dest = PackedBitImage::new(height, content_width);

    for by in 0..dest.bytes_per_row() {
        for bx in 0..source.bytes_per_row() {
            let mut block = [0u8; 8];
            for (k, byte) in block.iter_mut().enumerate() {
                let y = by * 8 + k;
                if y < height {
                    *byte = source.row(y)[bx];
                }
            }
            for (j, &byte) in transpose8(block).iter().enumerate() {
                let x = bx * 8 + j;
                if x >= content_width {
                    break;
                }
                dest.row_mut(content_width - 1 - x)[by] = byte;
            }
        }
    }
    dest
}

/// Apply `turns` counter-clockwise quarter turns; only `turns % 4` matters.
pub fn rotate_quarter_turns(image: PackedBitImage, turns: u32) -> PackedBitImage {
    let turns = turns % 4;
    if turns > 0 {
        debug!(
            "Rotating {}x{} image by {} degrees",
            image.content_width(),
            image.height(),
            turns * 90
        );
    }
    (0..turns).fold(image, |img, _| rotate_ccw(&img))
}

/*!
Packed 1-bit image.

Every row starts on a byte boundary and bits are stored MSB-first, the same
layout the PRU expects for a scan line. This lets the rotation and the
delivery channel work on raw rows without any repacking.
*/

use crate::error::{Result, ScannerError};
use std::io::{BufRead, Read, Write};

/// Largest bit buffer accepted from a file, 256MiB
pub const MAX_IMAGE_BYTES: usize = 256 << 20;

/// A bitmap image with packed bits and direct row access.
///
/// The width is rounded up to the next multiple of 8; padding columns are
/// always zero. The requested width is kept as the content width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBitImage {
    width: usize,
    content_width: usize,
    height: usize,
    bits: Vec<u8>,
}

impl PackedBitImage {
    /// Create a cleared image. `width` is rounded up to a full byte.
    pub fn new(width: usize, height: usize) -> Self {
        let aligned = (width + 7) & !0x7;
        Self {
            width: aligned,
            content_width: width,
            height,
            bits: vec![0; aligned / 8 * height],
        }
    }

    /// Like [`new`](Self::new), for dimensions from untrusted input: fails
    /// instead of overflowing, and rejects buffers over [`MAX_IMAGE_BYTES`].
    pub fn try_new(width: usize, height: usize) -> Result<Self> {
        let bytes = width
            .checked_add(7)
            .map(|w| w / 8)
            .and_then(|bpr| bpr.checked_mul(height))
            .ok_or_else(|| ScannerError::invalid_file_format(format!("Image of {width}x{height} pixels overflows")))?;
        if bytes > MAX_IMAGE_BYTES {
            return Err(ScannerError::invalid_file_format(format!(
                "Image of {width}x{height} pixels needs {bytes} bytes, limit is {MAX_IMAGE_BYTES}"
            )));
        }
        Ok(Self::new(width, height))
    }

    /// Byte-aligned width in pixels
    pub fn width(&self) -> usize {
        self.width
    }

    /// Width as requested on construction; columns beyond are padding.
    pub fn content_width(&self) -> usize {
        self.content_width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.width / 8
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        debug_assert!(x < self.width && y < self.height, "({x}, {y}) outside {}x{}", self.width, self.height);
        self.bits[y * self.bytes_per_row() + x / 8] & (0x80 >> (x % 8)) != 0
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        debug_assert!(x < self.width && y < self.height, "({x}, {y}) outside {}x{}", self.width, self.height);
        let index = y * self.bytes_per_row() + x / 8;
        let mask = 0x80 >> (x % 8);
        if value {
            self.bits[index] |= mask;
        } else {
            self.bits[index] &= !mask;
        }
    }

    /// Raw read access to a full row.
    pub fn row(&self, y: usize) -> &[u8] {
        let bpr = self.bytes_per_row();
        &self.bits[y * bpr..(y + 1) * bpr]
    }

    /// Raw write access to a full row.
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let bpr = self.bytes_per_row();
        &mut self.bits[y * bpr..(y + 1) * bpr]
    }

    /// The whole bit buffer, row after row
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    /// Copy the content of an image with identical dimensions.
    pub fn copy_from(&mut self, other: &PackedBitImage) {
        assert_eq!(
            (self.content_width, self.height),
            (other.content_width, other.height),
            "copy_from() needs identical dimensions"
        );
        self.bits.copy_from_slice(&other.bits);
    }

    /// Number of set pixels
    pub fn count_ones(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Write the image as binary PBM (P4). Set bits are black.
    pub fn write_pbm<W: Write>(&self, mut out: W) -> Result<()> {
        write!(out, "P4\n{} {}\n", self.content_width, self.height)?;
        out.write_all(&self.bits)?;
        out.flush()?;
        Ok(())
    }

    /// Read a binary PBM (P4) image.
    pub fn read_pbm<R: BufRead>(mut input: R) -> Result<Self> {
        let mut header = Vec::with_capacity(3);
        while header.len() < 3 {
            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Err(ScannerError::invalid_file_format("Truncated PBM header"));
            }
            let content = line.split('#').next().unwrap_or_default();
            header.extend(content.split_whitespace().map(str::to_owned));
        }
        if header[0] != "P4" {
            return Err(ScannerError::invalid_file_format(format!(
                "Expected P4 PBM, got magic {:?}",
                header[0]
            )));
        }
        let parse = |s: &str| {
            s.parse::<usize>()
                .map_err(|_| ScannerError::invalid_file_format(format!("Invalid PBM dimension {s:?}")))
        };
        let (width, height) = (parse(&header[1])?, parse(&header[2])?);

        let mut image = Self::try_new(width, height)?;
        let expected = image.bits.len();
        let mut bits = Vec::new();
        input.take(expected as u64).read_to_end(&mut bits)?;
        if bits.len() != expected {
            return Err(ScannerError::invalid_file_format(format!(
                "Truncated PBM data: {} of {} bytes",
                bits.len(),
                expected
            )));
        }
        image.bits = bits;
        if width % 8 != 0 {
            // P4 rows are byte aligned too, but whatever the writer left in
            // the padding bits must not leak into our zero padding.
            let mask = 0xffu8 << (8 - width % 8);
            let bpr = image.bytes_per_row();
            for y in 0..height {
                image.bits[y * bpr + bpr - 1] &= mask;
            }
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Seek, SeekFrom};

    #[test]
    fn test_width_is_byte_aligned() {
        let img = PackedBitImage::new(13, 3);
        assert_eq!(img.width(), 16);
        assert_eq!(img.content_width(), 13);
        assert_eq!(img.height(), 3);
        assert_eq!(img.bytes_per_row(), 2);
        assert_eq!(img.as_bytes().len(), 6);
        assert!(img.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_set_get_msb_first() {
        let mut img = PackedBitImage::new(16, 2);
        img.set(0, 0, true);
        img.set(9, 1, true);
        assert!(img.get(0, 0));
        assert!(img.get(9, 1));
        assert!(!img.get(1, 0));
        assert_eq!(img.row(0), &[0x80, 0x00]);
        assert_eq!(img.row(1), &[0x00, 0x40]);

        img.set(0, 0, false);
        assert_eq!(img.row(0), &[0x00, 0x00]);
        assert_eq!(img.count_ones(), 1);
    }

    #[test]
    fn test_row_mut_writes_through() {
        let mut img = PackedBitImage::new(8, 2);
        img.row_mut(1).copy_from_slice(&[0x01]);
        assert!(img.get(7, 1));
        assert!(!img.get(7, 0));
    }

    #[test]
    fn test_clone_is_deep() {
        let mut a = PackedBitImage::new(8, 1);
        a.set(3, 0, true);
        let b = a.clone();
        a.set(3, 0, false);
        assert!(b.get(3, 0));
        assert!(!a.get(3, 0));
    }

    #[test]
    fn test_copy_from() {
        let mut a = PackedBitImage::new(8, 2);
        let mut b = PackedBitImage::new(8, 2);
        b.set(5, 1, true);
        a.copy_from(&b);
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic]
    fn test_copy_from_rejects_other_dimensions() {
        let mut a = PackedBitImage::new(8, 2);
        a.copy_from(&PackedBitImage::new(16, 2));
    }

    #[test]
    fn test_pbm_file_roundtrip() {
        let mut img = PackedBitImage::new(21, 3);
        img.set(0, 0, true);
        img.set(20, 2, true);
        img.set(11, 1, true);

        let mut file = tempfile::tempfile().unwrap();
        img.write_pbm(&mut file).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let loaded = PackedBitImage::read_pbm(BufReader::new(file)).unwrap();
        assert_eq!(loaded, img);
    }

    #[test]
    fn test_read_pbm_masks_padding_and_skips_comments() {
        let mut data = b"P4\n# made by hand\n5 1\n".to_vec();
        data.push(0xff);
        let img = PackedBitImage::read_pbm(Cursor::new(data)).unwrap();
        assert_eq!(img.width(), 8);
        assert_eq!(img.content_width(), 5);
        assert_eq!(img.row(0), &[0xf8]);
    }

    #[test]
    fn test_read_pbm_rejects_overflowing_dimensions() {
        let err = PackedBitImage::read_pbm(Cursor::new(b"P4\n18446744073709551615 1\n".to_vec())).unwrap_err();
        assert!(matches!(err, ScannerError::InvalidFileFormat(_)), "{err}");

        let err = PackedBitImage::read_pbm(Cursor::new(b"P4\n4096 18446744073709551615\n".to_vec())).unwrap_err();
        assert!(matches!(err, ScannerError::InvalidFileFormat(_)), "{err}");
    }

    #[test]
    fn test_read_pbm_rejects_huge_image() {
        let err = PackedBitImage::read_pbm(Cursor::new(b"P4\n4000000000 4000000000\n\0".to_vec())).unwrap_err();
        assert!(matches!(err, ScannerError::InvalidFileFormat(_)), "{err}");
    }

    #[test]
    fn test_read_pbm_rejects_truncated_data() {
        let err = PackedBitImage::read_pbm(Cursor::new(b"P4\n16 4\n\xff\xff\xff".to_vec())).unwrap_err();
        assert!(matches!(err, ScannerError::InvalidFileFormat(_)), "{err}");
    }

    #[test]
    fn test_try_new_limits() {
        assert!(PackedBitImage::try_new(usize::MAX, 1).is_err());
        assert!(PackedBitImage::try_new(MAX_IMAGE_BYTES * 8 + 8, 1).is_err());
        let img = PackedBitImage::try_new(13, 3).unwrap();
        assert_eq!(img, PackedBitImage::new(13, 3));
    }

    #[test]
    fn test_read_pbm_rejects_ascii_variant() {
        let err = PackedBitImage::read_pbm(Cursor::new(b"P1\n1 1\n1\n".to_vec())).unwrap_err();
        assert!(matches!(err, ScannerError::InvalidFileFormat(_)));
    }
}

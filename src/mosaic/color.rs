use crate::mosaic::image::Image;

/// The per-channel arithmetic mean of a rectangular region of an image,
/// computed on the upper 8 bits of each 16-bit channel.
///
/// Serialized on the wire as 24 bytes: three little-endian IEEE-754
/// doubles, channels in order R, G, B.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorVector([f64; 3]);

impl ColorVector {
    pub const BYTE_LEN: usize = 24;

    pub fn new(r: f64, g: f64, b: f64) -> Self {
        ColorVector([r, g, b])
    }

    /// Average color of `img` over the sub-rectangle `(left, top, width, height)`.
    /// An empty rectangle (zero width or height) yields `(0, 0, 0)`.
    pub fn of_region(img: &(impl Image + ?Sized), rect: (u32, u32, u32, u32)) -> ColorVector {
        let (left, top, width, height) = rect;
        if width == 0 || height == 0 {
            return ColorVector([0.0, 0.0, 0.0]);
        }

        let mut r_sum = 0u64;
        let mut g_sum = 0u64;
        let mut b_sum = 0u64;

        for y in top..top + height {
            for x in left..left + width {
                let (r, g, b, _a) = img.at(x, y);
                // Upper 8 bits of each 16-bit channel.
                r_sum += u64::from(r >> 8);
                g_sum += u64::from(g >> 8);
                b_sum += u64::from(b >> 8);
            }
        }

        let count = f64::from(width) * f64::from(height);
        ColorVector([
            r_sum as f64 / count,
            g_sum as f64 / count,
            b_sum as f64 / count,
        ])
    }

    pub fn to_le_bytes(self) -> [u8; Self::BYTE_LEN] {
        let mut out = [0u8; Self::BYTE_LEN];
        out[0..8].copy_from_slice(&self.0[0].to_le_bytes());
        out[8..16].copy_from_slice(&self.0[1].to_le_bytes());
        out[16..24].copy_from_slice(&self.0[2].to_le_bytes());
        out
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Option<ColorVector> {
        if bytes.len() != Self::BYTE_LEN {
            return None;
        }
        let r = f64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let g = f64::from_le_bytes(bytes[8..16].try_into().ok()?);
        let b = f64::from_le_bytes(bytes[16..24].try_into().ok()?);
        Some(ColorVector([r, g, b]))
    }

    /// Squared Euclidean distance, used for nearest-neighbor ranking.
    pub fn squared_distance(&self, other: &ColorVector) -> f64 {
        let dr = self.0[0] - other.0[0];
        let dg = self.0[1] - other.0[1];
        let db = self.0[2] - other.0[2];
        dr * dr + dg * dg + db * db
    }

    pub fn as_array(&self) -> [f64; 3] {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{Rgb, RgbImage};

    #[test]
    fn uniform_color_average_matches_the_color() {
        let mut img = RgbImage::new(4, 4);
        for p in img.pixels_mut() {
            *p = Rgb([12, 200, 77]);
        }
        let avg = ColorVector::of_region(&img, (0, 0, 4, 4));
        assert_eq!(avg, ColorVector::new(12.0, 200.0, 77.0));
    }

    #[test]
    fn empty_region_is_zero() {
        let img = RgbImage::new(4, 4);
        assert_eq!(
            ColorVector::of_region(&img, (0, 0, 0, 4)),
            ColorVector::new(0.0, 0.0, 0.0)
        );
        assert_eq!(
            ColorVector::of_region(&img, (0, 0, 4, 0)),
            ColorVector::new(0.0, 0.0, 0.0)
        );
    }

    #[test]
    fn byte_round_trip_is_exact() {
        let v = ColorVector::new(1.5, 255.0, 0.0);
        let bytes = v.to_le_bytes();
        assert_eq!(bytes.len(), ColorVector::BYTE_LEN);
        assert_eq!(ColorVector::from_le_bytes(&bytes), Some(v));
    }

    #[test]
    fn from_le_bytes_rejects_wrong_length() {
        assert_eq!(ColorVector::from_le_bytes(&[0u8; 23]), None);
    }

    #[test]
    fn average_of_mixed_region() {
        let img = RgbImage::from_fn(2, 2, |x, y| match (x, y) {
            (0, 0) => Rgb([100, 150, 200]),
            (1, 0) => Rgb([200, 100, 50]),
            (0, 1) => Rgb([50, 200, 100]),
            (1, 1) => Rgb([150, 50, 150]),
            _ => unreachable!(),
        });
        let avg = ColorVector::of_region(&img, (0, 0, 2, 2));
        assert_eq!(avg, ColorVector::new(125.0, 125.0, 125.0));
    }
}

use ::image::{GenericImageView, Rgb, RgbImage};

/// A rectangular raster with a 16-bit-per-channel pixel sampler.
///
/// All algorithms in this crate operate on the upper 8 bits of each
/// channel; the 16-bit surface exists so the trait is not tied to any one
/// backing buffer's bit depth.
pub trait Image {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Sample a pixel as 16-bit (R, G, B, A).
    fn at(&self, x: u32, y: u32) -> (u16, u16, u16, u16);

    fn bounds(&self) -> (u32, u32, u32, u32) {
        (0, 0, self.width(), self.height())
    }
}

/// 8-bit channels are widened to 16-bit by byte replication (`v as u16 * 257`),
/// the standard bit-depth upconversion — it is exact and invertible by `>> 8`.
fn widen(v: u8) -> u16 {
    (v as u16) * 257
}

impl Image for RgbImage {
    fn width(&self) -> u32 {
        GenericImageView::dimensions(self).0
    }
    fn height(&self) -> u32 {
        GenericImageView::dimensions(self).1
    }
    fn at(&self, x: u32, y: u32) -> (u16, u16, u16, u16) {
        let Rgb([r, g, b]) = *self.get_pixel(x, y);
        (widen(r), widen(g), widen(b), widen(255))
    }
}

impl Image for ::image::RgbaImage {
    fn width(&self) -> u32 {
        GenericImageView::dimensions(self).0
    }
    fn height(&self) -> u32 {
        GenericImageView::dimensions(self).1
    }
    fn at(&self, x: u32, y: u32) -> (u16, u16, u16, u16) {
        let ::image::Rgba([r, g, b, a]) = *self.get_pixel(x, y);
        (widen(r), widen(g), widen(b), widen(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_then_truncate_round_trips() {
        for v in 0..=255u8 {
            let w = widen(v);
            assert_eq!((w >> 8) as u8, v);
        }
    }

    #[test]
    fn rgb_image_reports_full_alpha() {
        let img = RgbImage::from_fn(1, 1, |_, _| Rgb([10, 20, 30]));
        let (r, g, b, a) = Image::at(&img, 0, 0);
        assert_eq!((r >> 8, g >> 8, b >> 8, a >> 8), (10, 20, 30, 255));
    }
}

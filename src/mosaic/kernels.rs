//! Downscaling kernels used to resize a retrieved tile to the cell's edge
//! length. Deliberately plain, unvectorized implementations.

use ::image::{Rgb, RgbImage};

/// Resize by sampling the nearest source pixel per output pixel.
pub fn nearest_neighbor_resize(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = (img.width(), img.height());
    RgbImage::from_fn(width, height, |x, y| {
        let sx = (x * src_w / width.max(1)).min(src_w.saturating_sub(1));
        let sy = (y * src_h / height.max(1)).min(src_h.saturating_sub(1));
        *img.get_pixel(sx, sy)
    })
}

/// Resize by averaging the source pixels that fall under each output cell.
pub fn average_pool_resize(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = (img.width(), img.height());
    if width == 0 || height == 0 || src_w == 0 || src_h == 0 {
        return RgbImage::new(width, height);
    }

    RgbImage::from_fn(width, height, |x, y| {
        let x0 = x * src_w / width;
        let x1 = ((x + 1) * src_w / width).max(x0 + 1).min(src_w);
        let y0 = y * src_h / height;
        let y1 = ((y + 1) * src_h / height).max(y0 + 1).min(src_h);

        let mut r_sum = 0u64;
        let mut g_sum = 0u64;
        let mut b_sum = 0u64;
        for sy in y0..y1 {
            for sx in x0..x1 {
                let Rgb([r, g, b]) = *img.get_pixel(sx, sy);
                r_sum += u64::from(r);
                g_sum += u64::from(g);
                b_sum += u64::from(b);
            }
        }
        let count = u64::from(x1 - x0) * u64::from(y1 - y0);
        Rgb([
            (r_sum / count) as u8,
            (g_sum / count) as u8,
            (b_sum / count) as u8,
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_pool_of_uniform_image_preserves_color() {
        let img = RgbImage::from_fn(8, 8, |_, _| Rgb([10, 20, 30]));
        let out = average_pool_resize(&img, 2, 2);
        assert_eq!(out.width(), 2);
        assert_eq!(out.height(), 2);
        for p in out.pixels() {
            assert_eq!(*p, Rgb([10, 20, 30]));
        }
    }

    #[test]
    fn average_pool_upsizes() {
        let img = RgbImage::from_fn(2, 2, |_, _| Rgb([1, 2, 3]));
        let out = average_pool_resize(&img, 4, 4);
        assert_eq!((out.width(), out.height()), (4, 4));
        assert_eq!(*out.get_pixel(0, 0), Rgb([1, 2, 3]));
    }

    #[test]
    fn nearest_neighbor_preserves_uniform_color() {
        let img = RgbImage::from_fn(5, 5, |_, _| Rgb([9, 9, 9]));
        let out = nearest_neighbor_resize(&img, 3, 3);
        assert!(out.pixels().all(|p| *p == Rgb([9, 9, 9])));
    }

    #[test]
    fn degenerate_target_size_is_empty_not_panicking() {
        let img = RgbImage::from_fn(4, 4, |_, _| Rgb([1, 1, 1]));
        let out = average_pool_resize(&img, 0, 4);
        assert_eq!(out.width(), 0);
    }
}

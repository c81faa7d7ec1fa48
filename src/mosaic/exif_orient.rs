//! EXIF orientation correction for downloaded tile images, operating
//! directly on an in-memory byte buffer (downloaded payloads never touch
//! disk before decoding).

use std::io::Cursor;

use exif::{In, Tag};
use image::{imageops, DynamicImage};

/// Read the EXIF orientation tag (1-8), defaulting to 1 (no transform) if
/// absent or unreadable.
pub fn read_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = exif::Reader::new();
    let exif = match reader.read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(_) => return 1,
    };
    match exif.get_field(Tag::Orientation, In::PRIMARY) {
        Some(field) => match field.value.get_uint(0) {
            Some(v @ 1..=8) => v,
            _ => 1,
        },
        None => 1,
    }
}

/// Apply the EXIF orientation transform to a decoded image.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => DynamicImage::ImageRgba8(imageops::flip_horizontal(&img)),
        3 => DynamicImage::ImageRgba8(imageops::rotate180(&img)),
        4 => DynamicImage::ImageRgba8(imageops::flip_vertical(&img)),
        5 => DynamicImage::ImageRgba8(imageops::flip_horizontal(&imageops::rotate90(&img))),
        6 => DynamicImage::ImageRgba8(imageops::rotate90(&img)),
        7 => DynamicImage::ImageRgba8(imageops::flip_horizontal(&imageops::rotate270(&img))),
        8 => DynamicImage::ImageRgba8(imageops::rotate270(&img)),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_exif_defaults_to_no_transform() {
        assert_eq!(read_orientation(b"not a real image"), 1);
    }

    #[test]
    fn unknown_orientation_is_identity() {
        let img = DynamicImage::new_rgb8(2, 2);
        let out = apply_orientation(img.clone(), 1);
        assert_eq!(out.to_rgb8(), img.to_rgb8());
    }
}

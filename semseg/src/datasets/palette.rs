//! Rendering class-index masks as color images.

use image::{GrayImage, Rgb, RgbImage};

/// Color of `class` in the bit-interleaved palette used by PASCAL VOC.
///
/// Used for datasets that do not define their own colors.
pub const fn palette_color(class: u8) -> [u8; 3] {
    let mut color = [0u8; 3];
    let mut c = class;
    let mut j = 0;
    while j < 8 {
        color[0] |= (c & 1) << (7 - j);
        color[1] |= ((c >> 1) & 1) << (7 - j);
        color[2] |= ((c >> 2) & 1) << (7 - j);
        c >>= 3;
        j += 1;
    }
    color
}

/// Render a class-index mask with `colors`.
///
/// Classes without an entry in `colors` (including the ignore index) fall back to
/// [`palette_color`].
pub fn colorize(target: &GrayImage, colors: Option<&[[u8; 3]]>) -> RgbImage {
    RgbImage::from_fn(target.width(), target.height(), |x, y| {
        let class = target.get_pixel(x, y).0[0];
        let color = colors
            .and_then(|colors| colors.get(class as usize).copied())
            .unwrap_or_else(|| palette_color(class));
        Rgb(color)
    })
}

use image::{DynamicImage, Rgba, RgbaImage};

/// Width of the image substituted when the engine yields no image for a step.
pub const PLACEHOLDER_WIDTH: u32 = 256;
/// Height of the image substituted when the engine yields no image for a step.
pub const PLACEHOLDER_HEIGHT: u32 = 256;

/// A solid white 256x256 image.
pub fn placeholder_image() -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        PLACEHOLDER_WIDTH,
        PLACEHOLDER_HEIGHT,
        Rgba([255, 255, 255, 255]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_white() {
        let img = placeholder_image().to_rgba8();
        assert_eq!(img.dimensions(), (256, 256));
        assert!(img.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
    }
}

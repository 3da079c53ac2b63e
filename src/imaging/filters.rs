//! Pixel filters for filter-chain derivations.
//!
//! A chain is applied in the order given; filters do not commute
//! (`[Brightness(30), Grayscale]` is not `[Grayscale, Brightness(30)]`),
//! so the chain key lists them in order.

use image::DynamicImage;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Grayscale,
    Invert,
    GaussianBlur { sigma: f32 },
    UnsharpMask { sigma: f32, threshold: i32 },
    /// Additive brightness change, -255..255.
    Brightness(i32),
    /// Contrast change in percent; negative reduces contrast.
    Contrast(f32),
    /// Hue rotation in degrees.
    Hue(i32),
    FlipHorizontal,
    FlipVertical,
}

impl Filter {
    /// Stable key fragment for file names and fingerprints.
    pub fn key(&self) -> String {
        match self {
            Filter::Grayscale => "grayscale".to_string(),
            Filter::Invert => "invert".to_string(),
            Filter::GaussianBlur { sigma } => format!("gaussianblur{sigma}"),
            Filter::UnsharpMask { sigma, threshold } => format!("unsharpmask{sigma}-{threshold}"),
            Filter::Brightness(v) => format!("brightness{v}"),
            Filter::Contrast(v) => format!("contrast{v}"),
            Filter::Hue(v) => format!("hue{v}"),
            Filter::FlipHorizontal => "fliph".to_string(),
            Filter::FlipVertical => "flipv".to_string(),
        }
    }

    /// Run the filter on a decoded frame.
    pub fn apply(&self, img: DynamicImage) -> DynamicImage {
        match self {
            Filter::Grayscale => img.grayscale(),
            Filter::Invert => {
                let mut img = img;
                img.invert();
                img
            }
            Filter::GaussianBlur { sigma } => img.blur(*sigma),
            Filter::UnsharpMask { sigma, threshold } => img.unsharpen(*sigma, *threshold),
            Filter::Brightness(v) => img.brighten(*v),
            Filter::Contrast(v) => img.adjust_contrast(*v),
            Filter::Hue(v) => img.huerotate(*v),
            Filter::FlipHorizontal => img.fliph(),
            Filter::FlipVertical => img.flipv(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    #[test]
    fn keys_are_stable() {
        assert_eq!(Filter::GaussianBlur { sigma: 6.0 }.key(), "gaussianblur6");
        assert_eq!(Filter::GaussianBlur { sigma: 1.5 }.key(), "gaussianblur1.5");
        assert_eq!(
            Filter::UnsharpMask {
                sigma: 1.0,
                threshold: 0
            }
            .key(),
            "unsharpmask1-0"
        );
        assert_eq!(Filter::Brightness(-10).key(), "brightness-10");
    }

    #[test]
    fn invert_flips_channels() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([10, 20, 30])));
        let out = Filter::Invert.apply(img);
        assert_eq!(out.get_pixel(0, 0).0, [245, 235, 225, 255]);
    }

    #[test]
    fn flips_keep_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 2));
        assert_eq!(Filter::FlipHorizontal.apply(img.clone()).dimensions(), (4, 2));
        assert_eq!(Filter::FlipVertical.apply(img).dimensions(), (4, 2));
    }
}

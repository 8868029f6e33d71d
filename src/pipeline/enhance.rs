//! Image variants: three binarised renderings of the rectified card.
//!
//! ```text
//! card ─▶ gray ─▶ 2× cubic upscale ─▶ bilateral(d=9, σc=75, σs=75)
//!      ─▶ gaussian adaptive threshold(block 11, C 2) = Standard
//!                                 ├─▶ invert            = Inverted
//!                                 └─▶ dilate            = Dilated
//! ```
//!
//! The order is part of the contract: the recogniser picks its page
//! segmentation mode from the variant index.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology;
use tracing::debug;

const BILATERAL_RADIUS: usize = 4;
const BILATERAL_SIGMA_COLOR: f32 = 75.0;
const BILATERAL_SIGMA_SPACE: f32 = 75.0;
/// Sigma of an 11×11 Gaussian window when derived from the block size.
const THRESHOLD_SIGMA: f32 = 2.0;
const THRESHOLD_C: i16 = 2;

/// Which enhancement produced a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    /// Dark text on white after adaptive thresholding.
    Standard,
    /// Bitwise inverse of `Standard`, for light-on-dark cards.
    Inverted,
    /// `Standard` after a 3×3 dilation.
    Dilated,
}

/// One binarised rendering handed to the recogniser.
#[derive(Debug, Clone)]
pub struct Variant {
    /// Position in the variant list; 0 = standard, 1 = inverted, 2 = dilated.
    pub index: usize,
    pub kind: VariantKind,
    pub image: GrayImage,
}

/// Build the three variants, always in `[Standard, Inverted, Dilated]` order.
pub fn generate_variants(card: &DynamicImage) -> Vec<Variant> {
    let gray = card.to_luma8();
    let (w, h) = gray.dimensions();
    let scaled = imageops::resize(&gray, w * 2, h * 2, FilterType::CatmullRom);
    let denoised = bilateral_filter(
        &scaled,
        BILATERAL_RADIUS,
        BILATERAL_SIGMA_SPACE,
        BILATERAL_SIGMA_COLOR,
    );

    let standard = adaptive_threshold_gaussian(&denoised, THRESHOLD_SIGMA, THRESHOLD_C);
    let mut inverted = standard.clone();
    imageops::invert(&mut inverted);
    let dilated = morphology::dilate(&standard, Norm::LInf, 1);

    debug!("Enhance: {}x{} card → 3 variants at {}x{}", w, h, w * 2, h * 2);

    vec![
        Variant {
            index: 0,
            kind: VariantKind::Standard,
            image: standard,
        },
        Variant {
            index: 1,
            kind: VariantKind::Inverted,
            image: inverted,
        },
        Variant {
            index: 2,
            kind: VariantKind::Dilated,
            image: dilated,
        },
    ]
}

/// Edge-preserving smoothing, separable approximation.
///
/// Each pass weights neighbours by spatial distance and by intensity
/// difference, so flat regions blur while strokes keep their edges.
pub fn bilateral_filter(
    img: &GrayImage,
    radius: usize,
    sigma_space: f32,
    sigma_color: f32,
) -> GrayImage {
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    if w == 0 || h == 0 {
        return img.clone();
    }

    let mut color_lut = [0.0f32; 256];
    let color_coeff = -1.0 / (2.0 * sigma_color * sigma_color);
    for (i, v) in color_lut.iter_mut().enumerate() {
        *v = (color_coeff * (i as f32).powi(2)).exp();
    }

    let diameter = 2 * radius + 1;
    let space_coeff = -1.0 / (2.0 * sigma_space * sigma_space);
    let spatial_lut: Vec<f32> = (0..diameter)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (space_coeff * d * d).exp()
        })
        .collect();

    let src = img.as_raw();
    let mut temp = vec![0u8; w * h];
    let mut out = vec![0u8; w * h];

    let smooth = |center: u8, neighbours: &mut dyn Iterator<Item = u8>| -> u8 {
        let mut sum_weights = 0.0f32;
        let mut filtered = 0.0f32;
        for (k, n) in neighbours.enumerate() {
            let diff = (i32::from(center) - i32::from(n)).unsigned_abs() as usize;
            let weight = spatial_lut[k] * color_lut[diff];
            filtered += f32::from(n) * weight;
            sum_weights += weight;
        }
        (filtered / sum_weights).round().clamp(0.0, 255.0) as u8
    };

    // Horizontal pass.
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let mut it = (0..diameter).map(|dx| {
                let nx = (x as isize + dx as isize - radius as isize).clamp(0, w as isize - 1);
                row[nx as usize]
            });
            temp[y * w + x] = smooth(row[x], &mut it);
        }
    }

    // Vertical pass.
    for y in 0..h {
        for x in 0..w {
            let mut it = (0..diameter).map(|dy| {
                let ny = (y as isize + dy as isize - radius as isize).clamp(0, h as isize - 1);
                temp[ny as usize * w + x]
            });
            out[y * w + x] = smooth(temp[y * w + x], &mut it);
        }
    }

    GrayImage::from_raw(w as u32, h as u32, out).unwrap_or_else(|| img.clone())
}

/// Local thresholding against a Gaussian-weighted neighbourhood mean.
///
/// A pixel becomes white (255) when it is brighter than `mean - c`, black
/// otherwise. Uneven lighting across the card is absorbed by the local mean.
pub fn adaptive_threshold_gaussian(img: &GrayImage, sigma: f32, c: i16) -> GrayImage {
    let local_mean = gaussian_blur_f32(img, sigma);
    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, px) in img.enumerate_pixels() {
        let threshold = i16::from(local_mean.get_pixel(x, y)[0]) - c;
        let v = if i16::from(px[0]) > threshold { 255 } else { 0 };
        out.put_pixel(x, y, Luma([v]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn card_with_bar() -> DynamicImage {
        let mut img = RgbImage::from_pixel(40, 20, Rgb([250, 250, 250]));
        for y in 8..12 {
            for x in 5..35 {
                img.put_pixel(x, y, Rgb([10, 10, 10]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn always_three_variants_in_fixed_order() {
        let v = generate_variants(&card_with_bar());
        assert_eq!(v.len(), 3);
        let kinds: Vec<_> = v.iter().map(|x| x.kind).collect();
        assert_eq!(
            kinds,
            [VariantKind::Standard, VariantKind::Inverted, VariantKind::Dilated]
        );
        for (i, var) in v.iter().enumerate() {
            assert_eq!(var.index, i);
            assert_eq!(var.image.dimensions(), (80, 40));
        }
    }

    #[test]
    fn inverted_is_exact_bitwise_inverse() {
        let v = generate_variants(&card_with_bar());
        for (a, b) in v[0].image.pixels().zip(v[1].image.pixels()) {
            assert_eq!(a[0], !b[0]);
        }
    }

    #[test]
    fn variants_are_binary() {
        let v = generate_variants(&card_with_bar());
        for var in &v {
            assert!(var.image.pixels().all(|p| p[0] == 0 || p[0] == 255));
        }
    }

    #[test]
    fn dilation_never_darkens() {
        let v = generate_variants(&card_with_bar());
        for (s, d) in v[0].image.pixels().zip(v[2].image.pixels()) {
            assert!(d[0] >= s[0]);
        }
    }

    #[test]
    fn threshold_marks_dark_stroke_black() {
        let v = generate_variants(&card_with_bar());
        // Inside the bar, upscaled.
        assert_eq!(v[0].image.get_pixel(30, 19)[0], 0);
        // Background far from the bar stays white.
        assert_eq!(v[0].image.get_pixel(2, 2)[0], 255);
    }

    #[test]
    fn bilateral_keeps_flat_image_flat() {
        let img = GrayImage::from_pixel(10, 10, Luma([128]));
        let out = bilateral_filter(&img, 4, 75.0, 75.0);
        assert!(out.pixels().all(|p| p[0] == 128));
    }

    #[test]
    fn bilateral_preserves_strong_edge() {
        let mut img = GrayImage::from_pixel(20, 10, Luma([0]));
        for y in 0..10 {
            for x in 10..20 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let out = bilateral_filter(&img, 3, 3.0, 10.0);
        assert!(out.get_pixel(5, 5)[0] < 10);
        assert!(out.get_pixel(15, 5)[0] > 245);
    }
}

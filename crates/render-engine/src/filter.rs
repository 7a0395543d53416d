//! Color filters.
//!
//! Each named filter expands to a chain of Filter Effects primitives
//! (`grayscale`, `sepia`, `saturate`, `hue-rotate`, `invert`) applied in
//! order on sRGB values, clamping to `[0, 1]` after every step.

use image::RgbaImage;

use neoncut_project_model::ColorFilter;

/// Row-major 3x3 matrix over normalized RGB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMatrix(pub [[f32; 3]; 3]);

impl ColorMatrix {
    pub const IDENTITY: ColorMatrix = ColorMatrix([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    /// `grayscale(amount)`.
    pub fn grayscale(amount: f32) -> Self {
        let a = 1.0 - amount.clamp(0.0, 1.0);
        ColorMatrix([
            [0.2126 + 0.7874 * a, 0.7152 - 0.7152 * a, 0.0722 - 0.0722 * a],
            [0.2126 - 0.2126 * a, 0.7152 + 0.2848 * a, 0.0722 - 0.0722 * a],
            [0.2126 - 0.2126 * a, 0.7152 - 0.7152 * a, 0.0722 + 0.9278 * a],
        ])
    }

    /// `sepia(amount)`.
    pub fn sepia(amount: f32) -> Self {
        let a = 1.0 - amount.clamp(0.0, 1.0);
        ColorMatrix([
            [0.393 + 0.607 * a, 0.769 - 0.769 * a, 0.189 - 0.189 * a],
            [0.349 - 0.349 * a, 0.686 + 0.314 * a, 0.168 - 0.168 * a],
            [0.272 - 0.272 * a, 0.534 - 0.534 * a, 0.131 + 0.869 * a],
        ])
    }

    /// `saturate(amount)`; 1.0 is identity.
    pub fn saturate(amount: f32) -> Self {
        let s = amount.max(0.0);
        ColorMatrix([
            [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
            [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
            [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
        ])
    }

    /// `hue-rotate(degrees)`.
    pub fn hue_rotate(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        ColorMatrix([
            [
                0.213 + cos * 0.787 - sin * 0.213,
                0.715 - cos * 0.715 - sin * 0.715,
                0.072 - cos * 0.072 + sin * 0.928,
            ],
            [
                0.213 - cos * 0.213 + sin * 0.143,
                0.715 + cos * 0.285 + sin * 0.140,
                0.072 - cos * 0.072 - sin * 0.283,
            ],
            [
                0.213 - cos * 0.213 - sin * 0.787,
                0.715 - cos * 0.715 + sin * 0.715,
                0.072 + cos * 0.928 + sin * 0.072,
            ],
        ])
    }

    fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        let mut out = [0.0; 3];
        for (row, value) in m.iter().zip(out.iter_mut()) {
            *value = (row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2]).clamp(0.0, 1.0);
        }
        out
    }
}

/// One step in a filter chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOp {
    Matrix(ColorMatrix),
    /// `invert(amount)`.
    Invert(f32),
}

impl FilterOp {
    fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        match self {
            FilterOp::Matrix(matrix) => matrix.apply(rgb),
            FilterOp::Invert(amount) => {
                rgb.map(|v| (amount * (1.0 - v) + (1.0 - amount) * v).clamp(0.0, 1.0))
            }
        }
    }
}

/// The filter primitives a named filter expands to.
pub fn filter_chain(filter: ColorFilter) -> Vec<FilterOp> {
    match filter {
        ColorFilter::None => Vec::new(),
        ColorFilter::Grayscale => vec![FilterOp::Matrix(ColorMatrix::grayscale(1.0))],
        ColorFilter::Sepia => vec![FilterOp::Matrix(ColorMatrix::sepia(1.0))],
        ColorFilter::Invert => vec![FilterOp::Invert(1.0)],
        ColorFilter::Warm => vec![
            FilterOp::Matrix(ColorMatrix::sepia(0.5)),
            FilterOp::Matrix(ColorMatrix::hue_rotate(-30.0)),
            FilterOp::Matrix(ColorMatrix::saturate(1.4)),
        ],
        ColorFilter::Cool => vec![
            FilterOp::Matrix(ColorMatrix::hue_rotate(180.0)),
            FilterOp::Matrix(ColorMatrix::saturate(0.8)),
        ],
    }
}

/// Filter a single RGBA pixel. Alpha is untouched.
pub fn filter_pixel(chain: &[FilterOp], pixel: [u8; 4]) -> [u8; 4] {
    if chain.is_empty() {
        return pixel;
    }
    let mut rgb = [
        f32::from(pixel[0]) / 255.0,
        f32::from(pixel[1]) / 255.0,
        f32::from(pixel[2]) / 255.0,
    ];
    for op in chain {
        rgb = op.apply(rgb);
    }
    [
        (rgb[0] * 255.0).round() as u8,
        (rgb[1] * 255.0).round() as u8,
        (rgb[2] * 255.0).round() as u8,
        pixel[3],
    ]
}

/// Filter an image in place.
pub fn apply_filter(image: &mut RgbaImage, filter: ColorFilter) {
    let chain = filter_chain(filter);
    if chain.is_empty() {
        return;
    }
    for pixel in image.pixels_mut() {
        pixel.0 = filter_pixel(&chain, pixel.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: ColorFilter, pixel: [u8; 4]) -> [u8; 4] {
        filter_pixel(&filter_chain(filter), pixel)
    }

    #[test]
    fn test_none_is_identity() {
        assert_eq!(run(ColorFilter::None, [10, 20, 30, 40]), [10, 20, 30, 40]);
    }

    #[test]
    fn test_grayscale_desaturates_fully() {
        let [r, g, b, a] = run(ColorFilter::Grayscale, [200, 40, 90, 255]);
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_invert_flips_channels() {
        assert_eq!(run(ColorFilter::Invert, [255, 0, 100, 128]), [0, 255, 155, 128]);
    }

    #[test]
    fn test_sepia_tints_white_toward_yellow() {
        let [r, g, b, _] = run(ColorFilter::Sepia, [255, 255, 255, 255]);
        assert_eq!(r, 255);
        assert!(g > b);
        assert!(r > b);
    }

    #[test]
    fn test_warm_pushes_neutral_gray_toward_red() {
        let [r, _, b, _] = run(ColorFilter::Warm, [128, 128, 128, 255]);
        assert!(r > b);
    }

    #[test]
    fn test_cool_turns_red_toward_cyan() {
        let [r, g, b, _] = run(ColorFilter::Cool, [255, 0, 0, 255]);
        assert!(g > r);
        assert!(b > r);
    }

    #[test]
    fn test_hue_rotate_and_saturate_keep_gray() {
        for matrix in [ColorMatrix::hue_rotate(73.0), ColorMatrix::saturate(1.4)] {
            let [r, g, b] = matrix.apply([0.5, 0.5, 0.5]);
            assert!((r - 0.5).abs() < 1e-3);
            assert!((g - 0.5).abs() < 1e-3);
            assert!((b - 0.5).abs() < 1e-3);
        }
    }

    #[test]
    fn test_apply_filter_on_image() {
        let mut image = RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 0, 255]));
        apply_filter(&mut image, ColorFilter::Invert);
        assert!(image.pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }
}

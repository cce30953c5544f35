//! Pixel-level primitives shared by the pipeline stages.
//!
//! * [`GrayView`]: a borrowed 8-bit grayscale view with its own row stride.
//!   Crops are zero-copy and keep the parent's stride, so a tile that does
//!   not span the full page width is *not* dense and must be packed with
//!   [`GrayView::to_dense`] before it reaches the classifier.
//! * [`to_gray`] / [`cap_dimension`]: the sampler's normalisation pre-pass.
//! * [`new_canvas`] / [`rotate_into`]: arbitrary-angle rotation into a
//!   destination whose size the caller chooses (the skew stage swaps width
//!   and height for near-90° corrections).
//! * [`quarter_turn`]: lossless 90°-multiple rotation.

use crate::error::OrientError;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use std::borrow::Cow;

/// A borrowed, possibly strided, 8-bit grayscale view.
#[derive(Debug, Clone, Copy)]
pub struct GrayView<'a> {
    pixels: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
}

impl<'a> GrayView<'a> {
    /// Wrap a raw buffer. Returns `None` if `pixels` is too short for the
    /// given geometry or `stride < width`.
    pub fn new(pixels: &'a [u8], width: u32, height: u32, stride: usize) -> Option<Self> {
        if stride < width as usize {
            return None;
        }
        if pixels.len() < required_len(width, height, stride) {
            return None;
        }
        Some(Self {
            pixels,
            width,
            height,
            stride,
        })
    }

    /// View a whole grayscale image. Always dense.
    pub fn from_image(image: &'a GrayImage) -> Self {
        Self {
            pixels: image.as_raw(),
            width: image.width(),
            height: image.height(),
            stride: image.width() as usize,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Distance in bytes between the starts of consecutive rows.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// True when rows are packed back-to-back (`stride == width`).
    pub fn is_dense(&self) -> bool {
        self.stride == self.width as usize
    }

    /// Backing bytes, starting at the view origin.
    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }

    /// Row `y` of the view (`width` bytes).
    ///
    /// # Panics
    /// If `y >= height`.
    pub fn row(&self, y: u32) -> &'a [u8] {
        assert!(y < self.height, "row {y} out of range (height {})", self.height);
        let start = y as usize * self.stride;
        &self.pixels[start..start + self.width as usize]
    }

    /// Zero-copy sub-region. The result shares this view's buffer and stride.
    ///
    /// Returns `None` when the rectangle leaves the view.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Option<GrayView<'a>> {
        if x.checked_add(width)? > self.width || y.checked_add(height)? > self.height {
            return None;
        }
        let offset = y as usize * self.stride + x as usize;
        let len = required_len(width, height, self.stride);
        let pixels = if len == 0 {
            &self.pixels[..0]
        } else {
            &self.pixels[offset..offset + len]
        };
        Some(GrayView {
            pixels,
            width,
            height,
            stride: self.stride,
        })
    }

    /// Pixels packed with `stride == width`.
    ///
    /// Borrows when the view is already dense, copies row by row otherwise.
    pub fn to_dense(&self) -> Cow<'a, [u8]> {
        let len = self.width as usize * self.height as usize;
        if self.is_dense() {
            return Cow::Borrowed(&self.pixels[..len]);
        }
        let mut packed = Vec::with_capacity(len);
        for y in 0..self.height {
            packed.extend_from_slice(self.row(y));
        }
        Cow::Owned(packed)
    }
}

fn required_len(width: u32, height: u32, stride: usize) -> usize {
    if width == 0 || height == 0 {
        0
    } else {
        (height as usize - 1) * stride + width as usize
    }
}

// ── Normalisation ────────────────────────────────────────────────────────

/// Single-channel 8-bit version of `image`, borrowed when it already is one.
pub fn to_gray(image: &DynamicImage) -> Cow<'_, GrayImage> {
    match image.as_luma8() {
        Some(gray) => Cow::Borrowed(gray),
        None => Cow::Owned(image.to_luma8()),
    }
}

/// Downscale so the longest edge is at most `max_dimension`, keeping the
/// aspect ratio. Images already within the cap pass through untouched.
pub fn cap_dimension(gray: Cow<'_, GrayImage>, max_dimension: u32) -> Cow<'_, GrayImage> {
    let (w, h) = gray.dimensions();
    let longest = w.max(h);
    if longest <= max_dimension || max_dimension == 0 {
        return gray;
    }
    let (nw, nh) = if w >= h {
        (max_dimension, scale_edge(h, max_dimension, w))
    } else {
        (scale_edge(w, max_dimension, h), max_dimension)
    };
    Cow::Owned(image::imageops::resize(&*gray, nw, nh, FilterType::Triangle))
}

fn scale_edge(edge: u32, numerator: u32, denominator: u32) -> u32 {
    ((edge as u64 * numerator as u64) / denominator as u64).max(1) as u32
}

// ── Rotation ─────────────────────────────────────────────────────────────

/// Allocate a white canvas of the given size in the pixel format of `like`.
///
/// Formats other than 8-bit L/LA/RGB/RGBA get an RGBA8 canvas.
pub fn new_canvas(like: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    match like {
        DynamicImage::ImageLuma8(_) => {
            DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([255])))
        }
        DynamicImage::ImageLumaA8(_) => {
            DynamicImage::ImageLumaA8(ImageBuffer::from_pixel(width, height, LumaA([255, 255])))
        }
        DynamicImage::ImageRgb8(_) => {
            DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([255, 255, 255])))
        }
        _ => DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            width,
            height,
            Rgba([255, 255, 255, 255]),
        )),
    }
}

/// Rotate `src` by `radians` about its centre and write the result into
/// `dst`, centred. Positive angles turn the content clockwise on screen.
///
/// `dst` keeps its size; uncovered pixels become white. If the formats
/// differ, `src` is converted to `dst`'s format first.
pub fn rotate_into(
    src: &DynamicImage,
    dst: &mut DynamicImage,
    radians: f32,
) -> Result<(), OrientError> {
    let projection = centred_rotation(
        (src.width() as f32, src.height() as f32),
        (dst.width() as f32, dst.height() as f32),
        radians,
    );
    let interp = Interpolation::Bilinear;

    match dst {
        DynamicImage::ImageLuma8(out) => {
            let src = src
                .as_luma8()
                .map(Cow::Borrowed)
                .unwrap_or_else(|| Cow::Owned(src.to_luma8()));
            warp_into(&*src, &projection, interp, Luma([255]), out);
        }
        DynamicImage::ImageLumaA8(out) => {
            let src = src
                .as_luma_alpha8()
                .map(Cow::Borrowed)
                .unwrap_or_else(|| Cow::Owned(src.to_luma_alpha8()));
            warp_into(&*src, &projection, interp, LumaA([255, 255]), out);
        }
        DynamicImage::ImageRgb8(out) => {
            let src = src
                .as_rgb8()
                .map(Cow::Borrowed)
                .unwrap_or_else(|| Cow::Owned(src.to_rgb8()));
            warp_into(&*src, &projection, interp, Rgb([255, 255, 255]), out);
        }
        DynamicImage::ImageRgba8(out) => {
            let src = src
                .as_rgba8()
                .map(Cow::Borrowed)
                .unwrap_or_else(|| Cow::Owned(src.to_rgba8()));
            warp_into(&*src, &projection, interp, Rgba([255, 255, 255, 255]), out);
        }
        other => {
            return Err(OrientError::InvalidConfig(format!(
                "unsupported rotation canvas format {:?}",
                other.color()
            )));
        }
    }
    Ok(())
}

/// Maps source pixel coordinates to destination coordinates: move the
/// source centre to the origin, rotate, move the origin to the destination
/// centre.
fn centred_rotation(src: (f32, f32), dst: (f32, f32), radians: f32) -> Projection {
    let (sw, sh) = src;
    let (dw, dh) = dst;
    Projection::translate(dw / 2.0, dh / 2.0)
        * Projection::rotate(radians)
        * Projection::translate(-sw / 2.0, -sh / 2.0)
}

/// Rotate clockwise by `quarters × 90°` without resampling.
pub fn quarter_turn(image: &DynamicImage, quarters: u8) -> DynamicImage {
    match quarters % 4 {
        1 => image.rotate90(),
        2 => image.rotate180(),
        3 => image.rotate270(),
        _ => image.clone(),
    }
}

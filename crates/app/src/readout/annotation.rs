use std::fmt;

use image::{Rgba, RgbaImage};
use stereo_ingest::PointSample;

/// Bottom-left corner of the distance text baseline.
pub(crate) const OVERLAY_ORIGIN: (i32, i32) = (50, 50);

pub(crate) const OVERLAY_STYLE: TextStyle = TextStyle {
    scale: 0.7,
    color: Rgba([124, 252, 0, 255]),
    thickness: 2,
};

const GLYPH_COLS: i32 = 5;
const GLYPH_ROWS: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_COLS + 1;

const DIAGNOSTIC_HEADLINE: &str = "Can't estimate distance at this position.";
const DIAGNOSTIC_HINT: &str =
    "Your camera is probably too close to the scene, please move it backwards.";

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct TextStyle {
    pub(crate) scale: f32,
    pub(crate) color: Rgba<u8>,
    pub(crate) thickness: u32,
}

impl TextStyle {
    /// Side of the square painted for one glyph bit, in pixels.
    fn cell(&self) -> i32 {
        ((self.scale * 3.0).round() as i32).max(1)
    }

    /// Extra pixels added before and after each painted cell.
    fn stroke_pad(&self) -> (i32, i32) {
        let extra = self.thickness.max(1) as i32 - 1;
        (extra / 2, extra - extra / 2)
    }
}

/// Inclusive pixel rectangle an overlay may touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TextBounds {
    pub(crate) left: i32,
    pub(crate) top: i32,
    pub(crate) right: i32,
    pub(crate) bottom: i32,
}

#[cfg(test)]
impl TextBounds {
    pub(crate) fn contains(&self, x: i32, y: i32) -> bool {
        (self.left..=self.right).contains(&x) && (self.top..=self.bottom).contains(&y)
    }
}

/// Printed whenever the center pixel has no usable depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Diagnostic;

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{DIAGNOSTIC_HEADLINE}")?;
        writeln!(f, "{DIAGNOSTIC_HINT}")?;
        writeln!(f)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum AnnotateOutcome {
    Annotated { distance: f64, text: String },
    DepthUnavailable(Diagnostic),
}

/// Euclidean norm of the sample's X, Y, Z. The color channel is ignored.
pub(crate) fn distance(sample: &PointSample) -> f64 {
    let x = f64::from(sample.x);
    let y = f64::from(sample.y);
    let z = f64::from(sample.z);
    (x * x + y * y + z * z).sqrt()
}

/// Decimal exponents outside `[-4, 16)` switch the reading to scientific form.
const MIN_FIXED_EXPONENT: i32 = -4;
const MAX_FIXED_EXPONENT: i32 = 16;

/// Shortest round-trip decimal.
///
/// Integral values keep one decimal place (`100.0`). Very small or very large
/// readings use a signed two-digit exponent (`1e-05`, `3.4028234663852886e+38`).
pub(crate) fn format_distance(distance: f64) -> String {
    let scientific = format!("{distance:e}");
    if let Some((mantissa, exponent)) = scientific.split_once('e')
        && let Ok(exponent) = exponent.parse::<i32>()
        && !(MIN_FIXED_EXPONENT..MAX_FIXED_EXPONENT).contains(&exponent)
    {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs());
    }
    if distance.fract() == 0.0 {
        format!("{distance:.1}")
    } else {
        format!("{distance}")
    }
}

/// Burn the center distance into `frame`, or report why it can't be measured.
///
/// The frame is untouched when any of X, Y, Z is NaN or infinite.
pub(crate) fn annotate(frame: &mut RgbaImage, sample: &PointSample) -> AnnotateOutcome {
    let distance = distance(sample);
    if !distance.is_finite() {
        return AnnotateOutcome::DepthUnavailable(Diagnostic);
    }
    let text = format_distance(distance);
    draw_text(frame, &text, OVERLAY_ORIGIN, &OVERLAY_STYLE);
    AnnotateOutcome::Annotated { distance, text }
}

/// Region `draw_text` may modify, or `None` for empty text.
pub(crate) fn text_bounds(text: &str, origin: (i32, i32), style: &TextStyle) -> Option<TextBounds> {
    let count = text.chars().count() as i32;
    if count == 0 {
        return None;
    }
    let cell = style.cell();
    let (pad_lo, pad_hi) = style.stroke_pad();
    let (x, y) = origin;
    Some(TextBounds {
        left: x - pad_lo,
        top: y - GLYPH_ROWS * cell + 1 - pad_lo,
        right: x + (count - 1) * GLYPH_ADVANCE * cell + GLYPH_COLS * cell - 1 + pad_hi,
        bottom: y + pad_hi,
    })
}

/// Draw `text` with its baseline's bottom-left corner at `origin`.
///
/// Pixels falling outside the image are clipped.
pub(crate) fn draw_text(image: &mut RgbaImage, text: &str, origin: (i32, i32), style: &TextStyle) {
    let cell = style.cell();
    let (pad_lo, pad_hi) = style.stroke_pad();
    let top = origin.1 - GLYPH_ROWS * cell + 1;
    let mut pen_x = origin.0;

    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_COLS {
                    if (pattern >> (GLYPH_COLS - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let x0 = pen_x + col * cell - pad_lo;
                    let y0 = top + row as i32 * cell - pad_lo;
                    fill_square(image, x0, y0, cell + pad_lo + pad_hi, style.color);
                }
            }
        }
        pen_x += GLYPH_ADVANCE * cell;
    }
}

fn fill_square(image: &mut RgbaImage, left: i32, top: i32, side: i32, color: Rgba<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for y in top.max(0)..(top + side).min(height) {
        for x in left.max(0)..(left + side).min(width) {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        '-' => Some([0, 0, 0, 0b11111, 0, 0, 0]),
        '+' => Some([0, 0b00100, 0b00100, 0b11111, 0b00100, 0b00100, 0]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}

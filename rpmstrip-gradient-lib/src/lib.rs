//! Color gradient logic for rpmstrip
//!
//! This library maps engine RPM onto a strip of LEDs: how many LEDs to light
//! and which color to light them with. It also provides the whole-buffer
//! operations used by the boot animation. It is hardware-agnostic and can be
//! tested without embedded hardware.

pub use rgb::RGB8;

/// Black, the color of an unlit LED.
pub const BLACK: RGB8 = RGB8::new(0, 0, 0);

/// Highest position a control point can have (percent of range).
pub const MAX_PERCENT: u8 = 100;

/// A fixed anchor in a percent-to-color gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPoint {
    pub color: RGB8,
    /// Position in percent of range, `0..=100`
    pub position: u8,
}

impl ControlPoint {
    #[must_use]
    pub const fn new(position: u8, r: u8, g: u8, b: u8) -> Self {
        Self {
            color: RGB8::new(r, g, b),
            position,
        }
    }
}

/// Built-in RPM color ramp: blue → cyan → green → yellow → orange → red.
pub const RPM_GRADIENT_POINTS: [ControlPoint; 6] = [
    ControlPoint::new(0, 0, 0, 255),
    ControlPoint::new(20, 0, 255, 255),
    ControlPoint::new(40, 0, 255, 0),
    ControlPoint::new(60, 255, 255, 0),
    ControlPoint::new(80, 255, 165, 0),
    ControlPoint::new(100, 255, 0, 0),
];

/// Gradient over [`RPM_GRADIENT_POINTS`].
pub const RPM_GRADIENT: Gradient<'static> = Gradient::new_unchecked(&RPM_GRADIENT_POINTS);

/// Reasons a control point table is rejected by [`Gradient::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum GradientError {
    #[display("gradient has no control points")]
    Empty,
    #[display("first control point must be at 0, found {position}")]
    FirstNotZero { position: u8 },
    #[display("last control point must be at 100, found {position}")]
    LastNotFull { position: u8 },
    #[display("control point {index} is at {position}, beyond 100")]
    OutOfRange { index: usize, position: u8 },
    #[display("control point {index} at {position} is not after the previous one")]
    NotAscending { index: usize, position: u8 },
}

/// A piecewise-linear color ramp over `0..=100` percent.
///
/// Interpolation is defined for any table, including ones that break the
/// ordering rules checked by [`Gradient::new`]: it never panics and never
/// divides by zero.
#[derive(Debug, Clone, Copy)]
pub struct Gradient<'a> {
    points: &'a [ControlPoint],
}

impl<'a> Gradient<'a> {
    /// Build a gradient, checking that positions are strictly ascending and
    /// span exactly `0..=100`.
    pub fn new(points: &'a [ControlPoint]) -> Result<Self, GradientError> {
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Err(GradientError::Empty);
        };
        if first.position != 0 {
            return Err(GradientError::FirstNotZero {
                position: first.position,
            });
        }
        for (index, point) in points.iter().enumerate() {
            if point.position > MAX_PERCENT {
                return Err(GradientError::OutOfRange {
                    index,
                    position: point.position,
                });
            }
            if index > 0 && point.position <= points[index - 1].position {
                return Err(GradientError::NotAscending {
                    index,
                    position: point.position,
                });
            }
        }
        if last.position != MAX_PERCENT {
            return Err(GradientError::LastNotFull {
                position: last.position,
            });
        }
        Ok(Self { points })
    }

    /// Wrap a table without checking it. Meant for `const` tables.
    #[must_use]
    pub const fn new_unchecked(points: &'a [ControlPoint]) -> Self {
        Self { points }
    }

    #[must_use]
    pub const fn points(&self) -> &'a [ControlPoint] {
        self.points
    }

    /// Color at `percent` of the range.
    ///
    /// `percent` above 100 is treated as 100. The first pair of adjacent
    /// control points whose range contains `percent` is interpolated channel
    /// by channel. A pair sharing one position yields the lower point's color.
    /// If no pair matches, the last control point's color is returned; an
    /// empty table yields [`BLACK`].
    #[must_use]
    pub fn color_at(&self, percent: u32) -> RGB8 {
        let percent = percent.min(u32::from(MAX_PERCENT));

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            let (lo_pos, hi_pos) = (u32::from(lo.position), u32::from(hi.position));
            if percent < lo_pos || percent > hi_pos {
                continue;
            }
            // hi_pos >= percent >= lo_pos, so these never underflow
            let range = hi_pos - lo_pos;
            if range == 0 {
                return lo.color;
            }
            let offset = percent - lo_pos;
            return RGB8::new(
                interpolate_channel(lo.color.r, hi.color.r, offset, range),
                interpolate_channel(lo.color.g, hi.color.g, offset, range),
                interpolate_channel(lo.color.b, hi.color.b, offset, range),
            );
        }

        self.points.last().map_or(BLACK, |p| p.color)
    }
}

/// `from + (to - from) * offset / range` in 32-bit signed arithmetic,
/// truncating toward zero.
///
/// Callers guarantee `offset <= range <= 100` and `range > 0`.
#[inline]
fn interpolate_channel(from: u8, to: u8, offset: u32, range: u32) -> u8 {
    debug_assert!(range > 0 && offset <= range);
    let delta = i32::from(to) - i32::from(from);
    // offset and range are at most 100, so the casts are lossless
    #[allow(clippy::cast_possible_wrap)]
    let step = delta * offset as i32 / range as i32;
    // With offset <= range the result lies between `from` and `to`
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let value = (i32::from(from) + step) as u8;
    value
}

/// Color of the built-in RPM gradient at `percent`.
#[must_use]
pub fn color_for_percent(percent: u32) -> RGB8 {
    RPM_GRADIENT.color_at(percent)
}

/// Overwrite every LED with `color`.
pub fn set_all(buffer: &mut [RGB8], color: RGB8) {
    buffer.fill(color);
}

/// Spread a two-color gradient across the whole buffer.
///
/// `buffer[0]` gets `start`, the last LED gets `end`. A single LED gets
/// `start`.
#[allow(clippy::cast_precision_loss)]
pub fn linear_gradient_fill(buffer: &mut [RGB8], start: RGB8, end: RGB8) {
    let n = buffer.len();
    if n == 1 {
        buffer[0] = start;
        return;
    }
    for (i, led) in buffer.iter_mut().enumerate() {
        // These are LED indices, so the f32 conversion is exact
        let t = i as f32 / (n - 1) as f32;
        *led = lerp_rgb(start, end, t);
    }
}

/// Fade every LED from its current color to `target` over `steps` frames.
///
/// Frame `k` of `steps` is `k / (steps - 1)` of the way there, so the first
/// frame repeats the current contents and the last one is exactly `target`.
/// `on_frame` is called after each frame is computed and is expected to
/// transmit it and wait. With `steps <= 1` the buffer jumps to `target` and a
/// single frame is emitted.
///
/// The first error returned by `on_frame` stops the fade.
#[allow(clippy::cast_precision_loss)]
pub fn fade_buffer<const N: usize, E>(
    buffer: &mut [RGB8; N],
    target: RGB8,
    steps: u32,
    mut on_frame: impl FnMut(&[RGB8; N]) -> Result<(), E>,
) -> Result<(), E> {
    if steps <= 1 {
        set_all(buffer, target);
        return on_frame(buffer);
    }

    let start = *buffer;
    let last_step = (steps - 1) as f32;
    for step in 0..steps {
        let t = step as f32 / last_step;
        for (led, &from) in buffer.iter_mut().zip(start.iter()) {
            *led = lerp_rgb(from, target, t);
        }
        on_frame(buffer)?;
    }
    Ok(())
}

#[inline]
fn lerp_rgb(a: RGB8, b: RGB8, t: f32) -> RGB8 {
    RGB8::new(lerp_u8(a.r, b.r, t), lerp_u8(a.g, b.g, t), lerp_u8(a.b, b.b, t))
}

/// Linear interpolation between two `u8` color channel values.
///
/// Computes `a + (b - a) * t` in floating point, then rounds back to `u8`.
///
/// # Panics
/// Debug-asserts that `t` is in `[0.0, 1.0]`.
#[inline]
fn lerp_u8(a: u8, b: u8, t: f32) -> u8 {
    debug_assert!(
        (0.0..=1.0).contains(&t),
        "lerp_u8: t={t} outside [0.0, 1.0]"
    );
    let a_f = f32::from(a);
    let b_f = f32::from(b);
    // With a,b in [0,255] and t in [0.0,1.0], the result is in [0.0, 255.0],
    // so the cast to u8 cannot truncate or produce a negative value.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let result = (a_f + (b_f - a_f) * t).round() as u8;
    result
}

/// What [`fill_strip_by_rpm`] rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripFill {
    /// Position on the gradient, `0..=100`
    pub percent: u32,
    /// Number of LEDs lit from the start of the strip
    pub leds_on: usize,
    /// Color of the lit LEDs
    pub color: RGB8,
}

/// Light a bar proportional to `rpm / rpm_max` from the start of the strip.
///
/// The bar's color is [`color_for_percent`] of the same fraction and the rest
/// of the strip is black. Both the percentage and the LED count are clamped,
/// so RPM above `rpm_max` shows a full red strip. With `rpm_max == 0` any
/// non-zero RPM saturates and zero RPM leaves the strip dark.
pub fn fill_strip_by_rpm(buffer: &mut [RGB8], rpm: u32, rpm_max: u32) -> StripFill {
    let num_leds = buffer.len();
    let (percent, leds_on) = scale_rpm(rpm, rpm_max, num_leds);
    let color = color_for_percent(percent);

    let (lit, dark) = buffer.split_at_mut(leds_on);
    set_all(lit, color);
    set_all(dark, BLACK);

    StripFill {
        percent,
        leds_on,
        color,
    }
}

/// Percentage of range and LED count for `rpm`, both clamped.
fn scale_rpm(rpm: u32, rpm_max: u32, num_leds: usize) -> (u32, usize) {
    if rpm_max == 0 {
        return if rpm == 0 {
            (0, 0)
        } else {
            (u32::from(MAX_PERCENT), num_leds)
        };
    }
    let rpm = u64::from(rpm);
    let rpm_max = u64::from(rpm_max);
    let percent = (rpm * u64::from(MAX_PERCENT) / rpm_max).min(u64::from(MAX_PERCENT));
    let leds_on = (rpm * num_leds as u64 / rpm_max).min(num_leds as u64);
    // Both values are clamped to targets that fit their types
    #[allow(clippy::cast_possible_truncation)]
    let scaled = (percent as u32, leds_on as usize);
    scaled
}

//! Software-timed WS2812 encoder
//!
//! Serializes a buffer of colors into the single-wire WS2812 bitstream: for
//! every pixel the green, red and blue bytes, most significant bit first,
//! each bit a high pulse followed by a low pulse, and a low latch period
//! after the frame.
//!
//! The pin and the busy-wait live behind the [`DataLine`] trait, so the
//! encoder can run against real hardware or a recording fake in tests.

use std::convert::Infallible;

pub use smart_leds::RGB8;
use smart_leds::SmartLedsWrite;

/// Output capability the encoder drives.
pub trait DataLine {
    /// Drive the data line high or low.
    fn set_line(&mut self, high: bool);

    /// Busy-wait for `ns` nanoseconds.
    fn wait_ns(&mut self, ns: u32);

    /// Run one full frame transmission.
    ///
    /// Implementations on real hardware must keep anything from preempting
    /// `f` (for example by masking interrupts), since a delayed edge corrupts
    /// every following pixel.
    fn frame<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R
    where
        Self: Sized,
    {
        f(self)
    }
}

/// Pulse widths of the protocol, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    pub one_high_ns: u32,
    pub one_low_ns: u32,
    pub zero_high_ns: u32,
    pub zero_low_ns: u32,
    /// Minimum low time after a frame before the strip displays it
    pub latch_ns: u32,
}

impl BitTiming {
    /// WS2812/WS2812B: 0.8/0.45 µs for a one, 0.4/0.85 µs for a zero.
    pub const WS2812: Self = Self {
        one_high_ns: 800,
        one_low_ns: 450,
        zero_high_ns: 400,
        zero_low_ns: 850,
        latch_ns: 300_000,
    };

    /// `(high_ns, low_ns)` for a bit value.
    #[must_use]
    pub const fn pulse(&self, bit: bool) -> (u32, u32) {
        if bit {
            (self.one_high_ns, self.one_low_ns)
        } else {
            (self.zero_high_ns, self.zero_low_ns)
        }
    }
}

impl Default for BitTiming {
    fn default() -> Self {
        Self::WS2812
    }
}

/// Calibration for busy-wait delays built from a counted spin loop.
///
/// `cycles_per_us` is the CPU clock in MHz, `cycles_per_spin` the measured
/// cost of one spin-loop iteration and `overhead_ns` the fixed cost of a
/// wait call plus the pin write that precedes it. Retargeting to a different
/// clock only means changing these values; they should be checked with a
/// scope on the data pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinCalibration {
    pub cycles_per_us: u32,
    pub cycles_per_spin: u32,
    pub overhead_ns: u32,
}

impl SpinCalibration {
    /// Precompute the nanosecond-to-spin conversion.
    #[must_use]
    pub const fn delay(&self) -> SpinDelay {
        let cycles_per_spin = if self.cycles_per_spin == 0 {
            1
        } else {
            self.cycles_per_spin
        };
        // spins per ns in Q32, rounded up so exact ratios don't lose a spin
        let divisor = 1000 * cycles_per_spin as u64;
        let factor = ((self.cycles_per_us as u64) << 32).div_ceil(divisor);
        SpinDelay {
            spins_per_ns_q32: factor,
            overhead_ns: self.overhead_ns,
        }
    }
}

/// Precomputed spin counts for a [`SpinCalibration`].
///
/// Conversion is one multiply and one shift, cheap enough to run between
/// pulse edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinDelay {
    spins_per_ns_q32: u64,
    overhead_ns: u32,
}

impl SpinDelay {
    /// Number of spin iterations that make up `ns`.
    #[inline]
    #[must_use]
    pub const fn spins(&self, ns: u32) -> u32 {
        let ns = ns.saturating_sub(self.overhead_ns) as u64;
        let spins = match ns.checked_mul(self.spins_per_ns_q32) {
            Some(scaled) => scaled >> 32,
            None => u32::MAX as u64,
        };
        if spins > u32::MAX as u64 {
            u32::MAX
        } else {
            // Checked against u32::MAX above
            #[allow(clippy::cast_possible_truncation)]
            let spins = spins as u32;
            spins
        }
    }
}

/// Encoder and transmitter for a WS2812 strip on a [`DataLine`].
#[derive(Debug)]
pub struct Ws2812Writer<L> {
    line: L,
    timing: BitTiming,
}

impl<L: DataLine> Ws2812Writer<L> {
    pub fn new(line: L, timing: BitTiming) -> Self {
        Self { line, timing }
    }

    pub fn timing(&self) -> BitTiming {
        self.timing
    }

    pub fn line(&self) -> &L {
        &self.line
    }

    /// Give back the data line.
    pub fn into_inner(self) -> L {
        self.line
    }

    pub fn send_bit(&mut self, bit: bool) {
        emit_bit(&mut self.line, &self.timing, bit);
    }

    /// Emit `byte` most significant bit first.
    pub fn send_byte(&mut self, byte: u8) {
        emit_byte(&mut self.line, &self.timing, byte);
    }

    /// Emit one pixel in wire order (green, red, blue).
    pub fn send_pixel(&mut self, color: RGB8) {
        emit_pixel(&mut self.line, &self.timing, color);
    }

    /// Hold the line low long enough for the strip to latch the frame.
    pub fn latch(&mut self) {
        emit_latch(&mut self.line, &self.timing);
    }

    /// Transmit a whole frame followed by the latch.
    pub fn send_strip(&mut self, pixels: &[RGB8]) {
        let timing = self.timing;
        self.line.frame(|line| {
            for &pixel in pixels {
                emit_pixel(line, &timing, pixel);
            }
            emit_latch(line, &timing);
        });
    }
}

impl<L: DataLine> SmartLedsWrite for Ws2812Writer<L> {
    type Error = Infallible;
    type Color = RGB8;

    /// Transmit a frame from any color iterator.
    ///
    /// The iterator runs inside the frame between pixels, so it should be a
    /// cheap adapter (such as `smart_leds::brightness`) over a ready buffer.
    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        let timing = self.timing;
        self.line.frame(|line| {
            for pixel in iterator {
                emit_pixel(line, &timing, pixel.into());
            }
            emit_latch(line, &timing);
        });
        Ok(())
    }
}

#[inline(always)]
fn emit_bit<L: DataLine>(line: &mut L, timing: &BitTiming, bit: bool) {
    let (high_ns, low_ns) = timing.pulse(bit);
    line.set_line(true);
    line.wait_ns(high_ns);
    line.set_line(false);
    line.wait_ns(low_ns);
}

#[inline(always)]
fn emit_byte<L: DataLine>(line: &mut L, timing: &BitTiming, byte: u8) {
    for shift in (0..8).rev() {
        emit_bit(line, timing, (byte >> shift) & 1 == 1);
    }
}

#[inline]
fn emit_pixel<L: DataLine>(line: &mut L, timing: &BitTiming, color: RGB8) {
    emit_byte(line, timing, color.g);
    emit_byte(line, timing, color.r);
    emit_byte(line, timing, color.b);
}

fn emit_latch<L: DataLine>(line: &mut L, timing: &BitTiming) {
    line.set_line(false);
    line.wait_ns(timing.latch_ns);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Level(bool),
        Wait(u32),
        FrameStart,
        FrameEnd,
    }

    #[derive(Default)]
    struct RecordingLine {
        events: Vec<Event>,
    }

    impl DataLine for RecordingLine {
        fn set_line(&mut self, high: bool) {
            self.events.push(Event::Level(high));
        }

        fn wait_ns(&mut self, ns: u32) {
            self.events.push(Event::Wait(ns));
        }

        fn frame<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
            self.events.push(Event::FrameStart);
            let result = f(self);
            self.events.push(Event::FrameEnd);
            result
        }
    }

    /// Decode recorded events into `(high_ns, low_ns)` pulses.
    ///
    /// Only complete high-wait-low-wait sequences count as pulses; the latch
    /// (a bare low-wait) and frame markers are skipped.
    fn pulses(events: &[Event]) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < events.len() {
            if let [Event::Level(true), Event::Wait(high), Event::Level(false), Event::Wait(low), ..] =
                &events[i..]
            {
                out.push((*high, *low));
                i += 4;
            } else {
                i += 1;
            }
        }
        out
    }

    fn decode_bits(pulses: &[(u32, u32)], timing: &BitTiming) -> Vec<bool> {
        pulses
            .iter()
            .map(|&pulse| {
                if pulse == timing.pulse(true) {
                    true
                } else {
                    assert_eq!(pulse, timing.pulse(false), "unexpected pulse {pulse:?}");
                    false
                }
            })
            .collect()
    }

    fn decode_bytes(bits: &[bool]) -> Vec<u8> {
        bits.chunks(8)
            .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | u8::from(b)))
            .collect()
    }

    fn writer() -> Ws2812Writer<RecordingLine> {
        Ws2812Writer::new(RecordingLine::default(), BitTiming::WS2812)
    }

    #[test]
    fn test_byte_msb_first_with_pulse_widths() {
        let mut writer = writer();
        writer.send_byte(0b1011_0000);
        let line = writer.into_inner();

        let one = (800, 450);
        let zero = (400, 850);
        assert_eq!(
            pulses(&line.events),
            vec![one, zero, one, one, zero, zero, zero, zero]
        );
        // Every bit is exactly high, wait, low, wait
        assert_eq!(line.events.len(), 32);
        assert_eq!(
            line.events[..4],
            [
                Event::Level(true),
                Event::Wait(800),
                Event::Level(false),
                Event::Wait(450)
            ]
        );
    }

    #[test]
    fn test_bit_periods_match() {
        let t = BitTiming::WS2812;
        assert_eq!(t.one_high_ns + t.one_low_ns, t.zero_high_ns + t.zero_low_ns);
        assert!(t.one_high_ns > t.one_low_ns);
        assert!(t.zero_high_ns < t.zero_low_ns);
    }

    #[test]
    fn test_pixel_wire_order_is_grb() {
        let mut writer = writer();
        writer.send_pixel(RGB8::new(0x11, 0x22, 0x33));
        let line = writer.into_inner();

        let bits = decode_bits(&pulses(&line.events), &BitTiming::WS2812);
        assert_eq!(decode_bytes(&bits), vec![0x22, 0x11, 0x33]);
    }

    #[test]
    fn test_strip_is_one_frame_ending_in_latch() {
        let mut writer = writer();
        let pixels = [RGB8::new(255, 0, 0), RGB8::new(0, 0, 0), RGB8::new(1, 2, 3)];
        writer.send_strip(&pixels);
        let line = writer.into_inner();

        assert_eq!(line.events.first(), Some(&Event::FrameStart));
        assert_eq!(line.events.last(), Some(&Event::FrameEnd));
        assert_eq!(
            line.events.iter().filter(|&&e| e == Event::FrameStart).count(),
            1
        );
        let n = line.events.len();
        assert_eq!(
            line.events[n - 3..n - 1],
            [Event::Level(false), Event::Wait(300_000)]
        );

        let bits = decode_bits(&pulses(&line.events), &BitTiming::WS2812);
        assert_eq!(bits.len(), pixels.len() * 24);
        assert_eq!(
            decode_bytes(&bits),
            vec![0, 255, 0, 0, 0, 0, 2, 1, 3]
        );
    }

    #[test]
    fn test_empty_strip_still_latches() {
        let mut writer = writer();
        writer.send_strip(&[]);
        let line = writer.into_inner();
        assert_eq!(
            line.events,
            vec![
                Event::FrameStart,
                Event::Level(false),
                Event::Wait(300_000),
                Event::FrameEnd
            ]
        );
    }

    #[test]
    fn test_smart_leds_write_matches_send_strip() {
        let pixels = [RGB8::new(10, 20, 30), RGB8::new(40, 50, 60)];

        let mut direct = writer();
        direct.send_strip(&pixels);

        let mut via_trait = writer();
        assert!(via_trait.write(pixels.iter().copied()).is_ok());

        assert_eq!(direct.into_inner().events, via_trait.into_inner().events);
    }

    #[test]
    fn test_spin_delay_conversion() {
        // 240 MHz, 4 cycles per spin: 60 spins per µs
        let delay = SpinCalibration {
            cycles_per_us: 240,
            cycles_per_spin: 4,
            overhead_ns: 0,
        }
        .delay();
        assert_eq!(delay.spins(1000), 60);
        assert_eq!(delay.spins(300_000), 18_000);
        assert_eq!(delay.spins(0), 0);
    }

    #[test]
    fn test_spin_delay_overhead_and_clock_retarget() {
        let fast = SpinCalibration {
            cycles_per_us: 160,
            cycles_per_spin: 1,
            overhead_ns: 100,
        }
        .delay();
        let slow = SpinCalibration {
            cycles_per_us: 80,
            cycles_per_spin: 1,
            overhead_ns: 100,
        }
        .delay();
        // (800 - 100) ns at 160 and 80 cycles per µs
        assert_eq!(fast.spins(800), 112);
        assert_eq!(slow.spins(800), 56);
        // Waits shorter than the overhead collapse to zero
        assert_eq!(fast.spins(50), 0);
    }

    #[test]
    fn test_zero_cycles_per_spin_does_not_divide_by_zero() {
        let delay = SpinCalibration {
            cycles_per_us: 100,
            cycles_per_spin: 0,
            overhead_ns: 0,
        }
        .delay();
        assert_eq!(delay.spins(1000), 100);
    }
}

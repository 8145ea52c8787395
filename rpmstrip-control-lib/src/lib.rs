//! Control loop for rpmstrip
//!
//! One iteration reads an RPM value, renders it into the LED buffer,
//! transmits the buffer and advances the heartbeat. The caller owns the
//! pacing (the sleep between iterations) so the loop can be driven from the
//! firmware, the bench tool or a test.

use log::{debug, trace};
use rpmstrip_gradient_lib::{fill_strip_by_rpm, StripFill, BLACK, RGB8};
use smart_leds::SmartLedsWrite;

/// Number of LEDs on the strip.
pub const STRIP_LEN: usize = 150;

/// RPM that lights the whole strip in red.
pub const RPM_MAX: u32 = 12_000;

/// Where the control loop gets its RPM from.
pub trait RpmSource {
    fn next_rpm(&mut self) -> u32;
}

impl<S: RpmSource + ?Sized> RpmSource for Box<S> {
    fn next_rpm(&mut self) -> u32 {
        (**self).next_rpm()
    }
}

/// Always reports the same RPM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRpm(pub u32);

impl RpmSource for FixedRpm {
    fn next_rpm(&mut self) -> u32 {
        self.0
    }
}

/// Phase of the [`SimulatedRpm`] trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPhase {
    /// Engine idling around 1350-1430 RPM
    Idle,
    /// Smooth initial acceleration up to 5000 RPM
    RampUp,
    /// Acceleration with small fluctuations up to 10500 RPM
    Climb,
    /// Bouncing off the rev limiter
    Limiter,
    /// Engine braking back down toward idle
    Decel,
}

/// Deterministic bench-test RPM trace.
///
/// Cycles through idle, ramp-up, a fluctuating climb, the rev limiter and
/// deceleration, then starts over at idle. Each [`advance`](Self::advance)
/// moves the trace one step; the step that changes phase keeps the RPM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedRpm {
    phase: SimPhase,
    counter: u32,
    rpm: u32,
}

impl SimulatedRpm {
    const START_RPM: u32 = 1400;
    const IDLE_STEPS: u32 = 40;
    const RAMP_UP_UNTIL: u32 = 5000;
    const CLIMB_UNTIL: u32 = 10_500;
    const LIMITER_STEPS: u32 = 12;
    const LIMITER_CEILING: u32 = 12_000;
    const DECEL_UNTIL: u32 = 1700;

    pub fn new() -> Self {
        Self {
            phase: SimPhase::Idle,
            counter: 0,
            rpm: Self::START_RPM,
        }
    }

    /// Restart the trace from idle.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn phase(&self) -> SimPhase {
        self.phase
    }

    pub fn rpm(&self) -> u32 {
        self.rpm
    }

    /// Move one step along the trace and return the new RPM.
    pub fn advance(&mut self) -> u32 {
        let c = self.counter;
        match self.phase {
            SimPhase::Idle => {
                self.rpm = 1350 + (c % 5) * 20;
                self.counter += 1;
                if self.counter > Self::IDLE_STEPS {
                    self.enter(SimPhase::RampUp);
                }
            }
            SimPhase::RampUp => {
                if self.rpm < Self::RAMP_UP_UNTIL {
                    self.rpm += 120 + (c % 3) * 10;
                    self.counter += 1;
                } else {
                    self.enter(SimPhase::Climb);
                }
            }
            SimPhase::Climb => {
                if self.rpm < Self::CLIMB_UNTIL {
                    // 120..=210 RPM per step
                    self.rpm += 120 + (c % 4) * 30;
                    self.counter += 1;
                } else {
                    self.enter(SimPhase::Limiter);
                }
            }
            SimPhase::Limiter => {
                if c < Self::LIMITER_STEPS {
                    self.rpm = if c % 2 == 1 {
                        self.rpm.saturating_sub(300)
                    } else {
                        (self.rpm + 250).min(Self::LIMITER_CEILING)
                    };
                    self.counter += 1;
                } else {
                    self.enter(SimPhase::Decel);
                }
            }
            SimPhase::Decel => {
                if self.rpm > Self::DECEL_UNTIL {
                    self.rpm = self.rpm.saturating_sub(250 + (c % 3) * 20);
                    self.counter += 1;
                } else {
                    self.enter(SimPhase::Idle);
                }
            }
        }
        self.rpm
    }

    fn enter(&mut self, phase: SimPhase) {
        debug!("Simulated RPM: {:?} -> {phase:?} at {} RPM", self.phase, self.rpm);
        self.phase = phase;
        self.counter = 0;
    }
}

impl Default for SimulatedRpm {
    fn default() -> Self {
        Self::new()
    }
}

impl RpmSource for SimulatedRpm {
    fn next_rpm(&mut self) -> u32 {
        self.advance()
    }
}

/// On/off output such as the heartbeat LED.
pub trait Indicator {
    fn set(&mut self, on: bool);
}

/// Toggles an indicator once every `period` loop iterations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    period: u32,
    count: u32,
    on: bool,
}

impl Heartbeat {
    /// A `period` of zero never toggles.
    pub fn new(period: u32) -> Self {
        Self {
            period,
            count: 0,
            on: false,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Count one iteration. Returns the new state when it toggles.
    pub fn tick(&mut self) -> Option<bool> {
        if self.period == 0 {
            return None;
        }
        self.count += 1;
        if self.count < self.period {
            return None;
        }
        self.count = 0;
        self.on = !self.on;
        Some(self.on)
    }
}

/// What one [`ControlLoop::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub rpm: u32,
    pub fill: StripFill,
    /// New heartbeat state if it toggled on this step
    pub heartbeat: Option<bool>,
}

/// Owns the LED buffer and the collaborators of one control loop.
pub struct ControlLoop<const N: usize, S, W, H> {
    buffer: [RGB8; N],
    rpm_max: u32,
    source: S,
    writer: W,
    heartbeat: Heartbeat,
    indicator: H,
}

impl<const N: usize, S, W, H> ControlLoop<N, S, W, H>
where
    S: RpmSource,
    W: SmartLedsWrite<Color = RGB8>,
    H: Indicator,
{
    /// The buffer starts dark and the indicator is switched off.
    pub fn new(source: S, writer: W, mut indicator: H, rpm_max: u32, heartbeat_period: u32) -> Self {
        indicator.set(false);
        Self {
            buffer: [BLACK; N],
            rpm_max,
            source,
            writer,
            heartbeat: Heartbeat::new(heartbeat_period),
            indicator,
        }
    }

    /// Read the RPM, render and transmit it, then advance the heartbeat.
    ///
    /// The heartbeat advances even if the transmission failed.
    pub fn step(&mut self) -> Result<StepReport, W::Error> {
        let rpm = self.source.next_rpm();
        let fill = fill_strip_by_rpm(&mut self.buffer, rpm, self.rpm_max);
        trace!(
            "RPM {rpm}: {}% {} LEDs ({},{},{})",
            fill.percent,
            fill.leds_on,
            fill.color.r,
            fill.color.g,
            fill.color.b
        );

        let written = self.writer.write(self.buffer.iter().copied());

        let heartbeat = self.heartbeat.tick();
        if let Some(on) = heartbeat {
            self.indicator.set(on);
        }

        written.map(|()| StepReport {
            rpm,
            fill,
            heartbeat,
        })
    }

    /// The most recently rendered frame.
    pub fn buffer(&self) -> &[RGB8; N] {
        &self.buffer
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Borrow the buffer and writer together, for animations that render
    /// their own frames.
    pub fn buffer_and_writer(&mut self) -> (&mut [RGB8; N], &mut W) {
        (&mut self.buffer, &mut self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpmstrip_gradient_lib::color_for_percent;
    use rpmstrip_ws2812_lib::{BitTiming, DataLine, Ws2812Writer};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct CapturingWriter {
        frames: Vec<Vec<RGB8>>,
        fail: bool,
    }

    impl SmartLedsWrite for CapturingWriter {
        type Error = &'static str;
        type Color = RGB8;

        fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
        where
            T: IntoIterator<Item = I>,
            I: Into<Self::Color>,
        {
            if self.fail {
                return Err("write failed");
            }
            self.frames.push(iterator.into_iter().map(Into::into).collect());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedIndicator(Rc<RefCell<Vec<bool>>>);

    impl Indicator for SharedIndicator {
        fn set(&mut self, on: bool) {
            self.0.borrow_mut().push(on);
        }
    }

    #[derive(Default)]
    struct CountingLine {
        rising_edges: usize,
        frames: usize,
    }

    impl DataLine for CountingLine {
        fn set_line(&mut self, high: bool) {
            if high {
                self.rising_edges += 1;
            }
        }

        fn wait_ns(&mut self, _ns: u32) {}

        fn frame<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
            self.frames += 1;
            f(self)
        }
    }

    #[test]
    fn test_simulator_starts_idling() {
        let mut sim = SimulatedRpm::new();
        assert_eq!(sim.rpm(), 1400);
        let first: Vec<u32> = (0..6).map(|_| sim.advance()).collect();
        assert_eq!(first, vec![1350, 1370, 1390, 1410, 1430, 1350]);
        assert_eq!(sim.phase(), SimPhase::Idle);
    }

    #[test]
    fn test_simulator_leaves_idle_after_41_steps() {
        let mut sim = SimulatedRpm::new();
        for _ in 0..40 {
            sim.advance();
            assert_eq!(sim.phase(), SimPhase::Idle);
        }
        sim.advance();
        assert_eq!(sim.phase(), SimPhase::RampUp);
    }

    #[test]
    fn test_simulator_full_cycle() {
        let mut sim = SimulatedRpm::new();
        let mut seen = vec![sim.phase()];
        let mut peak = 0;
        let mut steps = 0;
        // Run until the trace wraps back to idle
        loop {
            let rpm = sim.advance();
            peak = peak.max(rpm);
            steps += 1;
            if seen.last() != Some(&sim.phase()) {
                seen.push(sim.phase());
            }
            if seen.len() > 1 && sim.phase() == SimPhase::Idle {
                break;
            }
            assert!(steps < 1000, "trace never wrapped");
        }
        assert_eq!(
            seen,
            vec![
                SimPhase::Idle,
                SimPhase::RampUp,
                SimPhase::Climb,
                SimPhase::Limiter,
                SimPhase::Decel,
                SimPhase::Idle
            ]
        );
        assert!(peak >= 10_500);
        assert!(peak <= 12_000);
        assert!(sim.rpm() <= 1700);
    }

    #[test]
    fn test_simulator_phase_change_keeps_rpm() {
        let mut sim = SimulatedRpm::new();
        while sim.phase() != SimPhase::Climb {
            sim.advance();
        }
        let before = sim.rpm();
        assert!(before >= 5000);
        // First climb step adds 120 (counter 0)
        assert_eq!(sim.advance(), before + 120);
    }

    #[test]
    fn test_simulator_limiter_oscillates() {
        let mut sim = SimulatedRpm::new();
        while sim.phase() != SimPhase::Limiter {
            sim.advance();
        }
        let start = sim.rpm();
        let trace: Vec<u32> = (0..4).map(|_| sim.advance()).collect();
        assert_eq!(
            trace,
            vec![
                (start + 250).min(12_000),
                (start + 250).min(12_000) - 300,
                ((start + 250).min(12_000) - 300 + 250).min(12_000),
                ((start + 250).min(12_000) - 300 + 250).min(12_000) - 300,
            ]
        );
    }

    #[test]
    fn test_simulator_reset() {
        let mut sim = SimulatedRpm::new();
        for _ in 0..100 {
            sim.advance();
        }
        sim.reset();
        assert_eq!(sim, SimulatedRpm::new());
    }

    #[test]
    fn test_heartbeat_period() {
        let mut hb = Heartbeat::new(3);
        let ticks: Vec<Option<bool>> = (0..7).map(|_| hb.tick()).collect();
        assert_eq!(
            ticks,
            vec![None, None, Some(true), None, None, Some(false), None]
        );
    }

    #[test]
    fn test_heartbeat_zero_period_never_toggles() {
        let mut hb = Heartbeat::new(0);
        assert!((0..10).all(|_| hb.tick().is_none()));
        assert!(!hb.is_on());
    }

    #[test]
    fn test_step_renders_and_transmits_same_buffer() {
        let indicator = SharedIndicator::default();
        let mut control: ControlLoop<STRIP_LEN, _, _, _> = ControlLoop::new(
            FixedRpm(6000),
            CapturingWriter::default(),
            indicator.clone(),
            RPM_MAX,
            100,
        );

        let report = control.step().unwrap();
        assert_eq!(report.rpm, 6000);
        assert_eq!(report.fill.leds_on, 75);
        assert_eq!(report.fill.color, color_for_percent(50));
        assert_eq!(report.heartbeat, None);

        let (buffer, writer) = control.buffer_and_writer();
        assert_eq!(writer.frames.len(), 1);
        assert_eq!(writer.frames[0], buffer.to_vec());
        // Only the initial switch-off so far
        assert_eq!(*indicator.0.borrow(), vec![false]);
    }

    #[test]
    fn test_step_toggles_heartbeat() {
        let indicator = SharedIndicator::default();
        let mut control: ControlLoop<4, _, _, _> = ControlLoop::new(
            FixedRpm(0),
            CapturingWriter::default(),
            indicator.clone(),
            RPM_MAX,
            2,
        );
        let toggles: Vec<Option<bool>> = (0..4).map(|_| control.step().unwrap().heartbeat).collect();
        assert_eq!(toggles, vec![None, Some(true), None, Some(false)]);
        assert_eq!(*indicator.0.borrow(), vec![false, true, false]);
    }

    #[test]
    fn test_step_error_still_beats() {
        let indicator = SharedIndicator::default();
        let writer = CapturingWriter {
            fail: true,
            ..Default::default()
        };
        let mut control: ControlLoop<4, _, _, _> =
            ControlLoop::new(FixedRpm(3000), writer, indicator.clone(), RPM_MAX, 1);
        assert_eq!(control.step(), Err("write failed"));
        assert_eq!(*indicator.0.borrow(), vec![false, true]);
        // The buffer was still rendered
        assert_eq!(control.buffer()[0], color_for_percent(25));
    }

    #[test]
    fn test_simulated_source_drives_ws2812_frames() {
        let writer = Ws2812Writer::new(CountingLine::default(), BitTiming::WS2812);
        let mut control: ControlLoop<STRIP_LEN, _, _, _> = ControlLoop::new(
            SimulatedRpm::new(),
            writer,
            SharedIndicator::default(),
            RPM_MAX,
            100,
        );
        for _ in 0..50 {
            let report = control.step().unwrap();
            assert!(report.fill.leds_on <= STRIP_LEN);
            assert_eq!(
                control.buffer().iter().filter(|&&led| led != BLACK).count(),
                report.fill.leds_on
            );
        }
        assert_eq!(control.source_mut().phase(), SimPhase::RampUp);
        let (_, writer) = control.buffer_and_writer();
        let line = writer.line();
        assert_eq!(line.frames, 50);
        // Every bit starts with exactly one rising edge
        assert_eq!(line.rising_edges, 50 * STRIP_LEN * 24);
    }
}

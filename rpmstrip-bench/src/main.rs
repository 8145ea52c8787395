//! Bench run of the rpmstrip control loop without hardware
//!
//! Usage: cargo run -p rpmstrip-bench -- --frames 200
//! Drives the real control loop and WS2812 encoder against a virtual data
//! line and draws every frame in a truecolor terminal.

use clap::Parser;
use log::info;
use rpmstrip_control_lib::{
    ControlLoop, FixedRpm, Indicator, RpmSource, SimulatedRpm, RPM_MAX, STRIP_LEN,
};
use rpmstrip_gradient_lib::RGB8;
use rpmstrip_ws2812_lib::{BitTiming, DataLine, Ws2812Writer};
use std::fmt::Write;

/// Run the RPM strip control loop on the host.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Number of loop iterations to run.
    #[arg(short = 'n', long, default_value_t = 200)]
    frames: u32,

    /// Show a constant RPM instead of the simulated trace.
    #[arg(short, long)]
    rpm: Option<u32>,

    /// RPM that lights the whole strip.
    #[arg(long, default_value_t = RPM_MAX)]
    rpm_max: u32,

    /// Terminal cells used to draw the strip.
    #[arg(short, long, default_value_t = 75)]
    width: usize,

    /// Loop iterations between heartbeat toggles.
    #[arg(long, default_value_t = 100)]
    heartbeat_period: u32,

    /// Only print the timing summary.
    #[arg(short, long)]
    quiet: bool,
}

/// Data line that keeps time instead of driving a pin.
#[derive(Default)]
struct VirtualLine {
    busy_ns: u64,
    frames: u64,
    bits: u64,
}

impl DataLine for VirtualLine {
    fn set_line(&mut self, high: bool) {
        if high {
            self.bits += 1;
        }
    }

    fn wait_ns(&mut self, ns: u32) {
        self.busy_ns += u64::from(ns);
    }

    fn frame<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.frames += 1;
        f(self)
    }
}

struct ConsoleHeartbeat;

impl Indicator for ConsoleHeartbeat {
    fn set(&mut self, on: bool) {
        info!("Heartbeat {}", if on { "on" } else { "off" });
    }
}

/// Draw `leds` as `width` background-colored cells.
fn render_strip(leds: &[RGB8], width: usize) -> String {
    let width = width.clamp(1, leds.len().max(1));
    let mut out = String::with_capacity(width * 24);
    for col in 0..width {
        let led = leds.get(col * leds.len() / width).copied().unwrap_or_default();
        let _ = write!(out, "\x1b[48;2;{};{};{}m \x1b[0m", led.r, led.g, led.b);
    }
    out
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let source: Box<dyn RpmSource> = match args.rpm {
        Some(rpm) => Box::new(FixedRpm(rpm)),
        None => Box::new(SimulatedRpm::new()),
    };
    let writer = Ws2812Writer::new(VirtualLine::default(), BitTiming::WS2812);
    let mut control: ControlLoop<STRIP_LEN, _, _, _> = ControlLoop::new(
        source,
        writer,
        ConsoleHeartbeat,
        args.rpm_max,
        args.heartbeat_period,
    );

    for frame in 0..args.frames {
        let report = match control.step() {
            Ok(report) => report,
            Err(never) => match never {},
        };
        if !args.quiet {
            println!(
                "{frame:>5} {:>5} rpm {:>3}% {:>3} LEDs |{}|",
                report.rpm,
                report.fill.percent,
                report.fill.leds_on,
                render_strip(control.buffer(), args.width)
            );
        }
    }

    let (_, writer) = control.buffer_and_writer();
    let line = writer.line();
    if line.frames == 0 {
        println!("No frames sent");
        return;
    }
    let frame_ns = line.busy_ns / line.frames;
    // Precision loss is irrelevant for a printed estimate
    #[allow(clippy::cast_precision_loss)]
    let frame_us = frame_ns as f64 / 1000.0;
    println!(
        "{} frames, {} bits each, {frame_us:.1} µs on the wire per frame (max {:.0} Hz)",
        line.frames,
        line.bits / line.frames,
        1_000_000.0 / frame_us
    );
}

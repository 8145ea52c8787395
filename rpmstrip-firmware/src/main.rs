use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::AnyOutputPin;
use log::{debug, info, warn};
use rpmstrip_control_lib::{ControlLoop, FixedRpm, RpmSource, SimulatedRpm};

mod config;
mod leds;
mod watchdog;

use crate::watchdog::TaskWatchdog;
use config::{Config, RpmSourceKind, CONFIG, NUM_LEDS};
use leds::{HeartbeatLed, LedController};

/// RPM source picked by [`Config::rpm_source`]
enum ConfiguredRpm {
    Simulated(SimulatedRpm),
    Fixed(FixedRpm),
}

impl From<RpmSourceKind> for ConfiguredRpm {
    fn from(kind: RpmSourceKind) -> Self {
        match kind {
            RpmSourceKind::Simulated => Self::Simulated(SimulatedRpm::new()),
            RpmSourceKind::Fixed(rpm) => Self::Fixed(FixedRpm(rpm)),
        }
    }
}

impl RpmSource for ConfiguredRpm {
    fn next_rpm(&mut self) -> u32 {
        match self {
            Self::Simulated(sim) => sim.next_rpm(),
            Self::Fixed(fixed) => fixed.next_rpm(),
        }
    }
}

#[cfg(not(feature = "rmt"))]
fn open_led_controller(data_pin: AnyOutputPin, config: &Config) -> Result<LedController> {
    info!("Bit-banging WS2812 data at {} MHz", config.spin.cycles_per_us);
    let driver = leds::open_strip(data_pin, config)?;
    Ok(LedController::new(driver, config.brightness))
}

#[cfg(feature = "rmt")]
fn open_led_controller(data_pin: AnyOutputPin, config: &Config) -> Result<LedController> {
    use esp_idf_hal::prelude::Peripherals;

    info!("Driving WS2812 data from RMT channel 0");
    let peripherals = Peripherals::take()?;
    let driver = leds::open_strip(data_pin, peripherals.rmt.channel0)?;
    Ok(LedController::new(driver, config.brightness))
}

fn main() -> Result<()> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("Starting rpmstrip firmware {}...", env!("GIT_VERSION"));

    let config = CONFIG;
    config.validate()?;

    let level = config.log_level.as_level_filter();
    // Set for all targets (use "*" for global)
    if let Err(e) = esp_idf_svc::log::set_target_level("*", level) {
        warn!("Failed to set log level: {e}");
    } else {
        info!("Log level set to {:?}", config.log_level);
    }

    info!(
        "Initializing LED strip on GPIO {} ({NUM_LEDS} LEDs), heartbeat on GPIO {}...",
        config.data_gpio, config.heartbeat_gpio
    );
    // SAFETY: both pin numbers are build-time constants for this board and
    // `Config::validate` checked they differ
    let data_pin = unsafe { AnyOutputPin::new(i32::from(config.data_gpio)) };
    let heartbeat_pin = unsafe { AnyOutputPin::new(i32::from(config.heartbeat_gpio)) };

    let led_controller = open_led_controller(data_pin, &config)?;
    let heartbeat = HeartbeatLed::new(heartbeat_pin)?;

    let mut control: ControlLoop<NUM_LEDS, _, _, _> = ControlLoop::new(
        ConfiguredRpm::from(config.rpm_source),
        led_controller,
        heartbeat,
        config.rpm_max,
        config.heartbeat_period,
    );

    if config.boot_animation {
        let (buffer, controller) = control.buffer_and_writer();
        if let Err(e) = leds::boot_animation(buffer, controller) {
            warn!("Boot animation failed: {e}");
        }
    }

    let watchdog = TaskWatchdog::subscribe()?;
    info!(
        "Control loop running: {:?} RPM, full scale {} RPM, {} ms per frame",
        config.rpm_source, config.rpm_max, config.loop_delay_ms
    );

    loop {
        watchdog.feed();

        match control.step() {
            // Log once per heartbeat so the console isn't flooded
            Ok(report) if report.heartbeat.is_some() => info!(
                "RPM {}: {}% {} LEDs",
                report.rpm, report.fill.percent, report.fill.leds_on
            ),
            Ok(report) => debug!("RPM {}: {} LEDs", report.rpm, report.fill.leds_on),
            Err(e) => warn!("LED update failed: {e}"),
        }

        FreeRtos::delay_ms(config.loop_delay_ms);
    }
}

//! Build-time configuration
//!
//! Everything here is a compile-time constant; change it and reflash.

use derive_more::{Display, Error};
use log::{debug, LevelFilter};
use rpmstrip_control_lib::{RPM_MAX, STRIP_LEN};
use rpmstrip_gradient_lib::{Gradient, GradientError, RPM_GRADIENT_POINTS};
use rpmstrip_ws2812_lib::{BitTiming, SpinCalibration};

/// Number of LEDs on the strip, fixed at build time.
pub const NUM_LEDS: usize = STRIP_LEN;

/// Log level applied to all targets at boot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
            Self::Trace => LevelFilter::Trace,
        }
    }
}

/// Where the displayed RPM comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpmSourceKind {
    /// Five-phase bench trace
    Simulated,
    /// Constant value, for checking colors on a bench
    Fixed(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// GPIO driving the strip's data input
    pub data_gpio: u8,
    /// GPIO of the heartbeat LED
    pub heartbeat_gpio: u8,
    /// RPM that lights the whole strip
    pub rpm_max: u32,
    /// Loop iterations between heartbeat toggles
    pub heartbeat_period: u32,
    /// Pause after every frame
    pub loop_delay_ms: u32,
    /// Output brightness (0-255), 255 sends colors unchanged
    pub brightness: u8,
    pub rpm_source: RpmSourceKind,
    pub log_level: LogLevel,
    pub boot_animation: bool,
    pub timing: BitTiming,
    /// Busy-wait calibration for the bit-banged data line
    pub spin: SpinCalibration,
}

pub const CONFIG: Config = Config {
    data_gpio: 18,
    heartbeat_gpio: 2,
    rpm_max: RPM_MAX,
    heartbeat_period: 100,
    loop_delay_ms: 10,
    brightness: 255,
    rpm_source: RpmSourceKind::Simulated,
    log_level: LogLevel::Info,
    boot_animation: true,
    timing: BitTiming::WS2812,
    spin: SpinCalibration {
        cycles_per_us: esp_idf_svc::sys::CONFIG_ESP_DEFAULT_CPU_FREQ_MHZ,
        // One black_box'd loop iteration; measured on the data pin
        cycles_per_spin: 4,
        // gpio_set_level call preceding every wait
        overhead_ns: 150,
    },
};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("rpm_max must be greater than zero")]
    ZeroRpmMax,
    #[display("strip has no LEDs")]
    NoLeds,
    #[display("data line and heartbeat share GPIO {gpio}")]
    SharedGpio { gpio: u8 },
    #[display("CPU clock calibration is zero")]
    ZeroClock,
    #[display("invalid gradient table: {_0}")]
    Gradient(GradientError),
}

impl Config {
    /// Reject settings the control loop can't run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpm_max == 0 {
            return Err(ConfigError::ZeroRpmMax);
        }
        if NUM_LEDS == 0 {
            return Err(ConfigError::NoLeds);
        }
        if self.data_gpio == self.heartbeat_gpio {
            return Err(ConfigError::SharedGpio {
                gpio: self.data_gpio,
            });
        }
        if self.spin.cycles_per_us == 0 {
            return Err(ConfigError::ZeroClock);
        }
        Gradient::new(&RPM_GRADIENT_POINTS).map_err(ConfigError::Gradient)?;
        debug!("Config OK: {self:?}");
        Ok(())
    }
}

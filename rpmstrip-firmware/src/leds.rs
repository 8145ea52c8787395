//! LED strip hardware
//!
//! This module handles:
//! - The WS2812 data line, bit-banged on a GPIO with interrupts masked for
//!   the length of a frame, or generated by the RMT peripheral with the
//!   `rmt` feature
//! - Output brightness
//! - The heartbeat LED
//! - The boot animation

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyOutputPin, Level, Output, PinDriver};
use log::{debug, warn};
use rpmstrip_control_lib::Indicator;
use rpmstrip_gradient_lib::{fade_buffer, linear_gradient_fill, BLACK, RPM_GRADIENT_POINTS};
use smart_leds::{brightness, SmartLedsWrite, RGB8};

#[cfg(not(feature = "rmt"))]
pub use gpio_line::{open_strip, StripDriver};
#[cfg(feature = "rmt")]
pub use rmt::{open_strip, StripDriver};

/// How long the boot gradient stays up before fading out
const BOOT_HOLD_MS: u32 = 500;

/// Number of frames in the boot fade-out
const BOOT_FADE_STEPS: u32 = 50;

/// Pause between boot fade frames
const BOOT_FADE_FRAME_MS: u32 = 20;

#[cfg(not(feature = "rmt"))]
mod gpio_line {
    use super::{AnyOutputPin, Level, Output, PinDriver, Result};
    use crate::config::Config;
    use esp_idf_hal::interrupt;
    use rpmstrip_ws2812_lib::{DataLine, SpinDelay, Ws2812Writer};

    pub type StripDriver = Ws2812Writer<GpioDataLine>;

    /// Bit-banged data line on a GPIO.
    pub struct GpioDataLine {
        pin: PinDriver<'static, AnyOutputPin, Output>,
        delay: SpinDelay,
    }

    impl DataLine for GpioDataLine {
        #[inline(always)]
        fn set_line(&mut self, high: bool) {
            // Only fails for pins that aren't outputs, which PinDriver::output rules out
            let _ = self.pin.set_level(Level::from(high));
        }

        #[inline(always)]
        fn wait_ns(&mut self, ns: u32) {
            for i in 0..self.delay.spins(ns) {
                core::hint::black_box(i);
            }
        }

        /// Mask interrupts on this core for the whole frame.
        fn frame<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
            interrupt::free(|| f(self))
        }
    }

    pub fn open_strip(pin: AnyOutputPin, config: &Config) -> Result<StripDriver> {
        let mut pin = PinDriver::output(pin)?;
        pin.set_low()?;
        let line = GpioDataLine {
            pin,
            delay: config.spin.delay(),
        };
        Ok(Ws2812Writer::new(line, config.timing))
    }
}

#[cfg(feature = "rmt")]
mod rmt {
    use super::{AnyOutputPin, Result};
    use esp_idf_hal::peripheral::Peripheral;
    use esp_idf_hal::rmt::config::TransmitConfig;
    use esp_idf_hal::rmt::{RmtChannel, TxRmtDriver};
    use ws2812_esp32_rmt_driver::Ws2812Esp32Rmt;

    pub type StripDriver = Ws2812Esp32Rmt<'static>;

    pub fn open_strip<C: RmtChannel>(
        pin: AnyOutputPin,
        channel: impl Peripheral<P = C> + 'static,
    ) -> Result<StripDriver> {
        // A full 150-LED frame is 3600 items; more memory blocks give the
        // peripheral more slack before it needs refilling.
        let config = TransmitConfig::new().clock_divider(1).mem_block_num(4);
        let tx_driver = TxRmtDriver::new(channel, pin, &config)?;
        Ok(Ws2812Esp32Rmt::new_with_rmt_driver(tx_driver)?)
    }
}

/// The strip driver with output brightness applied.
pub struct LedController {
    driver: StripDriver,
    brightness: u8,
}

impl LedController {
    pub fn new(driver: StripDriver, brightness: u8) -> Self {
        debug!("Creating LED controller with brightness {brightness}");
        Self { driver, brightness }
    }
}

impl SmartLedsWrite for LedController {
    type Error = anyhow::Error;
    type Color = RGB8;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        self.driver
            .write(brightness(iterator.into_iter().map(Into::into), self.brightness))?;
        Ok(())
    }
}

/// Heartbeat LED on a GPIO.
pub struct HeartbeatLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl HeartbeatLed {
    pub fn new(pin: AnyOutputPin) -> Result<Self> {
        Ok(Self {
            pin: PinDriver::output(pin)?,
        })
    }
}

impl Indicator for HeartbeatLed {
    fn set(&mut self, on: bool) {
        if let Err(e) = self.pin.set_level(Level::from(on)) {
            warn!("Heartbeat LED: {e}");
        }
    }
}

/// Show the RPM color range across the strip, then fade it out.
pub fn boot_animation<const N: usize>(
    buffer: &mut [RGB8; N],
    controller: &mut LedController,
) -> Result<()> {
    let first = RPM_GRADIENT_POINTS[0].color;
    let last = RPM_GRADIENT_POINTS[RPM_GRADIENT_POINTS.len() - 1].color;

    linear_gradient_fill(buffer, first, last);
    controller.write(buffer.iter().copied())?;
    FreeRtos::delay_ms(BOOT_HOLD_MS);

    fade_buffer(buffer, BLACK, BOOT_FADE_STEPS, |frame| -> Result<()> {
        controller.write(frame.iter().copied())?;
        FreeRtos::delay_ms(BOOT_FADE_FRAME_MS);
        Ok(())
    })
}

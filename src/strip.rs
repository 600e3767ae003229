//! The pixel strip: configuration, the actuator trait and its two backends.
//!
//! The sync logic only ever fills the whole strip with one color, so the
//! actuator surface is a single `apply(color)`. Both backends stage the
//! fill first and push it out in one write (the NeoPixel "auto_write off"
//! behaviour): nobody ever sees half a strip in the new color.
//!
//! ## Rust concepts
//! - Traits as seams: `StateSync` is generic over `StripActuator`, so tests
//!   can swap in a recording fake
//! - `Send` supertrait bounds, because the strip moves onto the sync thread
//! - `#[cfg(feature = ...)]` to compile the hardware driver only when asked

use crate::color::Color;
use crate::error::HardwareFault;

// ── Strip configuration ─────────────────────────────────────────────

/// Fixed strip settings, read once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StripConfig {
    /// Number of addressable pixels on the strip.
    pub pixel_count: usize,
    /// Output brightness in percent (0-100), applied by the driver.
    pub brightness: u8,
    /// SPI bus the data line hangs off (0 = SPI0, MOSI on GPIO 10).
    pub spi_bus: u8,
}

impl StripConfig {
    pub fn new(pixel_count: usize, brightness: u8, spi_bus: u8) -> Self {
        Self {
            pixel_count,
            brightness: brightness.min(100),
            spi_bus,
        }
    }
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            pixel_count: 150,
            brightness: 20,
            spi_bus: 0,
        }
    }
}

// ── Actuator trait ───────────────────────────────────────────────────

/// Something that can paint the whole strip one color.
pub trait StripActuator: Send {
    /// Set every pixel to `color` and commit the frame in one write.
    ///
    /// Either the whole strip shows the new color afterwards or an error
    /// is returned.
    fn apply(&mut self, color: Color) -> Result<(), HardwareFault>;

    /// Number of pixels this strip drives.
    fn pixel_count(&self) -> usize;
}

/// Lets the binary pick a backend at runtime and still hand `StateSync`
/// a single concrete type.
impl<T: StripActuator + ?Sized> StripActuator for Box<T> {
    fn apply(&mut self, color: Color) -> Result<(), HardwareFault> {
        (**self).apply(color)
    }

    fn pixel_count(&self) -> usize {
        (**self).pixel_count()
    }
}

// ── Simulated strip ──────────────────────────────────────────────────

/// In-memory strip for machines without the LED hardware.
///
/// Pixels are written into a staged buffer and then swapped into the
/// visible one, the same double-buffering a real canvas does.
pub struct SimulatedStrip {
    visible: Vec<Color>,
    staged: Vec<Color>,
    brightness: u8,
}

impl SimulatedStrip {
    pub fn new(config: StripConfig) -> Self {
        Self {
            visible: vec![Color::OFF; config.pixel_count],
            staged: vec![Color::OFF; config.pixel_count],
            brightness: config.brightness,
        }
    }

    /// What the strip currently shows, after brightness scaling.
    pub fn pixels(&self) -> &[Color] {
        &self.visible
    }
}

impl StripActuator for SimulatedStrip {
    fn apply(&mut self, color: Color) -> Result<(), HardwareFault> {
        let scaled = color.apply_brightness(self.brightness);
        self.staged.fill(scaled);
        std::mem::swap(&mut self.visible, &mut self.staged);

        tracing::info!(
            "Simulated strip: {} pixels set to {} (shown as {})",
            self.visible.len(),
            color,
            scaled
        );
        Ok(())
    }

    fn pixel_count(&self) -> usize {
        self.visible.len()
    }
}

// ── WS2812 over SPI ──────────────────────────────────────────────────

/// NeoPixel / WS2812 strip driven from the Pi's SPI MOSI pin.
///
/// `ws2812-spi` encodes each bit of the pixel stream as SPI symbols, so the
/// bus has to run between 2 and 3.8 MHz.
#[cfg(feature = "hardware")]
pub struct Ws2812Strip {
    driver: ws2812_spi::Ws2812<rppal::spi::Spi>,
    config: StripConfig,
}

#[cfg(feature = "hardware")]
impl Ws2812Strip {
    const SPI_CLOCK_HZ: u32 = 3_000_000;

    /// Open the SPI bus for the strip.
    ///
    /// Fails if SPI is not enabled on the Pi (`dtparam=spi=on`) or the
    /// process cannot open `/dev/spidevN.0`.
    pub fn new(config: StripConfig) -> Result<Self, Box<dyn std::error::Error>> {
        use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

        let bus = match config.spi_bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            other => return Err(format!("Unsupported SPI bus: {other}").into()),
        };
        let spi = Spi::new(bus, SlaveSelect::Ss0, Self::SPI_CLOCK_HZ, Mode::Mode0)?;

        Ok(Self {
            driver: ws2812_spi::Ws2812::new(spi),
            config,
        })
    }
}

#[cfg(feature = "hardware")]
impl StripActuator for Ws2812Strip {
    fn apply(&mut self, color: Color) -> Result<(), HardwareFault> {
        use smart_leds::{RGB8, SmartLedsWrite};

        let pixel: RGB8 = color.apply_brightness(self.config.brightness).into();
        let frame = std::iter::repeat_n(pixel, self.config.pixel_count);

        self.driver
            .write(frame)
            .map_err(|e| HardwareFault(format!("SPI write failed: {e:?}")))
    }

    fn pixel_count(&self) -> usize {
        self.config.pixel_count
    }
}

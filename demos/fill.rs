//! # Fill the strip with one color
//!
//! The smallest useful strip program: open the strip, set every pixel to
//! one color, show it. Handy as a wiring check before running the server.
//!
//! ## Run it
//! ```sh
//! cargo build --release --features hardware --example fill
//! sudo ./target/release/examples/fill 0000FF
//! ```
//!
//! The color argument is RRGGBB and defaults to blue. Pixel count and
//! brightness match the server defaults (150 pixels at 20%).

#[cfg(not(feature = "hardware"))]
fn main() {
    eprintln!("This example requires the 'hardware' feature.");
}

#[cfg(feature = "hardware")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use led_strip_twin::strip::Ws2812Strip;
    use led_strip_twin::{StripActuator, StripConfig, color};

    let text = std::env::args().nth(1).unwrap_or_else(|| "0000FF".to_string());
    let fill = color::decode(&text)?;

    let config = StripConfig::default();
    let mut strip = Ws2812Strip::new(config)?;
    strip.apply(fill)?;

    println!(
        "Set {} pixels to {} at {}% brightness.",
        strip.pixel_count(),
        fill,
        config.brightness
    );
    Ok(())
}

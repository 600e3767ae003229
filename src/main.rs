//! LED strip device: twin sync plus the direct-method HTTP API.
//!
//! Restores the strip to the color last reported in the twin, then serves
//! `On`/`Off` methods and desired-property patches until Ctrl+C.
//!
//! ## Architecture
//! - **Sync thread** (std::thread): owns the strip and `StateSync`, handles one event at a time
//! - **HTTP server** (tokio/axum): accepts methods and patches, forwards them via channel
//!
//! ## Usage
//! ```sh
//! # ID_SCOPE, DEVICE_ID and PRIMARY_KEY may also come from a .env file
//! sudo ./target/release/led-strip-twin --device-id pi-strip --twin-file twin.json
//! curl -X POST localhost:8080/api/v1/methods/On -d '"00FF00"'
//! ```

use clap::Parser;
use led_strip_twin::server::{self, AppState};
use led_strip_twin::sync::{SyncEvent, SyncStatus, sync_loop};
use led_strip_twin::{
    DeviceIdentity, PropertyStore, SimulatedStrip, StateSync, StripActuator, StripConfig,
    TwinStore, setup_signal_handler, shutdown_signal,
};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// NeoPixel strip synchronized with a device twin
#[derive(Parser)]
#[command(name = "led-strip-twin")]
#[command(about = "Keep a NeoPixel strip in sync with a device twin")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Number of pixels on the strip
    #[arg(long, env = "PIXEL_COUNT", default_value = "150")]
    pixels: usize,

    /// Strip brightness in percent (0-100)
    #[arg(long, env = "BRIGHTNESS", default_value = "20",
          value_parser = clap::value_parser!(u8).range(0..=100))]
    brightness: u8,

    /// SPI bus the strip's data line is wired to
    #[arg(long, env = "SPI_BUS", default_value = "0")]
    spi_bus: u8,

    /// Use an in-memory strip instead of the hardware
    #[arg(long)]
    simulate: bool,

    /// JSON file holding the twin document between runs
    #[arg(long, env = "TWIN_FILE")]
    twin_file: Option<PathBuf>,

    /// ID scope of the cloud application
    #[arg(long, env = "ID_SCOPE")]
    id_scope: Option<String>,

    /// Device id reported in status and logs
    #[arg(long, env = "DEVICE_ID", default_value = "led-strip")]
    device_id: String,

    /// Shared access key; when set, requests must send it as x-device-key
    #[arg(long, env = "PRIMARY_KEY", hide_env_values = true)]
    primary_key: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env first so clap's env fallbacks can see it; a missing file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();
    let strip_config = StripConfig::new(args.pixels, args.brightness, args.spi_bus);
    let identity = DeviceIdentity {
        id_scope: args.id_scope,
        device_id: args.device_id,
        primary_key: args.primary_key,
    };

    tracing::info!("LED Strip Twin v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Device: {:?}", identity);
    tracing::info!(
        "Strip: {} pixels at {}% on SPI{}",
        strip_config.pixel_count,
        strip_config.brightness,
        strip_config.spi_bus
    );

    let twin = match &args.twin_file {
        Some(path) => {
            tracing::info!("Twin file: {}", path.display());
            // A broken twin file must not keep the strip from starting.
            TwinStore::open_or_fresh(path)
        }
        None => TwinStore::new(),
    };

    let shutdown = setup_signal_handler()?;

    // Channel for everything that changes the strip.
    let (tx, rx) = mpsc::channel();

    // Desired patches go through the same channel as methods.
    let mut sync_store = twin.clone();
    let patch_tx = tx.clone();
    sync_store.on_desired_patch(Arc::new(move |patch| {
        if patch_tx.send(SyncEvent::DesiredPatch(patch)).is_err() {
            tracing::warn!("Sync thread gone, dropping desired patch");
        }
    }));

    let strip = build_strip(args.simulate, strip_config)?;
    let status = Arc::new(Mutex::new(SyncStatus::new(
        identity.device_id.clone(),
        strip.pixel_count(),
    )));

    let sync = StateSync::new(strip, sync_store);
    let sync_status = status.clone();
    let sync_handle = std::thread::spawn(move || sync_loop(rx, sync, sync_status));

    let app = server::create_router(AppState {
        events: tx.clone(),
        twin,
        status,
        identity: Arc::new(identity),
    });

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", args.port);
    tracing::info!(
        "Try: curl -X POST http://localhost:{}/api/v1/methods/On -d '\"00FF00\"'",
        args.port
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    // The twin's patch callback holds a sender too, so ask explicitly.
    let _ = tx.send(SyncEvent::Shutdown);
    if sync_handle.join().is_err() {
        tracing::error!("Sync thread panicked");
    }

    tracing::info!("Shut down cleanly.");
    Ok(())
}

/// Pick the strip backend: the WS2812 driver, or the simulation when asked
/// for (or when built without the `hardware` feature).
fn build_strip(
    simulate: bool,
    config: StripConfig,
) -> Result<Box<dyn StripActuator>, Box<dyn std::error::Error>> {
    #[cfg(feature = "hardware")]
    if !simulate {
        let strip = led_strip_twin::strip::Ws2812Strip::new(config)?;
        return Ok(Box::new(strip));
    }

    #[cfg(not(feature = "hardware"))]
    if !simulate {
        tracing::warn!("Built without the 'hardware' feature, using a simulated strip");
    }

    Ok(Box::new(SimulatedStrip::new(config)))
}

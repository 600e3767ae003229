//! Keep a NeoPixel strip and a device twin in sync.
//!
//! The strip shows one color at a time. That color comes from three places:
//! the twin's last reported value at startup, the `On`/`Off` direct
//! methods, and desired-property patches. After every change the new color
//! is written back to the twin as the reported `Color` property.
//!
//! Modules, leaf first:
//! - [`color`]: the `Color` type and the RRGGBB hex codec
//! - [`strip`]: the strip actuator trait, a simulated strip and the WS2812 driver
//! - [`twin`]: the property store trait and the shared twin document
//! - [`sync`]: `StateSync`, which ties the three together, and its thread
//! - [`server`]: the HTTP transport that delivers methods and patches
//!
//! This file also holds the device identity and the Ctrl+C plumbing used
//! by the binary.

pub mod color;
pub mod error;
pub mod server;
pub mod strip;
pub mod sync;
pub mod twin;

pub use color::Color;
pub use error::{HardwareFault, InvalidColorFormat, SyncError, TransportError};
pub use strip::{SimulatedStrip, StripActuator, StripConfig};
pub use sync::{CommandHandler, CommandResult, PatchHandler, StateSync, SyncEvent, SyncState};
pub use twin::{Patch, PropertyStore, TwinStore};

use std::fmt;
use tokio::sync::watch;

// ── Device identity ────────────────────────────────────────────────

/// Who this device is in the cloud application.
///
/// `primary_key` is the device's shared access key. When it is set, the
/// HTTP transport only accepts requests that present it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id_scope: Option<String>,
    pub device_id: String,
    pub primary_key: Option<String>,
}

impl DeviceIdentity {
    /// Does `presented` unlock this device? Always true without a key.
    pub fn authorizes(&self, presented: Option<&str>) -> bool {
        match &self.primary_key {
            None => true,
            Some(key) => presented == Some(key.as_str()),
        }
    }
}

/// Keeps the shared key out of logs.
impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("id_scope", &self.id_scope)
            .field("device_id", &self.device_id)
            .field("primary_key", &self.primary_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ── Shutdown ───────────────────────────────────────────────────────

/// Install a Ctrl+C handler and return a receiver that flips to `true`
/// when it fires.
///
/// # Rust concept: watch channels
/// A `watch` channel holds one value that many tasks can observe. The
/// signal handler runs on its own thread and only needs `send`, which is
/// not async, so it can be called straight from the handler.
pub fn setup_signal_handler() -> Result<watch::Receiver<bool>, ctrlc::Error> {
    let (tx, rx) = watch::channel(false);

    ctrlc::set_handler(move || {
        // Nobody listening any more means we are already shutting down.
        let _ = tx.send(true);
    })?;

    Ok(rx)
}

/// Wait until the flag from [`setup_signal_handler`] is set.
pub async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    loop {
        let stopped = *rx.borrow_and_update();
        if stopped {
            break;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
    tracing::info!("Shutdown requested");
}

//! State sync: the one place the strip color changes.
//!
//! [`StateSync`] owns the strip and its twin handle and holds the current
//! color. Every change goes the same way: decode the text, paint the
//! strip, remember the color, report it to the twin. Nothing is
//! remembered or reported unless the strip write succeeded.
//!
//! [`sync_loop`] runs `StateSync` on its own thread and feeds it
//! [`SyncEvent`]s from a channel, one at a time, so two changes can never
//! interleave.
//!
//! ## Rust concepts
//! - Generics with trait bounds (`StateSync<S: StripActuator, P: PropertyStore>`)
//! - Enums with data for results (`CommandResult`) and events (`SyncEvent`)
//! - `tokio::sync::oneshot` to answer an async caller from a plain thread

use crate::color::{self, Color};
use crate::error::SyncError;
use crate::strip::StripActuator;
use crate::twin::{COLOR_KEY, Patch, PropertyStore};
use serde::Serialize;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Direct method that turns the strip on in the color given as payload.
pub const COMMAND_ON: &str = "On";
/// Direct method that turns the strip off.
pub const COMMAND_OFF: &str = "Off";

// ── State ────────────────────────────────────────────────────────────

/// Whether the strip has been given a color yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No color applied since start (no reported color, or it was unusable).
    Uninitialized,
    /// A color has been applied at least once. There is no way back.
    Active,
}

// ── Command results ──────────────────────────────────────────────────

/// Outcome of one direct method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// The command ran and the strip now shows `color`.
    Handled { color: Color },
    /// A recognized command whose color change failed.
    Failed(SyncError),
    /// Not `On` or `Off`. Nothing was touched.
    UnknownCommand(String),
}

impl CommandResult {
    /// HTTP-style status sent back with the method response.
    pub fn status_code(&self) -> u16 {
        match self {
            CommandResult::Handled { .. } => 200,
            CommandResult::Failed(SyncError::InvalidColor(_)) => 400,
            CommandResult::UnknownCommand(_) => 404,
            CommandResult::Failed(SyncError::Hardware(_)) => 500,
            CommandResult::Failed(SyncError::Transport(_)) => 502,
        }
    }

    /// The `result` flag of the method response body.
    pub fn succeeded(&self) -> bool {
        matches!(self, CommandResult::Handled { .. })
    }

    /// Human-readable summary for the response body.
    pub fn message(&self) -> String {
        match self {
            CommandResult::Handled { color } => format!("Color set to {color}"),
            CommandResult::Failed(e) => e.to_string(),
            CommandResult::UnknownCommand(name) => format!("Unknown command: {name}"),
        }
    }
}

// ── Handler traits ───────────────────────────────────────────────────

/// Receives direct methods from the command transport.
pub trait CommandHandler {
    fn handle_command(&mut self, name: &str, payload: Option<&str>) -> CommandResult;
}

/// Receives desired-property patches from the twin.
pub trait PatchHandler {
    /// Patches have no response channel: failures are logged only.
    fn handle_desired_patch(&mut self, patch: &Patch);
}

// ── StateSync ────────────────────────────────────────────────────────

/// Holds the current strip color and keeps strip and twin in step.
pub struct StateSync<S: StripActuator, P: PropertyStore> {
    strip: S,
    store: P,
    current: Option<Color>,
}

impl<S: StripActuator, P: PropertyStore> StateSync<S, P> {
    pub fn new(strip: S, store: P) -> Self {
        Self {
            strip,
            store,
            current: None,
        }
    }

    /// Restore the last reported color, if there is a usable one.
    ///
    /// Never fails: an unreachable store or a bad stored value leaves the
    /// strip untouched and the state `Uninitialized`.
    pub fn initialize(&mut self) {
        let stored = match self.store.get(COLOR_KEY) {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::info!("No reported color in twin, leaving strip as is");
                return;
            }
            Err(e) => {
                tracing::warn!("Could not read twin at startup: {}", e);
                return;
            }
        };

        tracing::info!("Restoring reported color {}", stored);
        if let Err(e) = self.set_color(&stored) {
            tracing::warn!("Could not restore color {:?}: {}", stored, e);
        }
    }

    /// Decode `text`, paint the strip, then record and report the color.
    ///
    /// On a decode or strip error the previous color is kept and nothing is
    /// reported. A failed report is returned after the strip and the
    /// in-memory color have already changed.
    pub fn set_color(&mut self, text: &str) -> Result<Color, SyncError> {
        let color = color::decode(text)?;
        tracing::info!(
            "Updating color: r = {}, g = {}, b = {}",
            color.r,
            color.g,
            color.b
        );

        self.strip.apply(color)?;
        self.current = Some(color);

        let patch = Patch::from([(COLOR_KEY.to_string(), color::encode(color))]);
        self.store.put_reported(&patch)?;
        Ok(color)
    }

    /// The color the strip shows, or `None` before the first change.
    pub fn current(&self) -> Option<Color> {
        self.current
    }

    pub fn state(&self) -> SyncState {
        match self.current {
            Some(_) => SyncState::Active,
            None => SyncState::Uninitialized,
        }
    }

    pub fn strip(&self) -> &S {
        &self.strip
    }

    pub fn store(&self) -> &P {
        &self.store
    }
}

impl<S: StripActuator, P: PropertyStore> CommandHandler for StateSync<S, P> {
    fn handle_command(&mut self, name: &str, payload: Option<&str>) -> CommandResult {
        tracing::info!("Command received: {} (payload {:?})", name, payload);

        let outcome = match name {
            COMMAND_ON => self.set_color(payload.unwrap_or_default()),
            COMMAND_OFF => self.set_color(&color::encode(Color::OFF)),
            other => {
                tracing::warn!("Received unknown command: {}", other);
                return CommandResult::UnknownCommand(other.to_string());
            }
        };

        match outcome {
            Ok(color) => CommandResult::Handled { color },
            Err(e) => {
                tracing::error!("Command {} failed: {}", name, e);
                CommandResult::Failed(e)
            }
        }
    }
}

impl<S: StripActuator, P: PropertyStore> PatchHandler for StateSync<S, P> {
    fn handle_desired_patch(&mut self, patch: &Patch) {
        tracing::info!("Desired patch received: {:?}", patch);

        let Some(text) = patch.get(COLOR_KEY) else {
            return;
        };
        if let Err(e) = self.set_color(text) {
            tracing::error!("Desired color {:?} not applied: {}", text, e);
        }
    }
}

// ── Sync thread ──────────────────────────────────────────────────────

/// Work items for the sync thread.
pub enum SyncEvent {
    /// A direct method; the result goes back on `reply`.
    Command {
        name: String,
        payload: Option<String>,
        reply: oneshot::Sender<CommandResult>,
    },
    /// A desired-property patch from the twin.
    DesiredPatch(Patch),
    /// Stop the loop. Events queued behind it are dropped.
    Shutdown,
}

/// Status published by the sync thread for the transport to read.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct SyncStatus {
    /// Device id from the configuration
    pub device_id: String,
    /// Whether a color has been applied yet
    pub state: SyncState,
    /// Current strip color as RRGGBB, if any
    #[schema(value_type = Option<String>, example = "00FF00")]
    pub color: Option<Color>,
    /// Number of pixels on the strip
    pub pixel_count: usize,
    /// Server version
    pub version: String,
}

impl SyncStatus {
    pub fn new(device_id: impl Into<String>, pixel_count: usize) -> Self {
        Self {
            device_id: device_id.into(),
            state: SyncState::Uninitialized,
            color: None,
            pixel_count,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Run `sync` until `Shutdown` arrives or every event sender is dropped.
///
/// Restores the reported color first, then handles events strictly in
/// arrival order. Updates `status` after each one.
pub fn sync_loop<S: StripActuator, P: PropertyStore>(
    rx: Receiver<SyncEvent>,
    mut sync: StateSync<S, P>,
    status: Arc<Mutex<SyncStatus>>,
) {
    sync.initialize();
    publish(&sync, &status);
    tracing::info!("Sync thread started, waiting for events...");

    while let Ok(event) = rx.recv() {
        match event {
            SyncEvent::Command {
                name,
                payload,
                reply,
            } => {
                let result = sync.handle_command(&name, payload.as_deref());
                publish(&sync, &status);
                if reply.send(result).is_err() {
                    tracing::warn!("Caller for command {} went away before the reply", name);
                }
            }
            SyncEvent::DesiredPatch(patch) => {
                sync.handle_desired_patch(&patch);
                publish(&sync, &status);
            }
            SyncEvent::Shutdown => break,
        }
    }

    tracing::info!("Sync thread shutting down.");
}

fn publish<S: StripActuator, P: PropertyStore>(
    sync: &StateSync<S, P>,
    status: &Arc<Mutex<SyncStatus>>,
) {
    let mut s = status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    s.state = sync.state();
    s.color = sync.current();
}

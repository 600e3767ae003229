//! Device twin: the property store the strip color is mirrored to.
//!
//! A twin has two sections. `reported` is what the device says about
//! itself (here only `"Color"`), `desired` is what the remote side would
//! like it to be. Every change to a section bumps its `$version`.
//!
//! [`TwinStore`] is a cloneable handle to one shared [`TwinDocument`]. The
//! sync thread holds one handle (as its [`PropertyStore`]) and the HTTP
//! transport holds another to read the twin and feed in desired patches.
//! With a backing file the document survives restarts, which is how the
//! strip comes back on in its last color.
//!
//! ## Rust concepts
//! - `Arc<Mutex<T>>` for state shared between threads
//! - `#[serde(flatten)]` to mix named fields and free-form keys
//! - Trait objects (`Arc<dyn Fn(..)>`) for the subscriber callback

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Twin key holding the strip color as RRGGBB text.
pub const COLOR_KEY: &str = "Color";

/// A set of property updates, e.g. `{"Color": "00FF00"}`.
pub type Patch = BTreeMap<String, String>;

/// Callback invoked once per inbound desired-property patch.
pub type DesiredPatchCallback = Arc<dyn Fn(Patch) + Send + Sync>;

// ── PropertyStore trait ──────────────────────────────────────────────

/// Remote key-value store the device reports its state to.
pub trait PropertyStore: Send {
    /// Read a reported property.
    fn get(&self, key: &str) -> Result<Option<String>, TransportError>;

    /// Merge `patch` into the reported properties.
    fn put_reported(&mut self, patch: &Patch) -> Result<(), TransportError>;

    /// Register the handler for desired-property patches. Patches are
    /// delivered one at a time; registering again replaces the handler.
    fn on_desired_patch(&mut self, callback: DesiredPatchCallback);
}

// ── Twin document ────────────────────────────────────────────────────

/// One section of the twin (`desired` or `reported`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinSection {
    #[serde(flatten)]
    pub properties: BTreeMap<String, String>,
    /// Incremented on every change to this section.
    #[serde(rename = "$version", default)]
    pub version: u64,
}

impl TwinSection {
    fn merge(&mut self, patch: &Patch) {
        self.properties
            .extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.version += 1;
    }
}

/// The whole twin as it is stored and served.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinDocument {
    #[serde(default)]
    pub desired: TwinSection,
    #[serde(default)]
    pub reported: TwinSection,
}

// ── TwinStore ────────────────────────────────────────────────────────

struct TwinInner {
    doc: TwinDocument,
    file: Option<PathBuf>,
    subscriber: Option<DesiredPatchCallback>,
}

/// Cloneable handle to the shared twin document.
#[derive(Clone)]
pub struct TwinStore {
    inner: Arc<Mutex<TwinInner>>,
}

impl TwinStore {
    /// A twin that lives only in memory.
    pub fn new() -> Self {
        Self::from_parts(TwinDocument::default(), None)
    }

    /// A twin backed by a JSON file.
    ///
    /// A missing file starts an empty twin; the file is created on the
    /// first change. A file that exists but does not parse is an error.
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        let doc = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                TransportError(format!("Invalid twin file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TwinDocument::default(),
            Err(e) => {
                return Err(TransportError(format!(
                    "Cannot read twin file {}: {e}",
                    path.display()
                )));
            }
        };
        Ok(Self::from_parts(doc, Some(path.to_path_buf())))
    }

    /// Like [`TwinStore::open`], but an unreadable or corrupt file is logged
    /// and replaced by an empty twin instead of failing.
    ///
    /// The path is kept, so the first successful report rewrites the file.
    pub fn open_or_fresh(path: &Path) -> Self {
        Self::open(path).unwrap_or_else(|e| {
            tracing::error!("{}; starting with an empty twin", e);
            Self::from_parts(TwinDocument::default(), Some(path.to_path_buf()))
        })
    }

    fn from_parts(doc: TwinDocument, file: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TwinInner {
                doc,
                file,
                subscriber: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TwinInner> {
        // A panic while holding the lock leaves the document itself intact.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current twin.
    pub fn document(&self) -> TwinDocument {
        self.lock().doc.clone()
    }

    /// Merge a patch into `desired` and hand it to the subscriber.
    ///
    /// Returns the new desired `$version`. If the twin file cannot be
    /// written the patch is neither recorded nor delivered. The subscriber
    /// runs after the lock is released, so it may call back into the store.
    ///
    /// Writes the twin file while holding the lock; call it from a blocking
    /// context, not directly from an async task.
    pub fn apply_desired(&self, patch: Patch) -> Result<u64, TransportError> {
        let (version, subscriber) = {
            let mut inner = self.lock();
            let mut doc = inner.doc.clone();
            doc.desired.merge(&patch);
            save(inner.file.as_deref(), &doc)?;
            inner.doc = doc;
            (inner.doc.desired.version, inner.subscriber.clone())
        };

        match subscriber {
            Some(callback) => callback(patch),
            None => tracing::warn!("Desired patch v{} received with no subscriber", version),
        }
        Ok(version)
    }
}

impl Default for TwinStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyStore for TwinStore {
    fn get(&self, key: &str) -> Result<Option<String>, TransportError> {
        Ok(self.lock().doc.reported.properties.get(key).cloned())
    }

    fn put_reported(&mut self, patch: &Patch) -> Result<(), TransportError> {
        let mut inner = self.lock();
        // Only a report that reached the file becomes visible.
        let mut doc = inner.doc.clone();
        doc.reported.merge(patch);
        save(inner.file.as_deref(), &doc)?;
        inner.doc = doc;

        tracing::info!(
            "Reported patch {:?} (v{})",
            patch,
            inner.doc.reported.version
        );
        Ok(())
    }

    fn on_desired_patch(&mut self, callback: DesiredPatchCallback) {
        self.lock().subscriber = Some(callback);
    }
}

fn save(file: Option<&Path>, doc: &TwinDocument) -> Result<(), TransportError> {
    let Some(path) = file else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(doc)
        .map_err(|e| TransportError(format!("Cannot serialize twin: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| TransportError(format!("Cannot write twin file {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn patch(pairs: &[(&str, &str)]) -> Patch {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_twin_has_no_color() {
        let store = TwinStore::new();
        assert_eq!(store.get(COLOR_KEY).unwrap(), None);
    }

    #[test]
    fn put_reported_merges_and_bumps_version() {
        let mut store = TwinStore::new();
        store.put_reported(&patch(&[("Color", "FF0000")])).unwrap();
        store.put_reported(&patch(&[("Color", "00FF00")])).unwrap();

        assert_eq!(store.get(COLOR_KEY).unwrap().as_deref(), Some("00FF00"));
        assert_eq!(store.document().reported.version, 2);
        assert_eq!(store.document().desired.version, 0);
    }

    #[test]
    fn clones_share_the_same_document() {
        let mut sync_handle = TwinStore::new();
        let server_handle = sync_handle.clone();
        sync_handle
            .put_reported(&patch(&[("Color", "0000FF")]))
            .unwrap();
        assert_eq!(
            server_handle.document().reported.properties["Color"],
            "0000FF"
        );
    }

    #[test]
    fn apply_desired_notifies_subscriber() {
        let mut store = TwinStore::new();
        let (tx, rx) = mpsc::channel();
        store.on_desired_patch(Arc::new(move |p| tx.send(p).unwrap()));

        let version = store.apply_desired(patch(&[("Color", "123456")])).unwrap();

        assert_eq!(version, 1);
        assert_eq!(rx.try_recv().unwrap(), patch(&[("Color", "123456")]));
        assert_eq!(store.document().desired.properties["Color"], "123456");
    }

    #[test]
    fn apply_desired_without_subscriber_still_records() {
        let store = TwinStore::new();
        store.apply_desired(patch(&[("Other", "x")])).unwrap();
        assert_eq!(store.document().desired.properties["Other"], "x");
    }

    #[test]
    fn document_serializes_with_version_keys() {
        let mut store = TwinStore::new();
        store.put_reported(&patch(&[("Color", "FF0000")])).unwrap();
        let json = serde_json::to_value(store.document()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "desired": { "$version": 0 },
                "reported": { "Color": "FF0000", "$version": 1 }
            })
        );
    }

    #[test]
    fn open_missing_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let store = TwinStore::open(&tmp.path().join("twin.json")).unwrap();
        assert_eq!(store.document(), TwinDocument::default());
    }

    #[test]
    fn reported_color_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("twin.json");

        let mut store = TwinStore::open(&path).unwrap();
        store.put_reported(&patch(&[("Color", "0000FF")])).unwrap();
        drop(store);

        let reopened = TwinStore::open(&path).unwrap();
        assert_eq!(reopened.get(COLOR_KEY).unwrap().as_deref(), Some("0000FF"));
        assert_eq!(reopened.document().reported.version, 1);
    }

    #[test]
    fn open_rejects_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("twin.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(TwinStore::open(&path).is_err());
    }

    #[test]
    fn open_or_fresh_falls_back_on_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("twin.json");
        std::fs::write(&path, b"{").unwrap();

        let mut store = TwinStore::open_or_fresh(&path);
        assert_eq!(store.document(), TwinDocument::default());
        assert_eq!(store.get(COLOR_KEY).unwrap(), None);

        // The path is kept: the next report replaces the broken file.
        store.put_reported(&patch(&[("Color", "00FF00")])).unwrap();
        let reopened = TwinStore::open(&path).unwrap();
        assert_eq!(reopened.get(COLOR_KEY).unwrap().as_deref(), Some("00FF00"));
    }

    #[test]
    fn open_or_fresh_keeps_valid_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("twin.json");
        TwinStore::open(&path)
            .unwrap()
            .put_reported(&patch(&[("Color", "0000FF")]))
            .unwrap();

        let store = TwinStore::open_or_fresh(&path);
        assert_eq!(store.get(COLOR_KEY).unwrap().as_deref(), Some("0000FF"));
    }

    /// A directory in place of the twin file makes every write fail.
    fn unwritable_store(tmp: &TempDir) -> TwinStore {
        let path = tmp.path().join("twin.json");
        std::fs::create_dir(&path).unwrap();
        TwinStore::from_parts(TwinDocument::default(), Some(path))
    }

    #[test]
    fn put_reported_surfaces_write_failure() {
        let tmp = TempDir::new().unwrap();
        let mut store = unwritable_store(&tmp);

        let err = store
            .put_reported(&patch(&[("Color", "FF0000")]))
            .unwrap_err();
        assert!(err.0.contains("Cannot write twin file"));
    }

    #[test]
    fn failed_report_is_not_recorded() {
        let tmp = TempDir::new().unwrap();
        let mut store = unwritable_store(&tmp);

        assert!(store.put_reported(&patch(&[("Color", "FF0000")])).is_err());

        assert_eq!(store.get(COLOR_KEY).unwrap(), None);
        assert_eq!(store.document().reported.version, 0);
    }

    #[test]
    fn failed_desired_patch_is_not_recorded_or_delivered() {
        let tmp = TempDir::new().unwrap();
        let mut store = unwritable_store(&tmp);
        let (tx, rx) = mpsc::channel();
        store.on_desired_patch(Arc::new(move |p| tx.send(p).unwrap()));

        assert!(store.apply_desired(patch(&[("Color", "FF0000")])).is_err());

        assert!(rx.try_recv().is_err());
        assert_eq!(store.document().desired, TwinSection::default());
    }
}

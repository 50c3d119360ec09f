//! Binary snapshots of a paused runner.
//!
//! Layout: a fixed header (magic, format version, story fingerprint)
//! followed by a JSON payload of runner state and globals. The
//! fingerprint gates restores: a snapshot only loads against the exact
//! story bytes it was taken from.
//!
//! External bindings and observers are not captured; the caller rebinds
//! them after a restore.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use fable_story::Story;

use crate::error::RuntimeError;
use crate::globals::Globals;
use crate::runner::{Runner, RunnerState};

const MAGIC: &[u8; 4] = b"FBSN";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 32;

#[derive(Serialize)]
struct PayloadRef<'a> {
    runner: RunnerState,
    globals: &'a Globals,
}

#[derive(Deserialize)]
struct Payload {
    runner: RunnerState,
    globals: Globals,
}

/// Serialize a runner and its globals store.
///
/// The runner must be at a pause point (between `advance` calls); a
/// snapshot never captures an in-flight lookahead pass.
///
/// # Errors
///
/// `IncompatibleSnapshot` when the payload fails to serialize.
pub fn create(runner: &Runner) -> Result<Vec<u8>, RuntimeError> {
    let globals = runner.globals();
    let globals = globals.borrow();
    let payload = PayloadRef {
        runner: runner.to_state(),
        globals: &globals,
    };
    let body = serde_json::to_vec(&payload)
        .map_err(|e| RuntimeError::IncompatibleSnapshot(format!("serialize failed: {e}")))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.push(VERSION);
    bytes.extend_from_slice(runner.story().fingerprint());
    bytes.extend_from_slice(&body);
    debug!(len = bytes.len(), "snapshot created");
    Ok(bytes)
}

/// Rebuild a runner from snapshot bytes.
///
/// When `globals_override` is given the snapshot's globals payload is
/// discarded and the restored runner shares the supplied store instead;
/// callers use this to attach a second runner to an already restored
/// store.
///
/// # Errors
///
/// `IncompatibleSnapshot` on a bad header, version, fingerprint, or
/// payload.
pub fn restore(
    story: &Arc<Story>,
    bytes: &[u8],
    globals_override: Option<Rc<RefCell<Globals>>>,
) -> Result<Runner, RuntimeError> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(RuntimeError::IncompatibleSnapshot("bad header".into()));
    }
    if bytes[4] != VERSION {
        return Err(RuntimeError::IncompatibleSnapshot(format!(
            "unsupported snapshot version {}",
            bytes[4]
        )));
    }
    if &bytes[5..HEADER_LEN] != story.fingerprint() {
        return Err(RuntimeError::IncompatibleSnapshot(
            "story fingerprint mismatch".into(),
        ));
    }
    let payload: Payload = serde_json::from_slice(&bytes[HEADER_LEN..])
        .map_err(|e| RuntimeError::IncompatibleSnapshot(format!("bad payload: {e}")))?;
    let globals = match globals_override {
        Some(g) => g,
        None => Rc::new(RefCell::new(payload.globals)),
    };
    Ok(Runner::from_state(
        Arc::clone(story),
        globals,
        payload.runner,
    ))
}

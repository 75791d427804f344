// Chunk: docs/chunks/loop_bridge - Host message loop / secondary loop integration
//! Error types for the bridge.

use std::io;
use std::path::PathBuf;

/// Failures that leave the bridge unusable.
///
/// Misuse (preparing twice, draining off the UI thread) is not represented
/// here: it is a debug assertion and a logged no-op.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The secondary loop's selector or waker could not be created.
    #[error("failed to create secondary loop: {0}")]
    CreateLoop(#[source] io::Error),
    /// The poll thread could not be spawned.
    #[error("failed to spawn poll thread: {0}")]
    SpawnThread(#[source] io::Error),
    /// The loop's poller is owned elsewhere (already integrated or running).
    #[error("secondary loop poller is not available")]
    PollerUnavailable,
    /// The secondary loop's blocking poll failed in run-forever mode.
    #[error("secondary loop poll failed: {0}")]
    Poll(#[source] io::Error),
}

/// Failures reading a bridge configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config schema version mismatch (expected {expected}, got {found})")]
    SchemaMismatch { expected: u32, found: u32 },
}

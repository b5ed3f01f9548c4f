//! Snapshot/restore state machine.

use dbeekeeper_core::ClientError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// What a dbee is currently doing besides executing transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No snapshot or restore in flight.
    Idle,
    /// A snapshot is being written in the background.
    Snapshotting,
    /// State is being replaced from a snapshot.
    Restoring,
}

impl Phase {
    /// Returns the operation name used in error messages.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Snapshotting => "snapshot",
            Phase::Restoring => "restore",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

/// Shared phase of one dbee.
///
/// The cell is shared with background snapshot threads, which return it to
/// [`Phase::Idle`] by dropping their [`PhaseGuard`].
#[derive(Debug, Clone)]
pub struct PhaseCell {
    phase: Arc<Mutex<Phase>>,
}

impl PhaseCell {
    /// Creates an idle cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Arc::new(Mutex::new(Phase::Idle)),
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub fn get(&self) -> Phase {
        *self.phase.lock()
    }

    /// Moves from `Idle` to `phase`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Busy`] if another snapshot or restore holds the
    /// dbee.
    pub fn try_begin(&self, phase: Phase) -> Result<PhaseGuard, ClientError> {
        let mut current = self.phase.lock();
        if *current != Phase::Idle {
            return Err(ClientError::Busy {
                requested: phase.operation(),
                in_progress: current.operation(),
            });
        }
        *current = phase;
        Ok(PhaseGuard {
            phase: Arc::clone(&self.phase),
        })
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a dbee out of `Idle` until dropped.
#[derive(Debug)]
#[must_use = "the phase returns to idle as soon as the guard is dropped"]
pub struct PhaseGuard {
    phase: Arc<Mutex<Phase>>,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        *self.phase.lock() = Phase::Idle;
    }
}

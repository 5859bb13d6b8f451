//! Version gate for rolling upgrades
//!
//! Every instance carries a compiled-in version. When the dynamic configuration
//! raises `min_supported_version` above it, the instance stops claiming, lets its
//! running jobs finish and exits once none are left.

use tracing::{info, warn};

/// Version of this build, compared against `min_supported_version`
pub const EXECUTOR_VERSION: u32 = 2;

/// Whether the instance still takes new work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Accepting,
    /// Finishing running jobs, then exiting
    Draining,
}

#[derive(Debug, Clone)]
pub struct VersionGate {
    local_version: u32,
    state: GateState,
}

impl VersionGate {
    pub fn new(local_version: u32) -> Self {
        Self {
            local_version,
            state: GateState::Accepting,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Compare against the current minimum
    ///
    /// Draining is sticky: lowering the minimum again does not resume claiming.
    pub fn observe(&mut self, min_supported_version: u32) -> GateState {
        if self.state == GateState::Accepting && self.local_version < min_supported_version {
            warn!(
                local_version = self.local_version,
                min_supported_version, "Dispatcher version is outdated, draining"
            );
            self.state = GateState::Draining;
        }
        self.state
    }

    /// A draining instance with nothing running is done
    pub fn should_exit(&self, running: usize) -> bool {
        if self.state == GateState::Draining && running == 0 {
            info!(local_version = self.local_version, "Drain complete");
            return true;
        }
        false
    }
}

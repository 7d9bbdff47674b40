//! Per-request deterministic lifecycle.
//!
//! The engine advances this machine at well-defined points so that external observers (hooks,
//! health checks) can always inspect a consistent state. Any transition outside the legal table
//! fails synchronously with [`EngineError::DeterministicState`] rather than silently clamping.

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Pending,
    Retrying,
    Success,
    Error,
    Cancelled,
}

impl RequestState {
    fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Pending => "PENDING",
            Self::Retrying => "RETRYING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    fn is_legal_target(self, to: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, to),
            (Idle, Pending)
                | (Idle, Cancelled)
                | (Pending, Success)
                | (Pending, Error)
                | (Pending, Retrying)
                | (Pending, Cancelled)
                | (Retrying, Pending)
                | (Retrying, Success)
                | (Retrying, Error)
                | (Retrying, Cancelled)
        )
    }
}

/// A single request's lifecycle state. Not `Clone`: a request has exactly one owning machine.
#[derive(Debug)]
pub struct StateMachine {
    state: RequestState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: RequestState::Idle }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> RequestState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, RequestState::Success | RequestState::Error | RequestState::Cancelled)
    }

    /// Attempt a transition. Fails with `deterministic-state` on illegal edges, matching the
    /// source's exception-based control flow reshaped as a typed `Result`.
    pub fn transition<E>(&mut self, to: RequestState) -> Result<(), EngineError<E>> {
        if !self.state.is_legal_target(to) {
            return Err(EngineError::DeterministicState {
                from: self.state.label(),
                to: to.label(),
            });
        }
        self.state = to;
        Ok(())
    }
}

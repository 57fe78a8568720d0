// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Protocol state machines with typed transitions.
//!
//! Master: Idle → Sent → WaitingForDone → (Completed | TimedOut | Busy) → Idle.
//! Slave: Idle → ClaimOrder → Executing → PublishDone → Idle, with
//! Terminated reachable once an `exit` command has run.

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;

/// Master side of one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasterState {
    /// No request outstanding.
    Idle,
    /// Order published.
    Sent,
    /// Polling for the done-file.
    WaitingForDone,
    /// Done-file received.
    Completed,
    /// Request cancelled before the slave claimed it.
    TimedOut,
    /// Slave claimed the request but did not answer in time.
    Busy,
}

impl MasterState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Sent => "Sent",
            Self::WaitingForDone => "WaitingForDone",
            Self::Completed => "Completed",
            Self::TimedOut => "TimedOut",
            Self::Busy => "Busy",
        }
    }

    pub fn can_transition_to(&self, target: MasterState) -> bool {
        matches!(
            (self, target),
            (Self::Idle, Self::Sent) |
            (Self::Sent, Self::WaitingForDone) |
            (Self::WaitingForDone, Self::Completed) |
            (Self::WaitingForDone, Self::TimedOut) |
            (Self::WaitingForDone, Self::Busy) |
            // Any outcome, or a failed publish, returns to idle.
            (Self::Sent, Self::Idle) |
            (Self::WaitingForDone, Self::Idle) |
            (Self::Completed, Self::Idle) |
            (Self::TimedOut, Self::Idle) |
            (Self::Busy, Self::Idle)
        )
    }
}

impl std::fmt::Display for MasterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Slave main-loop phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlaveState {
    /// Sleeping between polls.
    Idle,
    /// Trying to claim the next order.
    ClaimOrder,
    /// Running a claimed script.
    Executing,
    /// Publishing the done-file.
    PublishDone,
    /// An `exit` command ran; the loop ends.
    Terminated,
}

impl SlaveState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::ClaimOrder => "ClaimOrder",
            Self::Executing => "Executing",
            Self::PublishDone => "PublishDone",
            Self::Terminated => "Terminated",
        }
    }

    pub fn can_transition_to(&self, target: SlaveState) -> bool {
        matches!(
            (self, target),
            (Self::Idle, Self::ClaimOrder) |
            (Self::ClaimOrder, Self::Idle) |
            (Self::ClaimOrder, Self::Executing) |
            (Self::Executing, Self::PublishDone) |
            (Self::PublishDone, Self::Idle) |
            (Self::PublishDone, Self::Terminated)
        )
    }
}

impl std::fmt::Display for SlaveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Generic transition tracker shared by both sides.
#[derive(Debug)]
pub struct StateMachine<S> {
    machine: &'static str,
    current: S,
    transition_count: u64,
}

/// Operations the tracker needs from a state enum.
pub trait ProtocolState: Copy + PartialEq + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn can_transition_to(&self, target: Self) -> bool;
}

impl ProtocolState for MasterState {
    fn name(&self) -> &'static str {
        MasterState::name(self)
    }

    fn can_transition_to(&self, target: Self) -> bool {
        MasterState::can_transition_to(self, target)
    }
}

impl ProtocolState for SlaveState {
    fn name(&self) -> &'static str {
        SlaveState::name(self)
    }

    fn can_transition_to(&self, target: Self) -> bool {
        SlaveState::can_transition_to(self, target)
    }
}

impl<S: ProtocolState> StateMachine<S> {
    pub fn new(machine: &'static str, initial: S) -> Self {
        Self {
            machine,
            current: initial,
            transition_count: 0,
        }
    }

    pub fn state(&self) -> S {
        self.current
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to move to `target`.
    pub fn transition_to(&mut self, target: S) -> Result<(), StateTransitionError> {
        if !self.current.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                machine: self.machine,
                from: self.current.name(),
                to: target.name(),
            });
        }

        tracing::trace!(
            machine = self.machine,
            from = self.current.name(),
            to = target.name(),
            "State transition"
        );

        self.current = target;
        self.transition_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_round_trip() {
        let mut sm = StateMachine::new("master", MasterState::Idle);
        sm.transition_to(MasterState::Sent).unwrap();
        sm.transition_to(MasterState::WaitingForDone).unwrap();
        sm.transition_to(MasterState::Completed).unwrap();
        sm.transition_to(MasterState::Idle).unwrap();
        assert_eq!(sm.transition_count(), 4);
    }

    #[test]
    fn test_master_cannot_skip_send() {
        let mut sm = StateMachine::new("master", MasterState::Idle);
        let err = sm.transition_to(MasterState::Completed).unwrap_err();
        assert!(err.to_string().contains("Idle"));
        assert_eq!(sm.state(), MasterState::Idle);
    }

    #[test]
    fn test_slave_exit_path() {
        assert!(SlaveState::PublishDone.can_transition_to(SlaveState::Terminated));
        assert!(!SlaveState::Executing.can_transition_to(SlaveState::Terminated));
        assert!(!SlaveState::Terminated.can_transition_to(SlaveState::Idle));
    }
}

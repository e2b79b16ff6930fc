use std::fmt;

use cmm_types::TargetIndex;

/// Stage an operation has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Resolve,
    LockAcquire,
    IdentifierAlloc,
    Execute,
    SecondTargetExecute,
    Complete,
    Failed,
}

impl fmt::Display for OpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpState::Resolve => "resolve",
            OpState::LockAcquire => "lock_acquire",
            OpState::IdentifierAlloc => "identifier_alloc",
            OpState::Execute => "execute",
            OpState::SecondTargetExecute => "second_target_execute",
            OpState::Complete => "complete",
            OpState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-operation record of how far it got and whether a target may already
/// have applied part of it.
#[derive(Debug)]
pub struct OpProgress {
    op: &'static str,
    state: OpState,
    side_effects: bool,
    failed_on: Option<TargetIndex>,
    failed_in: Option<OpState>,
}

impl OpProgress {
    pub fn new(op: &'static str) -> Self {
        Self {
            op,
            state: OpState::Resolve,
            side_effects: false,
            failed_on: None,
            failed_in: None,
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    pub fn enter(&mut self, state: OpState) {
        tracing::trace!(op = self.op, from = %self.state, to = %state, "op state");
        self.state = state;
    }

    /// A request was handed to a target and may have been applied.
    pub fn mark_side_effect(&mut self) {
        self.side_effects = true;
    }

    pub fn has_side_effects(&self) -> bool {
        self.side_effects
    }

    pub fn fail(&mut self, target: Option<TargetIndex>) {
        self.failed_in = Some(self.state);
        self.failed_on = target;
        self.state = OpState::Failed;
    }

    pub fn complete(&mut self) {
        self.enter(OpState::Complete);
    }

    pub fn failed_on(&self) -> Option<TargetIndex> {
        self.failed_on
    }

    pub fn failed_in(&self) -> Option<OpState> {
        self.failed_in
    }
}

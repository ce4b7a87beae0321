use serde::Serialize;
use specpage_core::{CancellationToken, ChangeKind};
use std::sync::Mutex;

use crate::debounce::Trigger;

/// Why a build was started.
#[derive(Debug, Clone)]
pub enum BuildReason {
    Initial,
    Changes(Trigger),
}

impl BuildReason {
    pub fn describe(&self) -> String {
        let BuildReason::Changes(trigger) = self else {
            return "initial build".to_string();
        };
        let count = |kind: ChangeKind| {
            trigger
                .changes
                .iter()
                .filter(|change| change.kind == kind)
                .count()
        };
        let mut parts = Vec::new();
        for (kind, label) in [
            (ChangeKind::Created, "added"),
            (ChangeKind::Modified, "changed"),
            (ChangeKind::Removed, "removed"),
        ] {
            let n = count(kind);
            if n > 0 {
                parts.push(format!("{n} {label}"));
            }
        }
        format!("{} (latest: {})", parts.join(", "), trigger.latest.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    fn can_become(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Cancelled) | (Running, Completed | Cancelled | Failed)
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }
}

/// One conversion run. Shared between the orchestrator and the task doing
/// the work; the token is checked before every write to the output tree.
#[derive(Debug)]
pub struct BuildJob {
    id: u64,
    reason: BuildReason,
    state: Mutex<JobState>,
    token: CancellationToken,
}

impl BuildJob {
    pub fn new(id: u64, reason: BuildReason) -> Self {
        Self {
            id,
            reason,
            state: Mutex::new(JobState::Pending),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn reason(&self) -> &BuildReason {
        &self.reason
    }

    pub fn state(&self) -> JobState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Moves the job along its lifecycle. Returns `false` when the move is
    /// not allowed from the current state (e.g. completing a cancelled job).
    pub fn transition(&self, next: JobState) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !state.can_become(next) {
            return false;
        }
        *state = next;
        true
    }

    /// Cancels the job unless it already finished.
    pub fn cancel(&self) -> bool {
        let cancelled = self.transition(JobState::Cancelled);
        if cancelled {
            self.token.cancel();
        }
        cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

//! Per-unit repair state machine.

use super::report::SkipReason;
use tracing::debug;

/// Lifecycle of one repair unit (seam or intersection).
///
/// Legal transitions: `Pending -> Processing`, then `Processing` to
/// exactly one terminal state. Anything else is a logic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeamState {
    Pending,
    Processing,
    Written,
    Skipped(SkipReason),
    Failed,
}

impl SeamState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SeamState::Written | SeamState::Skipped(_) | SeamState::Failed
        )
    }

    fn can_advance_to(&self, next: &SeamState) -> bool {
        match (self, next) {
            (SeamState::Pending, SeamState::Processing) => true,
            (SeamState::Pending, SeamState::Skipped(_)) => true,
            (SeamState::Processing, s) if s.is_terminal() => true,
            _ => false,
        }
    }
}

/// Tracks one unit's state and logs every transition.
#[derive(Debug)]
pub struct UnitState {
    unit: String,
    state: SeamState,
}

impl UnitState {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            state: SeamState::Pending,
        }
    }

    pub fn state(&self) -> SeamState {
        self.state
    }

    /// Advances to `next`, panicking (debug builds) on an illegal
    /// transition. Transitions are logged at debug level.
    pub fn advance(&mut self, next: SeamState) {
        debug_assert!(
            self.state.can_advance_to(&next),
            "illegal state transition {:?} -> {:?} for {}",
            self.state,
            next,
            self.unit
        );
        debug!(unit = %self.unit, from = ?self.state, to = ?next, "Repair unit transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut unit = UnitState::new("v(0,0)");
        assert_eq!(unit.state(), SeamState::Pending);

        unit.advance(SeamState::Processing);
        unit.advance(SeamState::Written);
        assert!(unit.state().is_terminal());
    }

    #[test]
    fn test_skip_straight_from_pending() {
        let mut unit = UnitState::new("h(1,0)");
        unit.advance(SeamState::Skipped(SkipReason::MissingTiles));
        assert_eq!(
            unit.state(),
            SeamState::Skipped(SkipReason::MissingTiles)
        );
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_terminal_state_is_final() {
        let mut unit = UnitState::new("v(0,0)");
        unit.advance(SeamState::Processing);
        unit.advance(SeamState::Failed);
        unit.advance(SeamState::Written);
    }
}

//! Transition table
//!
//! The handler of a request depends only on the instance's current status.
//! Each origin status lists the targets it can reach in one step; any other
//! target is ignored.
//!
//! | Origin | Target | Transition |
//! |---|---|---|
//! | NOT_DEPLOYED | DEPLOYED_STOPPED | deploy |
//! | DEPLOYED_STOPPED | DEPLOYED_STARTED | start |
//! | DEPLOYED_STOPPED | NOT_DEPLOYED | undeploy |
//! | DEPLOYED_STARTED | DEPLOYED_STOPPED | stop |
//! | DEPLOYED_STARTED | NOT_DEPLOYED | undeploy |
//! | STARTING | DEPLOYED_STOPPED | stop |
//! | STARTING | NOT_DEPLOYED | undeploy |
//!
//! DEPLOYING, STOPPING, UNDEPLOYING and PROBLEM accept nothing.

use serde::{Deserialize, Serialize};
use std::fmt;

use shared_types::InstanceStatus;

/// A lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    Deploy,
    Start,
    Stop,
    Undeploy,
}

impl Transition {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Undeploy => "undeploy",
        }
    }

    /// Status an instance ends in when the transition fully succeeds.
    #[must_use]
    pub fn target(self) -> InstanceStatus {
        match self {
            Self::Deploy | Self::Stop => InstanceStatus::DeployedStopped,
            Self::Start => InstanceStatus::DeployedStarted,
            Self::Undeploy => InstanceStatus::NotDeployed,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Row = &'static [(InstanceStatus, Transition)];

const FROM_NOT_DEPLOYED: Row = &[(InstanceStatus::DeployedStopped, Transition::Deploy)];

const FROM_DEPLOYED_STOPPED: Row = &[
    (InstanceStatus::DeployedStarted, Transition::Start),
    (InstanceStatus::NotDeployed, Transition::Undeploy),
];

const FROM_DEPLOYED_STARTED: Row = &[
    (InstanceStatus::DeployedStopped, Transition::Stop),
    (InstanceStatus::NotDeployed, Transition::Undeploy),
];

const FROM_STARTING: Row = &[
    (InstanceStatus::DeployedStopped, Transition::Stop),
    (InstanceStatus::NotDeployed, Transition::Undeploy),
];

const NONE: Row = &[];

/// Static status -> handler table.
pub struct TransitionTable;

impl TransitionTable {
    /// Legal `(target, transition)` pairs from `current`.
    #[must_use]
    pub fn row(current: InstanceStatus) -> Row {
        match current {
            InstanceStatus::NotDeployed => FROM_NOT_DEPLOYED,
            InstanceStatus::DeployedStopped => FROM_DEPLOYED_STOPPED,
            InstanceStatus::DeployedStarted => FROM_DEPLOYED_STARTED,
            InstanceStatus::Starting => FROM_STARTING,
            InstanceStatus::Deploying
            | InstanceStatus::Stopping
            | InstanceStatus::Undeploying
            | InstanceStatus::Problem => NONE,
        }
    }

    /// Transition to run for a request, `None` if unreachable in one step.
    #[must_use]
    pub fn lookup(current: InstanceStatus, requested: InstanceStatus) -> Option<Transition> {
        Self::row(current)
            .iter()
            .find(|(target, _)| *target == requested)
            .map(|(_, transition)| *transition)
    }

    /// Targets reachable from `current`.
    #[must_use]
    pub fn targets(current: InstanceStatus) -> Vec<InstanceStatus> {
        Self::row(current).iter().map(|(target, _)| *target).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = InstanceStatus> {
        proptest::sample::select(InstanceStatus::ALL.to_vec())
    }

    #[test]
    fn test_documented_transitions() {
        use InstanceStatus::*;
        assert_eq!(TransitionTable::lookup(NotDeployed, DeployedStopped), Some(Transition::Deploy));
        assert_eq!(TransitionTable::lookup(DeployedStopped, DeployedStarted), Some(Transition::Start));
        assert_eq!(TransitionTable::lookup(DeployedStarted, DeployedStopped), Some(Transition::Stop));
        assert_eq!(TransitionTable::lookup(Starting, DeployedStopped), Some(Transition::Stop));
        assert_eq!(TransitionTable::lookup(Starting, NotDeployed), Some(Transition::Undeploy));
    }

    #[test]
    fn test_multi_step_requests_are_unreachable() {
        use InstanceStatus::*;
        assert_eq!(TransitionTable::lookup(NotDeployed, DeployedStarted), None);
        assert_eq!(TransitionTable::lookup(DeployedStarted, DeployedStarted), None);
        assert!(TransitionTable::targets(Problem).is_empty());
        assert!(TransitionTable::targets(Deploying).is_empty());
    }

    proptest! {
        #[test]
        fn prop_lookup_is_one_documented_transition_or_none(
            current in any_status(),
            requested in any_status(),
        ) {
            let row = TransitionTable::row(current);
            let matches = row.iter().filter(|(target, _)| *target == requested).count();
            prop_assert!(matches <= 1);

            match TransitionTable::lookup(current, requested) {
                Some(transition) => {
                    prop_assert_eq!(transition.target(), requested);
                    prop_assert!(!current.is_transitional() || current == InstanceStatus::Starting);
                }
                None => prop_assert_eq!(matches, 0),
            }
        }
    }
}

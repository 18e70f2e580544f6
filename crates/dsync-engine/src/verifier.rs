//! Post-execution verification
//!
//! The registry itself is the source of truth: after direct writes the
//! actual state is read again and diffed against the same desired state.

use std::fmt;

use dsync_core::{Diff, NetworkState};

use crate::diff::diff;

/// How close a network got to its desired state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Nothing left to change
    FullyConverged,
    /// Fewer pending changes than before execution
    PartiallyConverged {
        /// Changes still pending
        remaining: usize,
    },
    /// No progress was made
    NotConverged {
        /// Changes still pending
        remaining: usize,
    },
    /// Changes await authority approval; nothing to verify yet
    Skipped,
}

impl Convergence {
    /// Whether the network reached its desired state
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::FullyConverged)
    }
}

impl fmt::Display for Convergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullyConverged => f.write_str("fully converged"),
            Self::PartiallyConverged { remaining } => {
                write!(f, "partially converged ({remaining} remaining)")
            }
            Self::NotConverged { remaining } => write!(f, "not converged ({remaining} remaining)"),
            Self::Skipped => f.write_str("skipped (pending approval)"),
        }
    }
}

/// Compare the post-execution state with the diff computed before execution
pub fn verify(desired: &NetworkState, after: &NetworkState, before: &Diff) -> Convergence {
    let remaining = diff(desired, after).len();
    if remaining == 0 {
        Convergence::FullyConverged
    } else if remaining < before.len() {
        Convergence::PartiallyConverged { remaining }
    } else {
        Convergence::NotConverged { remaining }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use dsync_core::{NetworkId, TrustEntry};

    fn state(bytes: &[u8]) -> NetworkState {
        NetworkState::new(
            NetworkId::new("mainnet"),
            bytes.iter().map(|b| TrustEntry::approve_only(Address::repeat_byte(*b))),
        )
    }

    #[test]
    fn test_convergence_levels() {
        let desired = state(&[1, 2, 3]);
        let before = diff(&desired, &state(&[]));

        assert_eq!(verify(&desired, &state(&[1, 2, 3]), &before), Convergence::FullyConverged);
        assert_eq!(
            verify(&desired, &state(&[1]), &before),
            Convergence::PartiallyConverged { remaining: 2 }
        );
        assert_eq!(
            verify(&desired, &state(&[]), &before),
            Convergence::NotConverged { remaining: 3 }
        );
    }

    #[test]
    fn test_regression_is_not_converged() {
        let desired = state(&[1, 2]);
        let before = diff(&desired, &state(&[1]));
        assert_eq!(
            verify(&desired, &state(&[9]), &before),
            Convergence::NotConverged { remaining: 3 }
        );
    }
}

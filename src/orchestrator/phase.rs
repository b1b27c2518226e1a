//! Orchestration state machine
//!
//! `Idle -> NonceResolved -> Built -> Submitted -> Confirmed | Failed`, with
//! two loops: `Built -> Idle` after a nonce-too-low rejection and
//! `Submitted -> Built` after a drop.

use ethers::types::H256;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    NonceResolved { nonce: u64 },
    Built { nonce: u64 },
    Submitted { nonce: u64, hash: H256 },
    Confirmed { block_number: u64 },
    Failed { reason: String },
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::NonceResolved { .. } => "nonce_resolved",
            Phase::Built { .. } => "built",
            Phase::Submitted { .. } => "submitted",
            Phase::Confirmed { .. } => "confirmed",
            Phase::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Confirmed { .. } | Phase::Failed { .. })
    }

    pub fn can_transition_to(&self, next: &Phase) -> bool {
        use Phase::*;

        match (self, next) {
            (_, Failed { .. }) => !self.is_terminal(),
            (Idle, NonceResolved { .. }) => true,
            (NonceResolved { .. }, Built { .. }) => true,
            (Built { .. }, Submitted { .. }) => true,
            // nonce-too-low: re-resolve
            (Built { .. }, Idle) => true,
            (Submitted { .. }, Confirmed { .. }) => true,
            // dropped: resubmit at the same nonce
            (Submitted { nonce: a, .. }, Built { nonce: b }) => a == b,
            _ => false,
        }
    }
}

/// Ordered record of the phases one orchestration passed through
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTrail {
    phases: Vec<Phase>,
}

impl PhaseTrail {
    pub fn new() -> Self {
        Self {
            phases: vec![Phase::Idle],
        }
    }

    pub fn current(&self) -> &Phase {
        // never empty: starts at Idle
        &self.phases[self.phases.len() - 1]
    }

    pub fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.current().can_transition_to(&next),
            "invalid transition from {} to {}",
            self.current().name(),
            next.name()
        );
        debug!("Phase {} -> {}", self.current().name(), next.name());
        self.phases.push(next);
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.phases.iter().map(Phase::name).collect()
    }
}

impl Default for PhaseTrail {
    fn default() -> Self {
        Self::new()
    }
}

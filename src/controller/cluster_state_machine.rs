//! Formal finite state machine for AIStore lifecycle management.
//!
//! Every `status.state` the reconciler writes is reached through a
//! [`TransitionResult::Success`] of this table. Guards keep the transitions
//! that depend on observed facts (replicas gone, pass finished, nodes recorded)
//! honest.
//!
//! ## State Categories
//!
//! ### Creation
//! "" → Initialized → [InitializingLoadBalancerService → PendingLoadBalancerService] →
//! Created → Ready
//!
//! ### Steady state
//! Ready ↔ Upgrading / Scaling → Ready
//!
//! ### Shutdown
//! Ready → ShuttingDown → Shutdown → (flag cleared) Initialized
//!
//! ### Deletion
//! any → Decommissioning → CleaningResources → [HostCleanup] → Finalized

use std::fmt;

use crate::crd::ClusterState;

/// Events that trigger state transitions in the resource lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    /// Finalizer attached, operator owns the resource
    Initialize,
    /// External LoadBalancer services were created
    LoadBalancerRequested,
    /// LoadBalancer services still lack external IPs
    LoadBalancerPending,
    /// Proxies and targets were created
    Bootstrapped,
    /// A daemon group is rolling a template change
    UpgradeStarted,
    /// A daemon group is changing its replica count
    ScaleStarted,
    /// Every step of the steady-state pass finished
    PassCompleted,
    /// `spec.shutdownCluster` was set
    ShutdownRequested,
    /// Both StatefulSets reached zero replicas
    ShutdownComplete,
    /// `spec.shutdownCluster` was cleared
    Resumed,
    /// Deletion timestamp has been set on the resource
    DeletionRequested,
    /// The managed cluster no longer answers
    ClusterUnreachable,
    /// Owned objects are gone; host state must be wiped
    HostCleanupRequired,
    /// Owned objects are gone
    ResourcesCleaned,
    /// Every host cleanup Job finished or was removed
    HostCleanupComplete,
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterEvent::Initialize => write!(f, "Initialize"),
            ClusterEvent::LoadBalancerRequested => write!(f, "LoadBalancerRequested"),
            ClusterEvent::LoadBalancerPending => write!(f, "LoadBalancerPending"),
            ClusterEvent::Bootstrapped => write!(f, "Bootstrapped"),
            ClusterEvent::UpgradeStarted => write!(f, "UpgradeStarted"),
            ClusterEvent::ScaleStarted => write!(f, "ScaleStarted"),
            ClusterEvent::PassCompleted => write!(f, "PassCompleted"),
            ClusterEvent::ShutdownRequested => write!(f, "ShutdownRequested"),
            ClusterEvent::ShutdownComplete => write!(f, "ShutdownComplete"),
            ClusterEvent::Resumed => write!(f, "Resumed"),
            ClusterEvent::DeletionRequested => write!(f, "DeletionRequested"),
            ClusterEvent::ClusterUnreachable => write!(f, "ClusterUnreachable"),
            ClusterEvent::HostCleanupRequired => write!(f, "HostCleanupRequired"),
            ClusterEvent::ResourcesCleaned => write!(f, "ResourcesCleaned"),
            ClusterEvent::HostCleanupComplete => write!(f, "HostCleanupComplete"),
        }
    }
}

/// Context information available during state transitions
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Every step of the current steady-state pass completed
    pub pass_complete: bool,
    /// Sum of `spec.replicas` over both StatefulSets
    pub remaining_replicas: i32,
    /// Metadata wipe requested on hostpath state storage
    pub wipe_host_state: bool,
    /// Number of nodes recorded for host cleanup
    pub recorded_nodes: usize,
    /// `spec.shutdownCluster` is set
    pub shutdown_requested: bool,
}

impl TransitionContext {
    /// Create a new transition context
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pass_complete(mut self, complete: bool) -> Self {
        self.pass_complete = complete;
        self
    }

    pub fn with_remaining_replicas(mut self, replicas: i32) -> Self {
        self.remaining_replicas = replicas;
        self
    }

    pub fn with_wipe_host_state(mut self, wipe: bool) -> Self {
        self.wipe_host_state = wipe;
        self
    }

    pub fn with_recorded_nodes(mut self, nodes: usize) -> Self {
        self.recorded_nodes = nodes;
        self
    }

    pub fn with_shutdown_requested(mut self, requested: bool) -> Self {
        self.shutdown_requested = requested;
        self
    }

    /// Host cleanup has work to do
    pub fn needs_host_cleanup(&self) -> bool {
        self.wipe_host_state && self.recorded_nodes > 0
    }
}

/// A state transition definition with optional guard
#[derive(Debug)]
pub struct Transition {
    /// Source state
    pub from: ClusterState,
    /// Target state
    pub to: ClusterState,
    /// Event that triggers this transition
    pub event: ClusterEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ClusterState,
        to: ClusterState,
        event: ClusterEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: ClusterState,
        to: ClusterState,
        event: ClusterEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: ClusterState,
        event: ClusterEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: ClusterState,
        to: ClusterState,
        event: ClusterEvent,
        reason: String,
    },
}

/// Formal state machine for AIStore lifecycle
pub struct ClusterStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ClusterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        use ClusterEvent as E;
        use ClusterState as S;

        let mut transitions = vec![
            // ========================================
            // Creation
            // ========================================
            Transition::new(
                S::Uninitialized,
                S::Initialized,
                E::Initialize,
                "Finalizer attached",
            ),
            Transition::new(
                S::Initialized,
                S::InitializingLoadBalancerService,
                E::LoadBalancerRequested,
                "LoadBalancer services created",
            ),
            Transition::new(
                S::InitializingLoadBalancerService,
                S::PendingLoadBalancerService,
                E::LoadBalancerPending,
                "Waiting for LoadBalancer external IPs",
            ),
            Transition::new(
                S::Initialized,
                S::Created,
                E::Bootstrapped,
                "Proxies and targets created",
            ),
            Transition::new(
                S::InitializingLoadBalancerService,
                S::Created,
                E::Bootstrapped,
                "Proxies and targets created",
            ),
            Transition::new(
                S::PendingLoadBalancerService,
                S::Created,
                E::Bootstrapped,
                "Proxies and targets created",
            ),
            // ========================================
            // Steady state
            // ========================================
            Transition::new(
                S::Created,
                S::Ready,
                E::PassCompleted,
                "Cluster is ready",
            ),
            Transition::new(
                S::Upgrading,
                S::Ready,
                E::PassCompleted,
                "Upgrade finished",
            ),
            Transition::new(
                S::Scaling,
                S::Ready,
                E::PassCompleted,
                "Scaling finished",
            ),
            Transition::new(
                S::Ready,
                S::Upgrading,
                E::UpgradeStarted,
                "Rolling out a spec change",
            ),
            Transition::new(
                S::Scaling,
                S::Upgrading,
                E::UpgradeStarted,
                "Rolling out a spec change after scaling",
            ),
            Transition::new(
                S::Ready,
                S::Scaling,
                E::ScaleStarted,
                "Changing daemon count",
            ),
            Transition::new(
                S::Upgrading,
                S::Scaling,
                E::ScaleStarted,
                "Changing daemon count during upgrade",
            ),
            // ========================================
            // Shutdown
            // ========================================
            Transition::new(
                S::Ready,
                S::ShuttingDown,
                E::ShutdownRequested,
                "Graceful shutdown requested",
            ),
            Transition::new(
                S::ShuttingDown,
                S::Shutdown,
                E::ShutdownComplete,
                "All daemons stopped",
            ),
            Transition::new(
                S::ShuttingDown,
                S::Initialized,
                E::Resumed,
                "Shutdown cancelled",
            ),
            Transition::new(
                S::Shutdown,
                S::Initialized,
                E::Resumed,
                "Resuming from shutdown",
            ),
            // ========================================
            // Deletion
            // ========================================
            Transition::new(
                S::Decommissioning,
                S::CleaningResources,
                E::ClusterUnreachable,
                "Cluster decommissioned, removing resources",
            ),
            Transition::new(
                S::CleaningResources,
                S::HostCleanup,
                E::HostCleanupRequired,
                "Wiping host state",
            ),
            Transition::new(
                S::CleaningResources,
                S::Finalized,
                E::ResourcesCleaned,
                "Resources removed",
            ),
            Transition::new(
                S::HostCleanup,
                S::Finalized,
                E::HostCleanupComplete,
                "Host state wiped",
            ),
        ];

        // Deletion can interrupt every state the deletion path does not own.
        transitions.extend(
            ClusterState::ALL
                .into_iter()
                .filter(|s| !s.is_teardown())
                .map(|s| {
                    Transition::new(
                        s,
                        S::Decommissioning,
                        E::DeletionRequested,
                        "Resource deletion requested",
                    )
                }),
        );

        Self { transitions }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: &ClusterState,
        event: ClusterEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: &ClusterState, event: &ClusterEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: &ClusterState) -> Vec<&ClusterEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *state)
            .map(|t| &t.event)
            .collect()
    }

    /// Target state of a transition, ignoring guards
    pub fn target(&self, from: &ClusterState, event: &ClusterEvent) -> Option<ClusterState> {
        self.transitions
            .iter()
            .find(|t| t.from == *from && t.event == *event)
            .map(|t| t.to)
    }

    /// Check guard conditions for a transition
    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match (&transition.from, &transition.to, &transition.event) {
            (_, ClusterState::Ready, ClusterEvent::PassCompleted) if !ctx.pass_complete => {
                Some("Reconcile pass has pending steps".to_string())
            }
            (ClusterState::ShuttingDown, ClusterState::Shutdown, _)
                if ctx.remaining_replicas > 0 =>
            {
                Some(format!(
                    "{} replicas still running",
                    ctx.remaining_replicas
                ))
            }
            (ClusterState::CleaningResources, ClusterState::HostCleanup, _) => {
                if !ctx.wipe_host_state {
                    Some("Host cleanup needs a metadata wipe on hostpath storage".to_string())
                } else if ctx.recorded_nodes == 0 {
                    Some("No nodes recorded for host cleanup".to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Determine the event implied by the current state and observed facts.
///
/// Returns `None` when the state carries no context-derived event; the
/// reconciler then picks events from the outcome of its steps.
pub fn determine_event(
    current: &ClusterState,
    ctx: &TransitionContext,
    has_deletion_timestamp: bool,
) -> Option<ClusterEvent> {
    // Deletion always takes priority
    if has_deletion_timestamp {
        return (!current.is_teardown()).then_some(ClusterEvent::DeletionRequested);
    }

    match current {
        ClusterState::Uninitialized => Some(ClusterEvent::Initialize),
        ClusterState::Ready if ctx.shutdown_requested => Some(ClusterEvent::ShutdownRequested),
        ClusterState::ShuttingDown | ClusterState::Shutdown if !ctx.shutdown_requested => {
            Some(ClusterEvent::Resumed)
        }
        ClusterState::ShuttingDown if ctx.remaining_replicas == 0 => {
            Some(ClusterEvent::ShutdownComplete)
        }
        ClusterState::Created | ClusterState::Upgrading | ClusterState::Scaling
            if ctx.pass_complete =>
        {
            Some(ClusterEvent::PassCompleted)
        }
        ClusterState::CleaningResources => Some(if ctx.needs_host_cleanup() {
            ClusterEvent::HostCleanupRequired
        } else {
            ClusterEvent::ResourcesCleaned
        }),
        _ => None,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap,
    clippy::panic
)]
mod tests {
    use super::*;

    fn expect_success(result: TransitionResult) -> (ClusterState, ClusterState) {
        match result {
            TransitionResult::Success { from, to, .. } => (from, to),
            other => panic!("Expected successful transition, got {other:?}"),
        }
    }

    #[test]
    fn test_uninitialized_to_initialized() {
        let sm = ClusterStateMachine::new();
        let (from, to) = expect_success(sm.transition(
            &ClusterState::Uninitialized,
            ClusterEvent::Initialize,
            &TransitionContext::new(),
        ));
        assert_eq!(from, ClusterState::Uninitialized);
        assert_eq!(to, ClusterState::Initialized);
    }

    #[test]
    fn test_creation_path_without_lb() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new().with_pass_complete(true);
        let mut state = ClusterState::Uninitialized;
        for event in [
            ClusterEvent::Initialize,
            ClusterEvent::Bootstrapped,
            ClusterEvent::PassCompleted,
        ] {
            state = expect_success(sm.transition(&state, event, &ctx)).1;
        }
        assert_eq!(state, ClusterState::Ready);
    }

    #[test]
    fn test_creation_path_with_lb() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new();
        let mut state = ClusterState::Initialized;
        for event in [
            ClusterEvent::LoadBalancerRequested,
            ClusterEvent::LoadBalancerPending,
            ClusterEvent::Bootstrapped,
        ] {
            state = expect_success(sm.transition(&state, event, &ctx)).1;
        }
        assert_eq!(state, ClusterState::Created);
    }

    #[test]
    fn test_created_to_ready_guard() {
        let sm = ClusterStateMachine::new();
        let result = sm.transition(
            &ClusterState::Created,
            ClusterEvent::PassCompleted,
            &TransitionContext::new(),
        );
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
    }

    #[test]
    fn test_ready_to_upgrading_and_back() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new().with_pass_complete(true);
        let (_, to) =
            expect_success(sm.transition(&ClusterState::Ready, ClusterEvent::UpgradeStarted, &ctx));
        assert_eq!(to, ClusterState::Upgrading);
        let (_, to) =
            expect_success(sm.transition(&to, ClusterEvent::PassCompleted, &ctx));
        assert_eq!(to, ClusterState::Ready);
    }

    #[test]
    fn test_ready_to_scaling() {
        let sm = ClusterStateMachine::new();
        let (_, to) = expect_success(sm.transition(
            &ClusterState::Ready,
            ClusterEvent::ScaleStarted,
            &TransitionContext::new(),
        ));
        assert_eq!(to, ClusterState::Scaling);
    }

    #[test]
    fn test_created_cannot_scale() {
        let sm = ClusterStateMachine::new();
        assert!(!sm.can_transition(&ClusterState::Created, &ClusterEvent::ScaleStarted));
        assert!(!sm.can_transition(&ClusterState::Created, &ClusterEvent::UpgradeStarted));
    }

    #[test]
    fn test_shutdown_guard() {
        let sm = ClusterStateMachine::new();
        let result = sm.transition(
            &ClusterState::ShuttingDown,
            ClusterEvent::ShutdownComplete,
            &TransitionContext::new().with_remaining_replicas(2),
        );
        match result {
            TransitionResult::GuardFailed { reason, .. } => {
                assert!(reason.contains("2 replicas"));
            }
            other => panic!("Expected guard failure, got {other:?}"),
        }

        let (_, to) = expect_success(sm.transition(
            &ClusterState::ShuttingDown,
            ClusterEvent::ShutdownComplete,
            &TransitionContext::new(),
        ));
        assert_eq!(to, ClusterState::Shutdown);
    }

    #[test]
    fn test_shutdown_only_from_ready() {
        let sm = ClusterStateMachine::new();
        assert!(sm.can_transition(&ClusterState::Ready, &ClusterEvent::ShutdownRequested));
        assert!(!sm.can_transition(&ClusterState::Upgrading, &ClusterEvent::ShutdownRequested));
        assert!(!sm.can_transition(&ClusterState::Created, &ClusterEvent::ShutdownRequested));
    }

    #[test]
    fn test_resume_from_shutdown() {
        let sm = ClusterStateMachine::new();
        let (_, to) = expect_success(sm.transition(
            &ClusterState::Shutdown,
            ClusterEvent::Resumed,
            &TransitionContext::new(),
        ));
        assert_eq!(to, ClusterState::Initialized);
    }

    #[test]
    fn test_deletion_from_any_state() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new();
        for state in ClusterState::ALL.into_iter().filter(|s| !s.is_teardown()) {
            let (_, to) =
                expect_success(sm.transition(&state, ClusterEvent::DeletionRequested, &ctx));
            assert_eq!(to, ClusterState::Decommissioning, "from {state}");
        }
    }

    #[test]
    fn test_deletion_not_repeated_in_teardown() {
        let sm = ClusterStateMachine::new();
        for state in ClusterState::ALL.into_iter().filter(|s| s.is_teardown()) {
            assert!(!sm.can_transition(&state, &ClusterEvent::DeletionRequested));
        }
    }

    #[test]
    fn test_cleaning_requires_decommissioning() {
        let sm = ClusterStateMachine::new();
        for state in ClusterState::ALL {
            for event in sm.valid_events(&state) {
                if sm.target(&state, event) == Some(ClusterState::CleaningResources) {
                    assert_eq!(state, ClusterState::Decommissioning);
                }
            }
        }
    }

    #[test]
    fn test_host_cleanup_guard() {
        let sm = ClusterStateMachine::new();
        let result = sm.transition(
            &ClusterState::CleaningResources,
            ClusterEvent::HostCleanupRequired,
            &TransitionContext::new().with_wipe_host_state(true),
        );
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));

        let ctx = TransitionContext::new()
            .with_wipe_host_state(true)
            .with_recorded_nodes(2);
        let (_, to) = expect_success(sm.transition(
            &ClusterState::CleaningResources,
            ClusterEvent::HostCleanupRequired,
            &ctx,
        ));
        assert_eq!(to, ClusterState::HostCleanup);
    }

    #[test]
    fn test_finalized_is_terminal() {
        let sm = ClusterStateMachine::new();
        assert!(sm.valid_events(&ClusterState::Finalized).is_empty());
    }

    #[test]
    fn test_invalid_transition() {
        let sm = ClusterStateMachine::new();
        let result = sm.transition(
            &ClusterState::Initialized,
            ClusterEvent::ShutdownComplete,
            &TransitionContext::new(),
        );
        assert!(matches!(
            result,
            TransitionResult::InvalidTransition {
                current: ClusterState::Initialized,
                event: ClusterEvent::ShutdownComplete
            }
        ));
    }

    #[test]
    fn test_determine_event_deletion_priority() {
        let ctx = TransitionContext::new().with_shutdown_requested(true);
        assert_eq!(
            determine_event(&ClusterState::Ready, &ctx, true),
            Some(ClusterEvent::DeletionRequested)
        );
        assert_eq!(
            determine_event(&ClusterState::CleaningResources, &ctx, true),
            None
        );
    }

    #[test]
    fn test_determine_event_shutdown() {
        let requested = TransitionContext::new().with_shutdown_requested(true);
        assert_eq!(
            determine_event(&ClusterState::Ready, &requested, false),
            Some(ClusterEvent::ShutdownRequested)
        );
        assert_eq!(
            determine_event(&ClusterState::ShuttingDown, &requested, false),
            Some(ClusterEvent::ShutdownComplete)
        );
        assert_eq!(
            determine_event(
                &ClusterState::ShuttingDown,
                &requested.clone().with_remaining_replicas(1),
                false
            ),
            None
        );
        assert_eq!(
            determine_event(&ClusterState::Shutdown, &TransitionContext::new(), false),
            Some(ClusterEvent::Resumed)
        );
    }

    #[test]
    fn test_determine_event_cleaning() {
        let ctx = TransitionContext::new()
            .with_wipe_host_state(true)
            .with_recorded_nodes(1);
        assert_eq!(
            determine_event(&ClusterState::CleaningResources, &ctx, false),
            Some(ClusterEvent::HostCleanupRequired)
        );
        assert_eq!(
            determine_event(
                &ClusterState::CleaningResources,
                &TransitionContext::new(),
                false
            ),
            Some(ClusterEvent::ResourcesCleaned)
        );
    }

    #[test]
    fn test_event_display() {
        assert_eq!(ClusterEvent::DeletionRequested.to_string(), "DeletionRequested");
        assert_eq!(ClusterEvent::HostCleanupRequired.to_string(), "HostCleanupRequired");
    }
}

//! Property-based tests for WorkflowService.
//!
//! Random chain shapes are driven through random approval orders and the
//! request is checked after every transition.

use proptest::prelude::*;

use crate::workflow::resolver::StepSpec;
use crate::workflow::service::{ReturnPolicy, Transition, WorkflowService};
use crate::workflow::test_fixtures::{Fixture, actor};
use crate::workflow::timeline::{TimelineEntry, replay};
use crate::workflow::types::{
    Actor, ApprovalStep, RequestStatus, StepStatus, WorkflowRequest,
};

/// Stage sizes: one to four stages of one to three siblings.
fn arb_stages() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=3, 1..=4)
}

fn arb_sequential() -> impl Strategy<Value = Vec<usize>> {
    (1usize..=5).prop_map(|n| vec![1; n])
}

fn arb_status() -> impl Strategy<Value = RequestStatus> {
    prop::sample::select(RequestStatus::ALL.to_vec())
}

#[derive(Debug, Clone, Copy)]
enum Ending {
    Run,
    Reject,
    ReturnAndResubmit,
    Cancel,
}

fn arb_ending() -> impl Strategy<Value = Ending> {
    prop_oneof![
        Just(Ending::Run),
        Just(Ending::Reject),
        Just(Ending::ReturnAndResubmit),
        Just(Ending::Cancel),
    ]
}

/// A request plus the timeline its transitions produced.
struct Run {
    fx: Fixture,
    request: WorkflowRequest,
    entries: Vec<TimelineEntry>,
}

impl Run {
    fn start(stages: &[usize]) -> Self {
        let mut specs = Vec::new();
        for (order, &size) in stages.iter().enumerate() {
            let order = u32::try_from(order).unwrap();
            for k in 0..size {
                let spec = StepSpec::role(order, format!("approver-{order}-{k}"));
                specs.push(if size > 1 { spec.parallel() } else { spec });
            }
        }
        let fx = Fixture::with_specs(specs);
        let created = fx.create();
        let mut run = Self {
            request: created.request.clone(),
            fx,
            entries: Vec::new(),
        };
        run.record(created);
        run
    }

    fn record(&mut self, transition: Transition) {
        let mut entry = transition.entry;
        entry.sequence = i64::try_from(self.entries.len()).unwrap() + 1;
        self.entries.push(entry);
        self.request = transition.request;
    }

    fn holder(step: &ApprovalStep) -> Actor {
        actor("Approver", &[step.approver_role.as_deref().unwrap()])
    }

    /// Picks an active step of the current stage.
    fn pick(&self, n: usize) -> ApprovalStep {
        let active: Vec<_> = self.request.active_steps().cloned().collect();
        active[n % active.len()].clone()
    }

    fn approve(&mut self, n: usize) {
        let step = self.pick(n);
        let t = WorkflowService::approve(
            self.request.clone(),
            step.id,
            &Self::holder(&step),
            None,
            self.fx.now,
        )
        .unwrap();
        self.record(t);
    }

    fn stage_counts(&self) -> (usize, usize) {
        let stage: Vec<_> = self.request.stage(self.request.current_step).collect();
        let approved = stage
            .iter()
            .filter(|s| s.status == StepStatus::Approved)
            .count();
        (approved, stage.len())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Approving every step in any order ends Approved, and the request is
    /// coherent after every intermediate transition.
    #[test]
    fn prop_any_approval_order_completes_the_chain(
        stages in arb_stages(),
        picks in prop::collection::vec(any::<usize>(), 12),
    ) {
        let mut run = Run::start(&stages);
        let total: usize = stages.iter().sum();

        for pick in picks.iter().take(total) {
            prop_assert!(run.request.status.is_actionable());
            run.approve(*pick);

            let status = run.request.status;
            prop_assert!(RequestStatus::ALL.contains(&status));

            let current = run.request.current_step;
            for step in &run.request.steps {
                if step.order < current {
                    prop_assert_eq!(step.status, StepStatus::Approved);
                } else if step.order > current {
                    prop_assert_eq!(step.status, StepStatus::Waiting);
                }
            }

            let (approved, size) = run.stage_counts();
            prop_assert_eq!(
                status == RequestStatus::PartiallyApproved,
                approved >= 1 && approved < size
            );
        }

        prop_assert_eq!(run.request.status, RequestStatus::Approved);
        prop_assert!(run.request.steps.iter().all(|s| s.status == StepStatus::Approved));
    }

    /// A sequential chain never has more than one step pending.
    #[test]
    fn prop_sequential_chain_has_one_pending_step(
        stages in arb_sequential(),
        approvals in 0usize..5,
    ) {
        let mut run = Run::start(&stages);
        let pending = |r: &WorkflowRequest| {
            r.steps.iter().filter(|s| s.status == StepStatus::Pending).count()
        };
        prop_assert_eq!(pending(&run.request), 1);

        for _ in 0..approvals.min(stages.len()) {
            run.approve(0);
            prop_assert!(pending(&run.request) <= 1);
            prop_assert_ne!(run.request.status, RequestStatus::PartiallyApproved);
        }
    }

    /// A rejection anywhere closes the request and leaves no open step.
    #[test]
    fn prop_rejection_short_circuits(
        stages in arb_stages(),
        before in 0usize..6,
        picks in prop::collection::vec(any::<usize>(), 6),
        target in any::<usize>(),
    ) {
        let mut run = Run::start(&stages);
        let total: usize = stages.iter().sum();
        for pick in picks.iter().take(before.min(total - 1)) {
            run.approve(*pick);
        }

        let step = run.pick(target);
        let approved_before = run
            .request
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Approved)
            .count();
        let t = WorkflowService::reject(
            run.request.clone(),
            step.id,
            &Run::holder(&step),
            Some("over budget".to_string()),
            run.fx.now,
        )
        .unwrap();
        run.record(t);

        let request = &run.request;
        prop_assert_eq!(request.status, RequestStatus::Rejected);
        prop_assert!(request.steps.iter().all(|s| !s.status.is_open()));
        prop_assert_eq!(
            request.steps.iter().filter(|s| s.status == StepStatus::Rejected).count(),
            1
        );
        prop_assert_eq!(
            request.steps.iter().filter(|s| s.status == StepStatus::Approved).count(),
            approved_before
        );

        for step in &request.steps {
            let again = WorkflowService::approve(
                request.clone(),
                step.id,
                &Run::holder(step),
                None,
                run.fx.now,
            );
            prop_assert!(again.is_err());
        }
    }

    /// Replaying the produced timeline reproduces the final status.
    #[test]
    fn prop_timeline_replay_matches_status(
        stages in arb_stages(),
        before in 0usize..6,
        picks in prop::collection::vec(any::<usize>(), 6),
        ending in arb_ending(),
        resume in any::<bool>(),
    ) {
        let mut run = Run::start(&stages);
        let total: usize = stages.iter().sum();
        for pick in picks.iter().take(before.min(total - 1)) {
            run.approve(*pick);
        }

        let now = run.fx.now;
        let step = run.pick(0);
        match ending {
            Ending::Run => {}
            Ending::Reject => {
                let t = WorkflowService::reject(
                    run.request.clone(), step.id, &Run::holder(&step), Some("no".into()), now,
                ).unwrap();
                run.record(t);
            }
            Ending::ReturnAndResubmit => {
                let policy = if resume { ReturnPolicy::Resume } else { ReturnPolicy::Restart };
                let t = WorkflowService::return_for_correction(
                    run.request.clone(), step.id, &Run::holder(&step),
                    Some("fix the dates".into()), policy, now,
                ).unwrap();
                run.record(t);
                prop_assert_eq!(replay(&run.entries).unwrap(), RequestStatus::Returned);

                let requester = run.fx.requester.clone();
                let t = WorkflowService::resubmit(run.request.clone(), &requester, None, now)
                    .unwrap();
                run.record(t);
            }
            Ending::Cancel => {
                let requester = run.fx.requester.clone();
                let t = WorkflowService::cancel(run.request.clone(), &requester, &[], now)
                    .unwrap();
                run.record(t);
            }
        }

        prop_assert_eq!(replay(&run.entries).unwrap(), run.request.status);
    }

    /// Terminal statuses have no outgoing edges.
    #[test]
    fn prop_terminal_statuses_are_final(from in arb_status(), to in arb_status()) {
        if from.is_terminal() {
            prop_assert!(!WorkflowService::is_valid_transition(from, to));
        }
    }
}

mod edge_case_tests {
    use super::*;

    #[test]
    fn test_single_step_chain_goes_straight_to_approved() {
        let mut run = Run::start(&[1]);
        run.approve(0);
        assert_eq!(run.request.status, RequestStatus::Approved);
        assert_eq!(run.entries.len(), 2);
    }

    #[test]
    fn test_approved_only_moves_to_completed() {
        for to in RequestStatus::ALL {
            assert_eq!(
                WorkflowService::is_valid_transition(RequestStatus::Approved, *to),
                *to == RequestStatus::Completed
            );
        }
    }

    #[test]
    fn test_restart_after_partial_group_resets_siblings() {
        let mut run = Run::start(&[2]);
        run.approve(0);
        assert_eq!(run.request.status, RequestStatus::PartiallyApproved);

        let step = run.pick(0);
        let t = WorkflowService::return_for_correction(
            run.request.clone(),
            step.id,
            &Run::holder(&step),
            Some("attach receipts".into()),
            ReturnPolicy::Restart,
            run.fx.now,
        )
        .unwrap();
        assert!(t.request.steps.iter().all(|s| s.status == StepStatus::Waiting));
    }
}

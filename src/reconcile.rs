//! Merges fresh requirements and progress signals into the prior plan.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::plan::{ImplementationPlan, ImplementationStep, ProgressSignal, Requirement, StepKey};

/// Output of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// The updated plan.
    pub plan: ImplementationPlan,
    /// Steps that flipped to done in this reconciliation, in plan order.
    pub completed: Vec<ImplementationStep>,
    /// Open steps after reconciliation, in plan order.
    pub pending: Vec<ImplementationStep>,
}

/// Stateless plan reconciler.
#[derive(Debug, Clone, Default)]
pub struct PlanReconciler;

impl PlanReconciler {
    /// Creates a reconciler.
    pub fn new() -> Self {
        Self
    }

    /// Builds the next plan from `prior`, the latest requirements and signals.
    ///
    /// Steps are ordered by the fresh requirements; steps whose requirement
    /// disappeared are kept as stale after the fresh steps of their category.
    /// Only open steps react to signals, so done never reverts to pending.
    pub fn reconcile(
        &self,
        prior: &ImplementationPlan,
        fresh: &[Requirement],
        signals: &[ProgressSignal],
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        let prior_steps: HashMap<StepKey, &ImplementationStep> =
            prior.steps().map(|s| (s.key(), s)).collect();

        let mut plan = ImplementationPlan::new();
        let mut placed: HashSet<StepKey> = HashSet::new();
        let mut created = 0usize;

        for requirement in fresh {
            let key = requirement.key();
            if !placed.insert(key.clone()) {
                continue;
            }
            let step = match prior_steps.get(&key) {
                Some(existing) => {
                    let mut step = (*existing).clone();
                    step.stale = false;
                    step
                }
                None => {
                    created += 1;
                    ImplementationStep::new(requirement, now)
                }
            };
            plan.push_step(step);
        }

        let mut staled = 0usize;
        for step in prior.steps() {
            let key = step.key();
            if placed.insert(key) {
                let mut step = step.clone();
                if !step.stale {
                    staled += 1;
                }
                step.stale = true;
                plan.push_step(step);
            }
        }

        let mut completed_keys: HashSet<StepKey> = HashSet::new();
        for signal in signals {
            match plan.find_mut(&signal.step) {
                Some(step) if step.is_open() => {
                    step.mark_done(now);
                    completed_keys.insert(signal.step.clone());
                    tracing::info!(step = %signal.step, evidence = %signal.evidence, "step completed");
                }
                Some(_) => {
                    tracing::debug!(step = %signal.step, "ignoring signal for closed step");
                }
                None => {
                    tracing::debug!(step = %signal.step, "ignoring signal for unknown step");
                }
            }
        }

        plan.generated_at = Some(now);

        let completed = plan
            .steps()
            .filter(|s| completed_keys.contains(&s.key()))
            .cloned()
            .collect();
        let pending = plan.open_steps().into_iter().cloned().collect();

        tracing::info!(
            steps = plan.step_count(),
            created,
            staled,
            completed = completed_keys.len(),
            "reconciled plan"
        );

        ReconcileOutcome {
            plan,
            completed,
            pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepStatus;
    use chrono::TimeZone;

    const CATEGORY: &str = "Functional Implementation";

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, h, 0, 0).unwrap()
    }

    fn reqs(items: &[(&str, &str)]) -> Vec<Requirement> {
        items
            .iter()
            .enumerate()
            .map(|(i, (c, t))| Requirement::new(*c, *t, i))
            .collect()
    }

    fn signal(category: &str, text: &str) -> ProgressSignal {
        ProgressSignal::new(StepKey::new(category, text), "commit abc: test")
    }

    fn texts(plan: &ImplementationPlan) -> Vec<&str> {
        plan.steps().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn login_logout_example_reaches_full_completion() {
        let reconciler = PlanReconciler::new();
        let fresh = reqs(&[(CATEGORY, "Implement login"), (CATEGORY, "Implement logout")]);

        let first = reconciler.reconcile(&ImplementationPlan::new(), &fresh[..1], &[], ts(8));
        let mut prior = first.plan;
        prior.find_mut(&StepKey::new(CATEGORY, "Implement login")).unwrap().mark_done(ts(8));

        let outcome = reconciler.reconcile(
            &prior,
            &fresh,
            &[signal(CATEGORY, "Implement logout")],
            ts(9),
        );

        assert!(outcome.plan.steps().all(|s| s.status == StepStatus::Done));
        assert_eq!(outcome.plan.progress().percent(), 100);
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].text, "Implement logout");
        assert_eq!(outcome.completed[0].completed_at, Some(ts(9)));
        assert!(outcome.pending.is_empty());
    }

    #[test]
    fn new_requirements_become_pending_steps() {
        let fresh = reqs(&[(CATEGORY, "Implement login"), ("Architecture", "Layered services")]);
        let outcome = PlanReconciler::new().reconcile(&ImplementationPlan::new(), &fresh, &[], ts(8));

        assert_eq!(texts(&outcome.plan), vec!["Implement login", "Layered services"]);
        assert!(outcome.plan.steps().all(|s| s.first_seen == ts(8)));
        assert_eq!(outcome.pending.len(), 2);
        assert_eq!(outcome.plan.generated_at, Some(ts(8)));
    }

    #[test]
    fn reconcile_is_idempotent_without_signals() {
        let reconciler = PlanReconciler::new();
        let fresh = reqs(&[
            (CATEGORY, "Implement login"),
            (CATEGORY, "Implement logout"),
            ("Architecture", "Layered services"),
        ]);
        let seeded = reconciler.reconcile(
            &ImplementationPlan::new(),
            &fresh,
            &[signal(CATEGORY, "Implement login")],
            ts(8),
        );
        // Drop one requirement so the plan carries a stale step too.
        let with_stale = reconciler.reconcile(&seeded.plan, &fresh[..2], &[], ts(9)).plan;

        let again = reconciler.reconcile(&with_stale, &fresh[..2], &[], ts(10));

        assert_eq!(again.plan.content(), with_stale.content());
        assert!(again.completed.is_empty());
    }

    #[test]
    fn done_steps_never_revert() {
        let reconciler = PlanReconciler::new();
        let fresh = reqs(&[(CATEGORY, "Implement login")]);
        let done = reconciler
            .reconcile(&ImplementationPlan::new(), &fresh, &[signal(CATEGORY, "Implement login")], ts(8))
            .plan;

        // Removed, then restored, then signalled again.
        let removed = reconciler.reconcile(&done, &[], &[], ts(9)).plan;
        let restored = reconciler.reconcile(&removed, &fresh, &[signal(CATEGORY, "Implement login")], ts(10));

        let step = restored.plan.find(&StepKey::new(CATEGORY, "Implement login")).unwrap();
        assert_eq!(step.status, StepStatus::Done);
        assert_eq!(step.completed_at, Some(ts(8)));
        assert!(!step.stale);
        assert!(restored.completed.is_empty());
    }

    #[test]
    fn removed_requirements_are_kept_as_stale() {
        let reconciler = PlanReconciler::new();
        let fresh = reqs(&[
            (CATEGORY, "Implement login"),
            (CATEGORY, "Implement logout"),
            ("Architecture", "Layered services"),
        ]);
        let prior = reconciler.reconcile(&ImplementationPlan::new(), &fresh, &[], ts(8)).plan;

        let outcome = reconciler.reconcile(&prior, &fresh[1..2], &[], ts(9));

        assert_eq!(
            texts(&outcome.plan),
            vec!["Implement logout", "Implement login", "Layered services"]
        );
        let stale: Vec<_> = outcome.plan.steps().filter(|s| s.stale).map(|s| s.text.as_str()).collect();
        assert_eq!(stale, vec!["Implement login", "Layered services"]);
        assert_eq!(outcome.pending.len(), 1);
        assert_eq!(outcome.plan.progress().stale, 2);
    }

    #[test]
    fn zero_requirements_keep_every_prior_step_stale() {
        let reconciler = PlanReconciler::new();
        let fresh = reqs(&[(CATEGORY, "Implement login"), ("Architecture", "Layered services")]);
        let prior = reconciler.reconcile(&ImplementationPlan::new(), &fresh, &[], ts(8)).plan;

        let outcome = reconciler.reconcile(&prior, &[], &[], ts(9));

        assert_eq!(outcome.plan.step_count(), prior.step_count());
        assert!(outcome.plan.steps().all(|s| s.stale));
        assert!(outcome.pending.is_empty());
        assert_eq!(outcome.plan.progress().percent(), 0);
    }

    #[test]
    fn signals_for_stale_or_unknown_steps_are_ignored() {
        let reconciler = PlanReconciler::new();
        let fresh = reqs(&[(CATEGORY, "Implement login"), (CATEGORY, "Implement logout")]);
        let prior = reconciler.reconcile(&ImplementationPlan::new(), &fresh, &[], ts(8)).plan;

        let outcome = reconciler.reconcile(
            &prior,
            &fresh[..1],
            &[signal(CATEGORY, "Implement logout"), signal(CATEGORY, "Implement search")],
            ts(9),
        );

        assert!(outcome.completed.is_empty());
        let logout = outcome.plan.find(&StepKey::new(CATEGORY, "Implement logout")).unwrap();
        assert_eq!(logout.status, StepStatus::Pending);
        assert!(logout.stale);
    }

    #[test]
    fn repeated_signals_complete_a_step_once() {
        let fresh = reqs(&[(CATEGORY, "Implement login")]);
        let outcome = PlanReconciler::new().reconcile(
            &ImplementationPlan::new(),
            &fresh,
            &[signal(CATEGORY, "implement LOGIN"), signal(CATEGORY, "Implement login")],
            ts(8),
        );

        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.plan.progress().done, 1);
    }
}

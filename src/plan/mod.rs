//! Implementation plan model and its markdown persistence.

mod model;
mod step;
mod store;

pub use model::{CategorySection, ImplementationPlan, ProgressSummary};
pub use step::{
    normalize_key, ImplementationStep, ProgressSignal, Requirement, StepKey, StepStatus,
};
pub use store::{parse_plan, render_plan, PlanStore, PLAN_TITLE};

pub mod controller;
pub mod pod;
pub mod templates;

pub use controller::{plan_run, reconcile_run, RunPlan, WorkspaceLookup};

pub mod controller;
pub mod queue;
pub mod resources;

pub use controller::{next_status, reconcile_workspace};
pub use queue::recompute_queue;

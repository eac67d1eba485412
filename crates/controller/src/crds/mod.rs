pub mod condition;
pub mod run;
pub mod workspace;

pub use condition::Condition;
pub use run::*;
pub use workspace::*;

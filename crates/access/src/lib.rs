//! Access evaluator, accessible-set builder, grant/revoke manager, accessor
//! report, and audit sink.

pub mod audit;
pub mod evaluator;
pub mod filter;
pub mod manager;
pub mod records;
pub mod reporter;

pub use evaluator::{can_access, evaluate, Decision, RecordFacts};
pub use filter::accessible_filter;
pub use manager::AccessControl;
pub use reporter::AccessorReport;

pub mod generator;
pub mod guard;
pub mod registry;

pub use generator::{generate, uncovered_periods};
pub use guard::{
    ensure_invoice_period_fields, validate_batch_assembly, validate_before_create,
    BatchValidationReport, LineConflict, MandateIssue,
};
pub use registry::{check, classify, is_membership, OverlapReport};

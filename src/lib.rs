pub mod calendar;
pub mod config;
pub mod context;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod idempotency;
pub mod payment;
pub mod period;
pub mod recon;
pub mod store;
pub mod types;

// re-export key types
pub use config::{GuardMode, ReconConfig};
pub use context::Context;
pub use decimal::Money;
pub use errors::{ReconError, Result};
pub use events::{Event, EventStore};
pub use idempotency::{idempotency_key, run_idempotent, sha256_hex, IdempotencyRecord, LockService};
pub use payment::{post, post_reversal, process, PostContext, ReturnFileReport};
pub use period::{
    check, classify, ensure_invoice_period_fields, generate, is_membership, uncovered_periods,
    validate_batch_assembly, validate_before_create, BatchValidationReport, OverlapReport,
};
pub use recon::{find, Coordinator, MatchCandidate, ReconcileOutcome};
pub use store::{
    BankTransactionStore, BatchStore, IdempotencyStore, InvoiceStore, MandateStore, MemoryStore,
    PaymentStore, ReturnStore,
};
pub use types::{
    BankTransaction, BankTransactionId, BatchId, BatchKind, BatchLine, BatchStatus, BillingFrequency,
    BillingPeriod, CustomerId, Invoice, InvoiceId, InvoiceStatus, ItemKind, MandateId,
    MandatePurpose, MandateStatus, MatchKind, MemberId, OverlapRelation, Payment,
    PaymentAllocation, PaymentId,
    PaymentKind, PaymentStatus, PeriodConflict, ReconcileMode, ReturnRecord, SepaBatch, SepaMandate,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;

use chrono::NaiveDate;
use thiserror::Error;

use crate::decimal::Money;
use crate::types::{
    BankTransactionId, BatchId, InvoiceId, MandateId, MemberId, PaymentId, PeriodConflict,
};

#[derive(Error, Debug)]
pub enum ReconError {
    // input errors
    #[error("invalid interval: start {start} is after end {end}")]
    InvalidInterval { start: NaiveDate, end: NaiveDate },

    #[error("unknown billing frequency: {value}")]
    UnknownFrequency { value: String },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount { amount: Money },

    // business-rule violations
    #[error("member {member_id} already invoiced for an overlapping period (conflicting invoice {})",
        .conflicts.first().map(|c| c.invoice_id.as_str()).unwrap_or("?"))]
    PeriodDuplicate {
        member_id: MemberId,
        conflicts: Vec<PeriodConflict>,
    },

    #[error("batch {batch_id} has period conflicts on {} line(s)", .conflicting_invoices.len())]
    BatchHasPeriodConflicts {
        batch_id: BatchId,
        conflicting_invoices: Vec<InvoiceId>,
        conflicts: Vec<PeriodConflict>,
    },

    // duplicate-prevention errors: never swallowed, never retried silently
    #[error("invoice {invoice_id} is already fully paid ({paid} of {grand_total})")]
    AlreadyFullyPaid {
        invoice_id: InvoiceId,
        paid: Money,
        grand_total: Money,
    },

    #[error("posting {attempted} to invoice {invoice_id} would overpay: {already} already allocated of {grand_total}")]
    WouldOverpay {
        invoice_id: InvoiceId,
        already: Money,
        attempted: Money,
        grand_total: Money,
    },

    #[error("payment {payment_id} was already reversed by {reversal_id}")]
    AlreadyReversed {
        payment_id: PaymentId,
        reversal_id: PaymentId,
    },

    #[error("original payment not found: {payment_id}")]
    OriginalNotFound { payment_id: PaymentId },

    #[error("payment {payment_id} superseded by fresh payment {newer_payment_id} on invoice {invoice_id}")]
    ReversalSupersededByFreshPayment {
        payment_id: PaymentId,
        newer_payment_id: PaymentId,
        invoice_id: InvoiceId,
    },

    #[error("payment for transaction {bank_transaction_id:?} / batch {batch_id:?} already exists")]
    DuplicatePayment {
        bank_transaction_id: Option<BankTransactionId>,
        batch_id: Option<BatchId>,
    },

    // idempotency trigger; a notice, not an alarm
    #[error("return file {file_hash} already processed")]
    ReturnFileAlreadyProcessed { file_hash: String },

    // routed to human review
    #[error("ambiguous match for transaction {bank_transaction_id}: {candidates:?}")]
    AmbiguousMatch {
        bank_transaction_id: BankTransactionId,
        candidates: Vec<Vec<BatchId>>,
    },

    #[error("match search space too large for transaction {bank_transaction_id}: {size} exceeds {limit}")]
    SearchSpaceTooLarge {
        bank_transaction_id: BankTransactionId,
        size: usize,
        limit: usize,
    },

    // transient; caller may retry after backoff
    #[error("resource busy: {resource}")]
    BusyRetryLater { resource: String },

    // store contract errors
    #[error("invoice not found: {invoice_id}")]
    InvoiceNotFound { invoice_id: InvoiceId },

    #[error("batch not found: {batch_id}")]
    BatchNotFound { batch_id: BatchId },

    #[error("bank transaction not found: {bank_transaction_id}")]
    TransactionNotFound {
        bank_transaction_id: BankTransactionId,
    },

    #[error("mandate not found: {mandate_id}")]
    MandateNotFound { mandate_id: MandateId },

    #[error("batch {batch_id} is inconsistent: declared total {declared_total}, line total {line_total}")]
    BatchInconsistent {
        batch_id: BatchId,
        declared_total: Money,
        line_total: Money,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("return file parse error: {message}")]
    ReturnFileParse { message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl ReconError {
    /// errors that guard against double-posting; operators must inspect
    /// the conflicting record instead of retrying
    pub fn is_duplicate_prevention(&self) -> bool {
        matches!(
            self,
            ReconError::AlreadyFullyPaid { .. }
                | ReconError::WouldOverpay { .. }
                | ReconError::AlreadyReversed { .. }
                | ReconError::OriginalNotFound { .. }
                | ReconError::ReversalSupersededByFreshPayment { .. }
                | ReconError::DuplicatePayment { .. }
        )
    }

    /// transient errors worth retrying after backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconError::BusyRetryLater { .. })
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;

pub mod memory;

use chrono::NaiveDate;

use crate::decimal::Money;
use crate::errors::Result;
use crate::idempotency::IdempotencyRecord;
use crate::types::{
    BankTransaction, BankTransactionId, BatchId, BatchStatus, Invoice, InvoiceId, InvoiceStatus,
    MandateId, MemberId, Payment, PaymentId, PaymentStatus, ReturnRecord, SepaBatch, SepaMandate,
};

pub use memory::MemoryStore;

/// invoice persistence contract
///
/// The invoice store is owned by the surrounding platform; the core reads
/// and writes only through these methods.
pub trait InvoiceStore {
    fn get(&self, id: &InvoiceId) -> Result<Invoice>;
    fn for_member(&self, member_id: &MemberId) -> Result<Vec<Invoice>>;
    fn insert(&self, invoice: Invoice) -> Result<()>;
    fn update_period(&self, id: &InvoiceId, start: NaiveDate, end: NaiveDate) -> Result<()>;
    fn update_outstanding(
        &self,
        id: &InvoiceId,
        outstanding: Money,
        status: InvoiceStatus,
    ) -> Result<()>;
}

/// SEPA batch persistence contract
pub trait BatchStore {
    fn get(&self, id: &BatchId) -> Result<SepaBatch>;
    /// batches with batch_date in [from, to] and one of the given statuses
    fn in_window(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        statuses: &[BatchStatus],
    ) -> Result<Vec<SepaBatch>>;
    fn insert(&self, batch: SepaBatch) -> Result<()>;
    fn set_status(&self, id: &BatchId, status: BatchStatus) -> Result<()>;
}

/// payment persistence contract
///
/// `insert` enforces the uniqueness of (bank_transaction_id, batch_id, kind)
/// among non-cancelled payments; that constraint, not the lock service, is
/// the hard guarantee against double-posting.
pub trait PaymentStore {
    fn insert(&self, payment: Payment) -> Result<()>;
    fn find(&self, id: &PaymentId) -> Result<Option<Payment>>;
    fn set_status(&self, id: &PaymentId, status: PaymentStatus) -> Result<()>;
    /// all payments with an allocation referencing the invoice
    fn for_invoice(&self, invoice_id: &InvoiceId) -> Result<Vec<Payment>>;
    /// the non-cancelled refund reversing the given payment, if any
    fn reversal_of(&self, original: &PaymentId) -> Result<Option<Payment>>;
}

/// mandate lookup contract (read-only for the core)
pub trait MandateStore {
    fn get(&self, id: &MandateId) -> Result<SepaMandate>;
    fn active_for_member(&self, member_id: &MemberId) -> Result<Option<SepaMandate>>;
    fn insert(&self, mandate: SepaMandate) -> Result<()>;
}

/// bank transaction source contract; idempotent re-delivery is expected
pub trait BankTransactionStore {
    fn get(&self, id: &BankTransactionId) -> Result<BankTransaction>;
    fn insert(&self, transaction: BankTransaction) -> Result<()>;
    fn mark_matched(&self, id: &BankTransactionId, batch_ids: &[BatchId]) -> Result<()>;
    /// transactions with no matched batches, ascending (date, id)
    fn unmatched(&self) -> Result<Vec<BankTransaction>>;
}

/// return-record persistence contract
pub trait ReturnStore {
    fn file_processed(&self, hash: &str) -> Result<bool>;
    fn insert(&self, record: ReturnRecord) -> Result<()>;
    fn for_file(&self, hash: &str) -> Result<Vec<ReturnRecord>>;
}

/// idempotency-record persistence contract; one writer per key
pub trait IdempotencyStore {
    fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;
    fn put(&self, record: IdempotencyRecord) -> Result<()>;
}

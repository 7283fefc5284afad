use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    BankTransactionId, BatchId, InvoiceId, MatchKind, MemberId, OverlapRelation, PaymentId,
};

/// all events emitted by the reconciliation core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // invoicing guard events
    InvoicePeriodBackfilled {
        invoice_id: InvoiceId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    },
    PeriodConflictFlagged {
        member_id: MemberId,
        conflicting_invoice_id: InvoiceId,
        relation: OverlapRelation,
        period_start: NaiveDate,
        period_end: NaiveDate,
    },
    BatchValidated {
        batch_id: BatchId,
        conflict_count: usize,
        mandate_issue_count: usize,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentPosted {
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        amount: Money,
        bank_transaction_id: Option<BankTransactionId>,
        batch_id: Option<BatchId>,
        timestamp: DateTime<Utc>,
    },
    InvoiceSettled {
        invoice_id: InvoiceId,
        timestamp: DateTime<Utc>,
    },
    PaymentReversed {
        reversal_payment_id: PaymentId,
        original_payment_id: PaymentId,
        invoice_id: InvoiceId,
        amount: Money,
        reason_code: String,
        timestamp: DateTime<Utc>,
    },

    // reconciliation events
    BatchMatched {
        bank_transaction_id: BankTransactionId,
        batch_ids: Vec<BatchId>,
        kind: MatchKind,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },
    ReconciliationCompleted {
        bank_transaction_id: BankTransactionId,
        payments_posted: usize,
        applied: bool,
        timestamp: DateTime<Utc>,
    },
    ReconciliationDeferred {
        bank_transaction_id: BankTransactionId,
        candidate_count: usize,
        timestamp: DateTime<Utc>,
    },

    // return-file events
    ReturnFileProcessed {
        file_hash: String,
        reversed: usize,
        skipped: usize,
        unmatched: usize,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

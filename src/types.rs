use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::ReconError;

/// opaque platform identifiers for externally owned records
pub type MemberId = String;
pub type InvoiceId = String;
pub type CustomerId = String;
pub type BatchId = String;
pub type MandateId = String;
pub type BankTransactionId = String;

/// identifiers for records this crate creates
pub type PaymentId = Uuid;
pub type ReturnRecordId = Uuid;

/// invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Draft,
    Submitted,
    Paid,
    Unpaid,
    Overdue,
    Cancelled,
}

/// what an invoice bills for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Membership,
    Other,
}

/// invoice as read from / written to the invoice store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub member_id: MemberId,
    pub customer_id: CustomerId,
    pub posting_date: NaiveDate,
    pub grand_total: Money,
    pub outstanding: Money,
    pub status: InvoiceStatus,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub item_kind: ItemKind,
    pub description: String,
    pub subscription_id: Option<String>,
}

impl Invoice {
    /// invoice period from explicit fields, falling back to the calendar
    /// month enclosing the posting date
    pub fn period(&self) -> (NaiveDate, NaiveDate) {
        match (self.period_start, self.period_end) {
            (Some(s), Some(e)) => (s, e),
            _ => crate::calendar::enclosing_month(self.posting_date),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == InvoiceStatus::Cancelled
    }
}

/// mandate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MandateStatus {
    Active,
    Revoked,
}

/// standing direct-debit authorisation from a member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SepaMandate {
    pub id: MandateId,
    pub member_id: MemberId,
    pub iban: String,
    pub status: MandateStatus,
    pub purpose: MandatePurpose,
}

/// which collections a mandate covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandatePurpose {
    pub memberships: bool,
    pub donations: bool,
}

/// batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Draft,
    Submitted,
    Processed,
    Cancelled,
}

/// first-ever vs recurring collection marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchKind {
    Frst,
    Rcur,
}

/// one direct-debit instruction inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchLine {
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub mandate_id: MandateId,
}

/// a bundle of direct-debit instructions submitted to the bank as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SepaBatch {
    pub id: BatchId,
    pub batch_date: NaiveDate,
    pub total_amount: Money,
    pub entry_count: usize,
    pub status: BatchStatus,
    pub kind: BatchKind,
    pub lines: Vec<BatchLine>,
}

impl SepaBatch {
    pub fn line_total(&self) -> Money {
        self.lines.iter().map(|l| l.amount).sum()
    }

    /// check the stored total and entry count against the lines
    pub fn validate(&self) -> Result<(), ReconError> {
        if self.line_total() != self.total_amount || self.entry_count != self.lines.len() {
            return Err(ReconError::BatchInconsistent {
                batch_id: self.id.clone(),
                declared_total: self.total_amount,
                line_total: self.line_total(),
            });
        }
        Ok(())
    }
}

/// incoming bank transaction to reconcile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: BankTransactionId,
    pub date: NaiveDate,
    pub description: String,
    pub deposit: Money,
    pub bank_account: String,
    pub matched_batch_ids: BTreeSet<BatchId>,
}

/// direction of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentKind {
    Receive,
    Refund,
}

/// payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Draft,
    Submitted,
    Cancelled,
}

/// allocation of a payment amount to one invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub invoice_id: InvoiceId,
    pub allocated_amount: Money,
}

/// payment record created by the poster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub kind: PaymentKind,
    pub amount: Money,
    pub posting_date: NaiveDate,
    pub bank_transaction_id: Option<BankTransactionId>,
    pub allocations: Vec<PaymentAllocation>,
    pub batch_id: Option<BatchId>,
    pub idempotency_key: Option<String>,
    pub status: PaymentStatus,
    /// for refunds, the receive payment this reverses
    pub reverses: Option<PaymentId>,
}

impl Payment {
    pub fn allocated_total(&self) -> Money {
        self.allocations.iter().map(|a| a.allocated_amount).sum()
    }

    pub fn allocated_to(&self, invoice_id: &InvoiceId) -> Money {
        self.allocations
            .iter()
            .filter(|a| &a.invoice_id == invoice_id)
            .map(|a| a.allocated_amount)
            .sum()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == PaymentStatus::Cancelled
    }
}

/// one reversed row of a processed return file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub id: ReturnRecordId,
    pub return_file_hash: String,
    pub member_id: MemberId,
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub reason_code: String,
    pub reversal_payment_id: PaymentId,
}

/// billing frequency of a membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingFrequency {
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingFrequency {
    /// length of one period in months
    pub fn step_months(&self) -> u32 {
        match self {
            BillingFrequency::Monthly => 1,
            BillingFrequency::Quarterly => 3,
            BillingFrequency::Yearly => 12,
        }
    }
}

impl FromStr for BillingFrequency {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monthly" => Ok(BillingFrequency::Monthly),
            "quarterly" => Ok(BillingFrequency::Quarterly),
            "yearly" | "annually" => Ok(BillingFrequency::Yearly),
            other => Err(ReconError::UnknownFrequency {
                value: other.to_string(),
            }),
        }
    }
}

/// derived billing period, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub member_id: MemberId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub frequency: BillingFrequency,
}

/// how a candidate period relates to an existing invoice period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapRelation {
    /// identical intervals
    Exact,
    /// candidate lies inside the existing period
    Contained,
    /// candidate encloses the existing period
    Contains,
    /// candidate starts first, overlaps the start of the existing period
    PartialEnd,
    /// candidate starts inside the existing period and runs past its end
    PartialStart,
    /// intervals do not overlap
    None,
}

impl OverlapRelation {
    /// relation seen from the other interval's point of view
    pub fn inverse(&self) -> OverlapRelation {
        match self {
            OverlapRelation::Contained => OverlapRelation::Contains,
            OverlapRelation::Contains => OverlapRelation::Contained,
            OverlapRelation::PartialEnd => OverlapRelation::PartialStart,
            OverlapRelation::PartialStart => OverlapRelation::PartialEnd,
            other => *other,
        }
    }
}

/// one conflicting membership invoice found by the period registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodConflict {
    pub invoice_id: InvoiceId,
    /// relation of the existing invoice's period to the candidate interval
    pub relation: OverlapRelation,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

/// how the coordinator treats non-exact match candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileMode {
    /// auto-apply only exact, same-day matches; everything else goes to review
    Conservative,
    /// apply the unique top candidate regardless of kind
    Aggressive,
}

/// shape of a reconciliation match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    /// one batch, full amount
    Exact,
    /// several batches consolidated into one deposit
    Split,
    /// one batch, a subset of its lines collected
    Partial,
}

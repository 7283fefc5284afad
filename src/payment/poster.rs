use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::today;
use crate::context::Context;
use crate::decimal::Money;
use crate::errors::{ReconError, Result};
use crate::events::{Event, EventStore};
use crate::types::{
    BankTransactionId, BatchId, InvoiceId, InvoiceStatus, Payment, PaymentAllocation, PaymentId,
    PaymentKind, PaymentStatus,
};

/// provenance of a posted payment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostContext {
    pub bank_transaction_id: Option<BankTransactionId>,
    pub batch_id: Option<BatchId>,
    pub idempotency_key: Option<String>,
}

/// sum of allocations to the invoice across non-cancelled receive payments
fn allocated_receive_total(ctx: &Context<'_>, invoice_id: &InvoiceId) -> Result<Money> {
    Ok(ctx
        .payments
        .for_invoice(invoice_id)?
        .iter()
        .filter(|p| p.kind == PaymentKind::Receive && !p.is_cancelled())
        .map(|p| p.allocated_to(invoice_id))
        .sum())
}

/// post a receive payment against one invoice
///
/// Two pre-checks guard against double-collection before anything is
/// written: an invoice already covered within tolerance refuses further
/// payments, and an allocation that would push the total past the grand
/// total refuses outright. Partial payments are allowed; the invoice is
/// marked paid only when allocations reach the grand total.
pub fn post(
    ctx: &Context<'_>,
    events: &mut EventStore,
    invoice_id: &InvoiceId,
    amount: Money,
    post_ctx: &PostContext,
) -> Result<Payment> {
    if !amount.is_positive() {
        return Err(ReconError::InvalidPaymentAmount { amount });
    }

    let invoice = ctx.invoices.get(invoice_id)?;
    let tolerance = ctx.config.amount_tolerance;
    let already = allocated_receive_total(ctx, invoice_id)?;

    if already >= invoice.grand_total - tolerance {
        return Err(ReconError::AlreadyFullyPaid {
            invoice_id: invoice_id.clone(),
            paid: already,
            grand_total: invoice.grand_total,
        });
    }
    if already + amount > invoice.grand_total + tolerance {
        return Err(ReconError::WouldOverpay {
            invoice_id: invoice_id.clone(),
            already,
            attempted: amount,
            grand_total: invoice.grand_total,
        });
    }

    let mut payment = Payment {
        id: Uuid::new_v4(),
        kind: PaymentKind::Receive,
        amount,
        posting_date: today(ctx.time),
        bank_transaction_id: post_ctx.bank_transaction_id.clone(),
        allocations: vec![PaymentAllocation {
            invoice_id: invoice_id.clone(),
            allocated_amount: amount,
        }],
        batch_id: post_ctx.batch_id.clone(),
        idempotency_key: post_ctx.idempotency_key.clone(),
        status: PaymentStatus::Draft,
        reverses: None,
    };

    // the store's uniqueness constraint is the hard stop against
    // double-posting the same collection
    ctx.payments.insert(payment.clone())?;
    ctx.payments.set_status(&payment.id, PaymentStatus::Submitted)?;
    payment.status = PaymentStatus::Submitted;

    let outstanding = (invoice.grand_total - already - amount).max(Money::ZERO);
    if outstanding <= tolerance {
        ctx.invoices
            .update_outstanding(invoice_id, Money::ZERO, InvoiceStatus::Paid)?;
        events.emit(Event::InvoiceSettled {
            invoice_id: invoice_id.clone(),
            timestamp: ctx.time.now(),
        });
    } else {
        ctx.invoices
            .update_outstanding(invoice_id, outstanding, invoice.status)?;
    }

    events.emit(Event::PaymentPosted {
        payment_id: payment.id,
        invoice_id: invoice_id.clone(),
        amount,
        bank_transaction_id: post_ctx.bank_transaction_id.clone(),
        batch_id: post_ctx.batch_id.clone(),
        timestamp: ctx.time.now(),
    });

    Ok(payment)
}

/// reverse a previously posted receive payment
///
/// Creates a refund mirroring the original's allocations and reopens the
/// affected invoices. Refuses when the original is missing or cancelled,
/// when a reversal already exists, and when a fresher successful payment
/// covers the same invoice (the member has paid again in the meantime).
pub fn post_reversal(
    ctx: &Context<'_>,
    events: &mut EventStore,
    original_payment_id: &PaymentId,
    reason_code: &str,
) -> Result<Payment> {
    let original = ctx
        .payments
        .find(original_payment_id)?
        .filter(|p| p.kind == PaymentKind::Receive && !p.is_cancelled())
        .ok_or(ReconError::OriginalNotFound {
            payment_id: *original_payment_id,
        })?;

    if let Some(existing) = ctx.payments.reversal_of(original_payment_id)? {
        return Err(ReconError::AlreadyReversed {
            payment_id: *original_payment_id,
            reversal_id: existing.id,
        });
    }

    for allocation in &original.allocations {
        let fresher = ctx
            .payments
            .for_invoice(&allocation.invoice_id)?
            .into_iter()
            .filter(|p| {
                p.kind == PaymentKind::Receive
                    && !p.is_cancelled()
                    && p.id != original.id
                    && p.posting_date > original.posting_date
            })
            .max_by_key(|p| (p.posting_date, p.id));
        if let Some(newer) = fresher {
            return Err(ReconError::ReversalSupersededByFreshPayment {
                payment_id: *original_payment_id,
                newer_payment_id: newer.id,
                invoice_id: allocation.invoice_id.clone(),
            });
        }
    }

    let mut refund = Payment {
        id: Uuid::new_v4(),
        kind: PaymentKind::Refund,
        amount: original.amount,
        posting_date: today(ctx.time),
        bank_transaction_id: original.bank_transaction_id.clone(),
        allocations: original.allocations.clone(),
        batch_id: original.batch_id.clone(),
        idempotency_key: None,
        status: PaymentStatus::Draft,
        reverses: Some(original.id),
    };
    ctx.payments.insert(refund.clone())?;
    ctx.payments.set_status(&refund.id, PaymentStatus::Submitted)?;
    refund.status = PaymentStatus::Submitted;

    for allocation in &original.allocations {
        let invoice = ctx.invoices.get(&allocation.invoice_id)?;
        let reopened = (invoice.outstanding + allocation.allocated_amount)
            .min(invoice.grand_total);
        ctx.invoices
            .update_outstanding(&allocation.invoice_id, reopened, InvoiceStatus::Unpaid)?;

        events.emit(Event::PaymentReversed {
            reversal_payment_id: refund.id,
            original_payment_id: original.id,
            invoice_id: allocation.invoice_id.clone(),
            amount: allocation.allocated_amount,
            reason_code: reason_code.to_string(),
            timestamp: ctx.time.now(),
        });
    }

    Ok(refund)
}

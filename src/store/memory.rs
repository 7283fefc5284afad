use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::decimal::Money;
use crate::errors::{ReconError, Result};
use crate::idempotency::IdempotencyRecord;
use crate::store::{
    BankTransactionStore, BatchStore, IdempotencyStore, InvoiceStore, MandateStore, PaymentStore,
    ReturnStore,
};
use crate::types::{
    BankTransaction, BankTransactionId, BatchId, BatchStatus, Invoice, InvoiceId, InvoiceStatus,
    MandateId, MandateStatus, MemberId, Payment, PaymentId, PaymentStatus, ReturnRecord, SepaBatch,
    SepaMandate,
};

/// in-memory implementation of every store trait
///
/// Backs the test suite and small deployments; each map is independently
/// mutex-guarded so the store can be shared across request workers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    invoices: Mutex<BTreeMap<InvoiceId, Invoice>>,
    batches: Mutex<BTreeMap<BatchId, SepaBatch>>,
    payments: Mutex<BTreeMap<PaymentId, Payment>>,
    mandates: Mutex<BTreeMap<MandateId, SepaMandate>>,
    bank_transactions: Mutex<BTreeMap<BankTransactionId, BankTransaction>>,
    returns: Mutex<Vec<ReturnRecord>>,
    idempotency: Mutex<BTreeMap<String, IdempotencyRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InvoiceStore for MemoryStore {
    fn get(&self, id: &InvoiceId) -> Result<Invoice> {
        guard(&self.invoices)
            .get(id)
            .cloned()
            .ok_or_else(|| ReconError::InvoiceNotFound {
                invoice_id: id.clone(),
            })
    }

    fn for_member(&self, member_id: &MemberId) -> Result<Vec<Invoice>> {
        Ok(guard(&self.invoices)
            .values()
            .filter(|i| &i.member_id == member_id)
            .cloned()
            .collect())
    }

    fn insert(&self, invoice: Invoice) -> Result<()> {
        guard(&self.invoices).insert(invoice.id.clone(), invoice);
        Ok(())
    }

    fn update_period(&self, id: &InvoiceId, start: NaiveDate, end: NaiveDate) -> Result<()> {
        let mut invoices = guard(&self.invoices);
        let invoice = invoices
            .get_mut(id)
            .ok_or_else(|| ReconError::InvoiceNotFound {
                invoice_id: id.clone(),
            })?;
        invoice.period_start = Some(start);
        invoice.period_end = Some(end);
        Ok(())
    }

    fn update_outstanding(
        &self,
        id: &InvoiceId,
        outstanding: Money,
        status: InvoiceStatus,
    ) -> Result<()> {
        let mut invoices = guard(&self.invoices);
        let invoice = invoices
            .get_mut(id)
            .ok_or_else(|| ReconError::InvoiceNotFound {
                invoice_id: id.clone(),
            })?;
        invoice.outstanding = outstanding;
        invoice.status = status;
        Ok(())
    }
}

impl BatchStore for MemoryStore {
    fn get(&self, id: &BatchId) -> Result<SepaBatch> {
        guard(&self.batches)
            .get(id)
            .cloned()
            .ok_or_else(|| ReconError::BatchNotFound {
                batch_id: id.clone(),
            })
    }

    fn in_window(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        statuses: &[BatchStatus],
    ) -> Result<Vec<SepaBatch>> {
        Ok(guard(&self.batches)
            .values()
            .filter(|b| b.batch_date >= from && b.batch_date <= to)
            .filter(|b| statuses.contains(&b.status))
            .cloned()
            .collect())
    }

    fn insert(&self, batch: SepaBatch) -> Result<()> {
        guard(&self.batches).insert(batch.id.clone(), batch);
        Ok(())
    }

    fn set_status(&self, id: &BatchId, status: BatchStatus) -> Result<()> {
        let mut batches = guard(&self.batches);
        let batch = batches.get_mut(id).ok_or_else(|| ReconError::BatchNotFound {
            batch_id: id.clone(),
        })?;
        batch.status = status;
        Ok(())
    }
}

impl PaymentStore for MemoryStore {
    fn insert(&self, payment: Payment) -> Result<()> {
        let mut payments = guard(&self.payments);

        // uniqueness of (bank_transaction_id, batch_id, kind) among
        // non-cancelled payments tied to a bank transaction, keyed at
        // allocation granularity: the same line must not be collected twice
        if payment.bank_transaction_id.is_some() {
            let duplicate = payments.values().any(|p| {
                !p.is_cancelled()
                    && p.bank_transaction_id == payment.bank_transaction_id
                    && p.batch_id == payment.batch_id
                    && p.kind == payment.kind
                    && p.allocations.iter().any(|a| {
                        payment
                            .allocations
                            .iter()
                            .any(|b| a.invoice_id == b.invoice_id)
                    })
            });
            if duplicate {
                return Err(ReconError::DuplicatePayment {
                    bank_transaction_id: payment.bank_transaction_id.clone(),
                    batch_id: payment.batch_id.clone(),
                });
            }
        }

        payments.insert(payment.id, payment);
        Ok(())
    }

    fn find(&self, id: &PaymentId) -> Result<Option<Payment>> {
        Ok(guard(&self.payments).get(id).cloned())
    }

    fn set_status(&self, id: &PaymentId, status: PaymentStatus) -> Result<()> {
        let mut payments = guard(&self.payments);
        let payment = payments
            .get_mut(id)
            .ok_or_else(|| ReconError::OriginalNotFound { payment_id: *id })?;
        payment.status = status;
        Ok(())
    }

    fn for_invoice(&self, invoice_id: &InvoiceId) -> Result<Vec<Payment>> {
        Ok(guard(&self.payments)
            .values()
            .filter(|p| p.allocations.iter().any(|a| &a.invoice_id == invoice_id))
            .cloned()
            .collect())
    }

    fn reversal_of(&self, original: &PaymentId) -> Result<Option<Payment>> {
        Ok(guard(&self.payments)
            .values()
            .find(|p| p.reverses.as_ref() == Some(original) && !p.is_cancelled())
            .cloned())
    }
}

impl MandateStore for MemoryStore {
    fn get(&self, id: &MandateId) -> Result<SepaMandate> {
        guard(&self.mandates)
            .get(id)
            .cloned()
            .ok_or_else(|| ReconError::MandateNotFound {
                mandate_id: id.clone(),
            })
    }

    fn active_for_member(&self, member_id: &MemberId) -> Result<Option<SepaMandate>> {
        Ok(guard(&self.mandates)
            .values()
            .find(|m| &m.member_id == member_id && m.status == MandateStatus::Active)
            .cloned())
    }

    fn insert(&self, mandate: SepaMandate) -> Result<()> {
        guard(&self.mandates).insert(mandate.id.clone(), mandate);
        Ok(())
    }
}

impl BankTransactionStore for MemoryStore {
    fn get(&self, id: &BankTransactionId) -> Result<BankTransaction> {
        guard(&self.bank_transactions)
            .get(id)
            .cloned()
            .ok_or_else(|| ReconError::TransactionNotFound {
                bank_transaction_id: id.clone(),
            })
    }

    fn insert(&self, transaction: BankTransaction) -> Result<()> {
        guard(&self.bank_transactions).insert(transaction.id.clone(), transaction);
        Ok(())
    }

    fn mark_matched(&self, id: &BankTransactionId, batch_ids: &[BatchId]) -> Result<()> {
        let mut transactions = guard(&self.bank_transactions);
        let transaction =
            transactions
                .get_mut(id)
                .ok_or_else(|| ReconError::TransactionNotFound {
                    bank_transaction_id: id.clone(),
                })?;
        for batch_id in batch_ids {
            transaction.matched_batch_ids.insert(batch_id.clone());
        }
        Ok(())
    }

    fn unmatched(&self) -> Result<Vec<BankTransaction>> {
        let mut pending: Vec<BankTransaction> = guard(&self.bank_transactions)
            .values()
            .filter(|t| t.matched_batch_ids.is_empty())
            .cloned()
            .collect();
        pending.sort_by(|a, b| (a.date, &a.id).cmp(&(b.date, &b.id)));
        Ok(pending)
    }
}

impl ReturnStore for MemoryStore {
    fn file_processed(&self, hash: &str) -> Result<bool> {
        Ok(guard(&self.returns)
            .iter()
            .any(|r| r.return_file_hash == hash))
    }

    fn insert(&self, record: ReturnRecord) -> Result<()> {
        guard(&self.returns).push(record);
        Ok(())
    }

    fn for_file(&self, hash: &str) -> Result<Vec<ReturnRecord>> {
        Ok(guard(&self.returns)
            .iter()
            .filter(|r| r.return_file_hash == hash)
            .cloned()
            .collect())
    }
}

impl IdempotencyStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(guard(&self.idempotency).get(key).cloned())
    }

    fn put(&self, record: IdempotencyRecord) -> Result<()> {
        guard(&self.idempotency).insert(record.key.clone(), record);
        Ok(())
    }
}

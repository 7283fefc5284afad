use serde::{Deserialize, Serialize};

use crate::config::ReconConfig;
use crate::context::Context;
use crate::errors::{ReconError, Result};
use crate::events::{Event, EventStore};
use crate::idempotency::{idempotency_key, run_idempotent, LockService};
use crate::payment::poster::{self, PostContext};
use crate::period::guard;
use crate::recon::matcher::{self, MatchCandidate};
use crate::types::{BankTransactionId, BatchStatus, MatchKind, PaymentId, ReconcileMode};

/// result of one reconciliation attempt; stable across idempotent replays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub bank_transaction_id: BankTransactionId,
    pub applied: bool,
    /// the plan that was applied, when one was
    pub selected: Option<MatchCandidate>,
    pub payment_ids: Vec<PaymentId>,
    /// candidates handed back for human approval
    pub review: Vec<MatchCandidate>,
}

/// top-level entry point wiring matcher, guard, and poster
///
/// One coordinator instance per process; it owns the advisory locks.
pub struct Coordinator {
    locks: LockService,
}

impl Coordinator {
    pub fn new(config: &ReconConfig) -> Self {
        Self {
            locks: LockService::new(config.lock_ttl_secs),
        }
    }

    /// reconcile one bank transaction
    ///
    /// Serialised per transaction by an advisory lock; made replay-safe by
    /// an idempotency record keyed on the transaction, so re-delivery of
    /// the same transaction returns the first run's outcome without posting
    /// anything twice.
    pub fn execute(
        &self,
        ctx: &Context<'_>,
        events: &mut EventStore,
        bank_transaction_id: &BankTransactionId,
        mode: ReconcileMode,
    ) -> Result<ReconcileOutcome> {
        if !self.locks.acquire("bank_tx", bank_transaction_id, ctx.time) {
            return Err(ReconError::BusyRetryLater {
                resource: format!("bank_tx:{bank_transaction_id}"),
            });
        }

        let key = idempotency_key(&["bank_tx", bank_transaction_id, "reconcile"]);
        let result = run_idempotent(ctx.idempotency, ctx.time, &key, || {
            self.reconcile(ctx, events, bank_transaction_id, mode)
        });

        self.locks.release("bank_tx", bank_transaction_id);
        result
    }

    /// drain unreconciled transactions in ascending (date, id) order
    ///
    /// A delayed earlier-dated transaction is still processed on the next
    /// drain; per-transaction failures are collected so one bad deposit
    /// never blocks the rest.
    pub fn execute_pending(
        &self,
        ctx: &Context<'_>,
        events: &mut EventStore,
        mode: ReconcileMode,
    ) -> Result<Vec<(BankTransactionId, Result<ReconcileOutcome>)>> {
        let mut outcomes = Vec::new();
        for transaction in ctx.bank_transactions.unmatched()? {
            let outcome = self.execute(ctx, events, &transaction.id, mode);
            outcomes.push((transaction.id, outcome));
        }
        Ok(outcomes)
    }

    fn reconcile(
        &self,
        ctx: &Context<'_>,
        events: &mut EventStore,
        bank_transaction_id: &BankTransactionId,
        mode: ReconcileMode,
    ) -> Result<ReconcileOutcome> {
        let transaction = ctx.bank_transactions.get(bank_transaction_id)?;
        let candidates = matcher::find(ctx, &transaction)?;

        let Some(top) = candidates.first() else {
            return Ok(ReconcileOutcome {
                bank_transaction_id: bank_transaction_id.clone(),
                applied: false,
                selected: None,
                payment_ids: Vec::new(),
                review: Vec::new(),
            });
        };

        let auto_apply = match mode {
            ReconcileMode::Conservative => top.kind == MatchKind::Exact && top.confidence >= 1.0,
            // the matcher already refused ties, so the top is unique
            ReconcileMode::Aggressive => true,
        };
        if !auto_apply {
            events.emit(Event::ReconciliationDeferred {
                bank_transaction_id: bank_transaction_id.clone(),
                candidate_count: candidates.len(),
                timestamp: ctx.time.now(),
            });
            return Ok(ReconcileOutcome {
                bank_transaction_id: bank_transaction_id.clone(),
                applied: false,
                selected: None,
                payment_ids: Vec::new(),
                review: candidates,
            });
        }

        let selected = top.clone();
        let mut payment_ids = Vec::new();

        for batch_id in &selected.batches {
            // re-validate every affected invoice's period right before
            // collecting; invoices may have appeared since batch assembly
            guard::validate_batch_assembly(ctx, events, batch_id)?;

            let batch = ctx.batches.get(batch_id)?;
            for line in &batch.lines {
                let collected = match (&selected.kind, &selected.lines) {
                    (MatchKind::Partial, Some(lines)) => lines.contains(&line.invoice_id),
                    _ => true,
                };
                if !collected {
                    continue;
                }
                let payment = poster::post(
                    ctx,
                    events,
                    &line.invoice_id,
                    line.amount,
                    &PostContext {
                        bank_transaction_id: Some(transaction.id.clone()),
                        batch_id: Some(batch_id.clone()),
                        idempotency_key: None,
                    },
                )?;
                payment_ids.push(payment.id);
            }

            // a fully collected batch is done; a partially collected one
            // stays submitted until its residual lines are returned
            if selected.kind != MatchKind::Partial {
                ctx.batches.set_status(batch_id, BatchStatus::Processed)?;
            }
        }

        ctx.bank_transactions
            .mark_matched(&transaction.id, &selected.batches)?;
        events.emit(Event::BatchMatched {
            bank_transaction_id: bank_transaction_id.clone(),
            batch_ids: selected.batches.clone(),
            kind: selected.kind,
            confidence: selected.confidence,
            timestamp: ctx.time.now(),
        });
        events.emit(Event::ReconciliationCompleted {
            bank_transaction_id: bank_transaction_id.clone(),
            payments_posted: payment_ids.len(),
            applied: true,
            timestamp: ctx.time.now(),
        });

        Ok(ReconcileOutcome {
            bank_transaction_id: bank_transaction_id.clone(),
            applied: true,
            selected: Some(selected),
            payment_ids,
            review: Vec::new(),
        })
    }
}

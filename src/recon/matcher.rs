use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::decimal::Money;
use crate::errors::{ReconError, Result};
use crate::types::{BankTransaction, BatchId, BatchStatus, InvoiceId, MatchKind, SepaBatch};

/// one way a bank transaction could reconcile against outgoing batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub kind: MatchKind,
    pub batches: Vec<BatchId>,
    /// for partial matches, the invoice ids of the collected lines
    pub lines: Option<Vec<InvoiceId>>,
    pub confidence: f64,
    /// lines of the batch the deposit did not cover; candidates for
    /// return-file processing
    pub residual_lines: Vec<InvoiceId>,
}

/// candidate plus the tie-breaking facts it was ranked on
#[derive(Debug, Clone)]
struct Ranked {
    candidate: MatchCandidate,
    days_off: i64,
    line_count: usize,
    oldest_batch: NaiveDate,
}

impl Ranked {
    fn rank_key(&self) -> (u64, i64, u8, usize, NaiveDate) {
        // confidence descends; to_bits on the negated value keeps f64 out
        // of the Ord key while preserving total order for values in [0, 1]
        (
            (1.0 - self.candidate.confidence).to_bits(),
            self.days_off,
            kind_rank(self.candidate.kind),
            self.line_count,
            self.oldest_batch,
        )
    }
}

fn kind_rank(kind: MatchKind) -> u8 {
    match kind {
        MatchKind::Exact => 0,
        MatchKind::Split => 1,
        MatchKind::Partial => 2,
    }
}

fn date_confidence(days_off: i64, window: i64) -> f64 {
    if window == 0 {
        1.0
    } else {
        1.0 - 0.5 * (days_off as f64 / window as f64)
    }
}

/// find the legitimate batch(es) or line subsets a deposit reconciles with
///
/// Three passes in order of preference: exact single-batch matches, then
/// consolidated multi-batch (split) matches, then single-batch line-subset
/// (partial) matches. Exact hits short-circuit the expensive passes.
/// Candidates come back best-first; an unresolvable tie at the top is an
/// `AmbiguousMatch`, and an oversized search space fails fast rather than
/// guessing.
pub fn find(ctx: &Context<'_>, transaction: &BankTransaction) -> Result<Vec<MatchCandidate>> {
    let window = ctx.config.match_window_days;
    let tolerance = ctx.config.amount_tolerance;
    let deposit = transaction.deposit;

    let mut eligible = ctx.batches.in_window(
        transaction.date - Duration::days(window),
        transaction.date + Duration::days(window),
        &[BatchStatus::Submitted, BatchStatus::Processed],
    )?;
    eligible.sort_by(|a, b| (a.batch_date, &a.id).cmp(&(b.batch_date, &b.id)));
    eligible.retain(|batch| match batch.validate() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(batch_id = %batch.id, error = %e,
                "skipping inconsistent batch during matching");
            false
        }
    });

    let days_off = |batch: &SepaBatch| (batch.batch_date - transaction.date).num_days().abs();

    // step 1: exact single-batch matches
    let mut ranked: Vec<Ranked> = eligible
        .iter()
        .filter(|b| b.total_amount.approx_eq(deposit, tolerance))
        .map(|b| {
            let off = days_off(b);
            Ranked {
                candidate: MatchCandidate {
                    kind: MatchKind::Exact,
                    batches: vec![b.id.clone()],
                    lines: None,
                    confidence: date_confidence(off, window),
                    residual_lines: Vec::new(),
                },
                days_off: off,
                line_count: b.lines.len(),
                oldest_batch: b.batch_date,
            }
        })
        .collect();

    if ranked.is_empty() {
        if eligible.len() > ctx.config.k_max {
            return Err(ReconError::SearchSpaceTooLarge {
                bank_transaction_id: transaction.id.clone(),
                size: eligible.len(),
                limit: ctx.config.k_max,
            });
        }

        // step 2: subsets of batches the bank consolidated into one deposit
        let amounts: Vec<Money> = eligible.iter().map(|b| b.total_amount).collect();
        let subsets = subset_sum(&amounts, deposit, tolerance, 2, ctx.config.c_max).ok_or_else(
            || ReconError::SearchSpaceTooLarge {
                bank_transaction_id: transaction.id.clone(),
                size: ctx.config.c_max + 1,
                limit: ctx.config.c_max,
            },
        )?;
        for subset in subsets {
            let members: Vec<&SepaBatch> = subset.iter().map(|&i| &eligible[i]).collect();
            let off = members.iter().map(|b| days_off(b)).max().unwrap_or(0);
            ranked.push(Ranked {
                candidate: MatchCandidate {
                    kind: MatchKind::Split,
                    batches: members.iter().map(|b| b.id.clone()).collect(),
                    lines: None,
                    confidence: date_confidence(off, window),
                    residual_lines: Vec::new(),
                },
                days_off: off,
                line_count: members.iter().map(|b| b.lines.len()).sum(),
                oldest_batch: members
                    .iter()
                    .map(|b| b.batch_date)
                    .min()
                    .unwrap_or(transaction.date),
            });
        }

        // step 3: one batch, a subset of its lines collected
        for batch in &eligible {
            if batch.lines.len() < 2 {
                continue;
            }
            if batch.lines.len() > ctx.config.k_max {
                return Err(ReconError::SearchSpaceTooLarge {
                    bank_transaction_id: transaction.id.clone(),
                    size: batch.lines.len(),
                    limit: ctx.config.k_max,
                });
            }
            let amounts: Vec<Money> = batch.lines.iter().map(|l| l.amount).collect();
            let subsets = subset_sum(&amounts, deposit, tolerance, 1, ctx.config.c_max)
                .ok_or_else(|| ReconError::SearchSpaceTooLarge {
                    bank_transaction_id: transaction.id.clone(),
                    size: ctx.config.c_max + 1,
                    limit: ctx.config.c_max,
                })?;
            for subset in subsets {
                // the full line set is an exact match, handled in step 1
                if subset.len() == batch.lines.len() {
                    continue;
                }
                let collected: Vec<InvoiceId> = subset
                    .iter()
                    .map(|&i| batch.lines[i].invoice_id.clone())
                    .collect();
                let residual: Vec<InvoiceId> = batch
                    .lines
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !subset.contains(i))
                    .map(|(_, l)| l.invoice_id.clone())
                    .collect();
                let off = days_off(batch);
                ranked.push(Ranked {
                    candidate: MatchCandidate {
                        kind: MatchKind::Partial,
                        batches: vec![batch.id.clone()],
                        lines: Some(collected.clone()),
                        confidence: date_confidence(off, window),
                        residual_lines: residual,
                    },
                    days_off: off,
                    line_count: collected.len(),
                    oldest_batch: batch.batch_date,
                });
            }
        }
    }

    ranked.sort_by(|a, b| {
        a.rank_key()
            .cmp(&b.rank_key())
            .then_with(|| a.candidate.batches.cmp(&b.candidate.batches))
    });

    // a residual tie at the top cannot be resolved silently
    if ranked.len() >= 2 && ranked[0].rank_key() == ranked[1].rank_key() {
        let tied: Vec<Vec<BatchId>> = ranked
            .iter()
            .take_while(|r| r.rank_key() == ranked[0].rank_key())
            .map(|r| r.candidate.batches.clone())
            .collect();
        return Err(ReconError::AmbiguousMatch {
            bank_transaction_id: transaction.id.clone(),
            candidates: tied,
        });
    }

    Ok(ranked.into_iter().map(|r| r.candidate).collect())
}

/// enumerate index subsets of `amounts` summing to `target` within
/// `tolerance`, smallest index order, at least `min_size` elements
///
/// Amounts are collection amounts, strictly positive, so any branch whose
/// running sum exceeds the target plus tolerance is pruned. Returns `None`
/// once more than `max_results` subsets are found.
fn subset_sum(
    amounts: &[Money],
    target: Money,
    tolerance: Money,
    min_size: usize,
    max_results: usize,
) -> Option<Vec<Vec<usize>>> {
    fn search(
        amounts: &[Money],
        target: Money,
        tolerance: Money,
        min_size: usize,
        max_results: usize,
        start: usize,
        sum: Money,
        chosen: &mut Vec<usize>,
        out: &mut Vec<Vec<usize>>,
    ) -> bool {
        if sum > target + tolerance {
            return true;
        }
        if chosen.len() >= min_size && sum.approx_eq(target, tolerance) {
            if out.len() >= max_results {
                return false;
            }
            out.push(chosen.clone());
        }
        for i in start..amounts.len() {
            chosen.push(i);
            let ok = search(
                amounts,
                target,
                tolerance,
                min_size,
                max_results,
                i + 1,
                sum + amounts[i],
                chosen,
                out,
            );
            chosen.pop();
            if !ok {
                return false;
            }
        }
        true
    }

    let mut out = Vec::new();
    let mut chosen = Vec::new();
    if search(
        amounts,
        target,
        tolerance,
        min_size,
        max_results,
        0,
        Money::ZERO,
        &mut chosen,
        &mut out,
    ) {
        Some(out)
    } else {
        None
    }
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::enclosing_month;
use crate::config::GuardMode;
use crate::context::Context;
use crate::errors::{ReconError, Result};
use crate::events::{Event, EventStore};
use crate::period::registry::{self, OverlapReport};
use crate::types::{BatchId, InvoiceId, MandateId, MandateStatus, MemberId, PeriodConflict};

/// period conflicts found for one batch line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineConflict {
    pub invoice_id: InvoiceId,
    pub conflicts: Vec<PeriodConflict>,
}

/// a batch line whose mandate cannot legitimately be debited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MandateIssue {
    pub invoice_id: InvoiceId,
    pub mandate_id: MandateId,
    pub reason: String,
}

/// outcome of re-validating a batch before assembly or collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchValidationReport {
    pub batch_id: BatchId,
    pub line_conflicts: Vec<LineConflict>,
    pub mandate_issues: Vec<MandateIssue>,
}

impl BatchValidationReport {
    pub fn is_clean(&self) -> bool {
        self.line_conflicts.is_empty() && self.mandate_issues.is_empty()
    }
}

/// first line of defence: called before any membership invoice is created
///
/// Strict mode refuses overlapping periods outright; warn mode flags the
/// conflict, emits an event per conflicting invoice, and allows creation.
pub fn validate_before_create(
    ctx: &Context<'_>,
    events: &mut EventStore,
    member_id: &MemberId,
    s: NaiveDate,
    e: NaiveDate,
) -> Result<OverlapReport> {
    let report = registry::check(ctx, member_id, s, e)?;
    if !report.has_overlap {
        return Ok(report);
    }

    match ctx.config.guard_mode {
        GuardMode::Strict => Err(ReconError::PeriodDuplicate {
            member_id: member_id.clone(),
            conflicts: report.conflicts,
        }),
        GuardMode::Warn => {
            for conflict in &report.conflicts {
                tracing::warn!(
                    member_id = %member_id,
                    conflicting_invoice = %conflict.invoice_id,
                    relation = ?conflict.relation,
                    "membership period overlap allowed in warn mode"
                );
                events.emit(Event::PeriodConflictFlagged {
                    member_id: member_id.clone(),
                    conflicting_invoice_id: conflict.invoice_id.clone(),
                    relation: conflict.relation,
                    period_start: s,
                    period_end: e,
                });
            }
            Ok(report)
        }
    }
}

/// second line of defence: re-check every line of a batch
///
/// Invoices may be created by paths outside this repository's control, so
/// the same overlap rule is applied again per line just before the batch is
/// assembled or collected. Each line's own invoice is excluded from its
/// conflict set. Mandates are checked here too: a line needs an active
/// mandate belonging to the invoice's member.
pub fn validate_batch_assembly(
    ctx: &Context<'_>,
    events: &mut EventStore,
    batch_id: &BatchId,
) -> Result<BatchValidationReport> {
    let batch = ctx.batches.get(batch_id)?;
    batch.validate()?;

    let mut line_conflicts = Vec::new();
    let mut mandate_issues = Vec::new();

    for line in &batch.lines {
        let invoice = ctx.invoices.get(&line.invoice_id)?;

        match ctx.mandates.get(&line.mandate_id) {
            Err(ReconError::MandateNotFound { .. }) => mandate_issues.push(MandateIssue {
                invoice_id: invoice.id.clone(),
                mandate_id: line.mandate_id.clone(),
                reason: "mandate not found".into(),
            }),
            Err(e) => return Err(e),
            Ok(mandate) => {
                if mandate.status != MandateStatus::Active {
                    mandate_issues.push(MandateIssue {
                        invoice_id: invoice.id.clone(),
                        mandate_id: line.mandate_id.clone(),
                        reason: "mandate revoked".into(),
                    });
                } else if mandate.member_id != invoice.member_id {
                    mandate_issues.push(MandateIssue {
                        invoice_id: invoice.id.clone(),
                        mandate_id: line.mandate_id.clone(),
                        reason: "mandate belongs to another member".into(),
                    });
                }
            }
        }

        if registry::is_membership(ctx.config, &invoice) {
            let (s, e) = invoice.period();
            let report = registry::check(ctx, &invoice.member_id, s, e)?;
            let conflicts: Vec<PeriodConflict> = report
                .conflicts
                .into_iter()
                .filter(|c| c.invoice_id != invoice.id)
                .collect();
            if !conflicts.is_empty() {
                line_conflicts.push(LineConflict {
                    invoice_id: invoice.id.clone(),
                    conflicts,
                });
            }
        }
    }

    events.emit(Event::BatchValidated {
        batch_id: batch_id.clone(),
        conflict_count: line_conflicts.len(),
        mandate_issue_count: mandate_issues.len(),
        timestamp: ctx.time.now(),
    });

    let report = BatchValidationReport {
        batch_id: batch_id.clone(),
        line_conflicts,
        mandate_issues,
    };

    if ctx.config.guard_mode == GuardMode::Strict && !report.line_conflicts.is_empty() {
        return Err(ReconError::BatchHasPeriodConflicts {
            batch_id: batch_id.clone(),
            conflicting_invoices: report
                .line_conflicts
                .iter()
                .map(|l| l.invoice_id.clone())
                .collect(),
            conflicts: report
                .line_conflicts
                .iter()
                .flat_map(|l| l.conflicts.iter().cloned())
                .collect(),
        });
    }
    if ctx.config.guard_mode == GuardMode::Strict && !report.mandate_issues.is_empty() {
        let issue = &report.mandate_issues[0];
        tracing::warn!(batch_id = %batch_id, mandate_id = %issue.mandate_id,
            reason = %issue.reason, "batch refused: mandate issue");
        return Err(ReconError::MandateNotFound {
            mandate_id: issue.mandate_id.clone(),
        });
    }
    if !report.is_clean() {
        tracing::warn!(
            batch_id = %batch_id,
            conflicts = report.line_conflicts.len(),
            mandate_issues = report.mandate_issues.len(),
            "batch validation issues allowed in warn mode"
        );
    }

    Ok(report)
}

/// backfill missing period fields from the posting date's enclosing month
///
/// Idempotent: an invoice that already carries both fields is left alone.
/// Returns whether anything was written.
pub fn ensure_invoice_period_fields(
    ctx: &Context<'_>,
    events: &mut EventStore,
    invoice_id: &InvoiceId,
) -> Result<bool> {
    let invoice = ctx.invoices.get(invoice_id)?;
    if !registry::is_membership(ctx.config, &invoice) {
        return Ok(false);
    }
    if invoice.period_start.is_some() && invoice.period_end.is_some() {
        return Ok(false);
    }

    let (s, e) = enclosing_month(invoice.posting_date);
    ctx.invoices.update_period(invoice_id, s, e)?;
    events.emit(Event::InvoicePeriodBackfilled {
        invoice_id: invoice_id.clone(),
        period_start: s,
        period_end: e,
    });
    Ok(true)
}

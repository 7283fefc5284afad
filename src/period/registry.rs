use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::ReconConfig;
use crate::context::Context;
use crate::errors::{ReconError, Result};
use crate::types::{Invoice, ItemKind, MemberId, OverlapRelation, PeriodConflict};

/// answer to "does this member already have a membership invoice whose
/// period overlaps the candidate?"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapReport {
    pub has_overlap: bool,
    pub conflicts: Vec<PeriodConflict>,
}

/// classify the candidate interval [s, e] against an existing [s2, e2]
///
/// Closed intervals; adjacent intervals (e + 1 day = s2) do not overlap.
pub fn classify(s: NaiveDate, e: NaiveDate, s2: NaiveDate, e2: NaiveDate) -> OverlapRelation {
    if s > e2 || s2 > e {
        return OverlapRelation::None;
    }
    if s == s2 && e == e2 {
        return OverlapRelation::Exact;
    }
    if s2 <= s && e <= e2 {
        return OverlapRelation::Contained;
    }
    if s <= s2 && e2 <= e {
        return OverlapRelation::Contains;
    }
    // overlapping but neither contains the other
    if s < s2 {
        OverlapRelation::PartialEnd
    } else {
        OverlapRelation::PartialStart
    }
}

/// whether an invoice bills a membership
///
/// The item kind is authoritative; for invoices created outside this
/// repository's control the configured token list is matched against the
/// description, case-insensitively. The token list is configuration, not
/// code.
pub fn is_membership(config: &ReconConfig, invoice: &Invoice) -> bool {
    if invoice.item_kind == ItemKind::Membership {
        return true;
    }
    let description = invoice.description.to_ascii_lowercase();
    config
        .membership_tokens
        .iter()
        .any(|token| description.contains(&token.to_ascii_lowercase()))
}

/// find every non-cancelled membership invoice of the member whose period
/// overlaps [s, e]
///
/// Read-only; the registry reports, it never mutates.
pub fn check(
    ctx: &Context<'_>,
    member_id: &MemberId,
    s: NaiveDate,
    e: NaiveDate,
) -> Result<OverlapReport> {
    if s > e {
        return Err(ReconError::InvalidInterval { start: s, end: e });
    }

    let mut conflicts = Vec::new();
    for invoice in ctx.invoices.for_member(member_id)? {
        if invoice.is_cancelled() || !is_membership(ctx.config, &invoice) {
            continue;
        }
        let (existing_start, existing_end) = invoice.period();
        // the conflict names the existing invoice, so the recorded relation
        // is the existing period's relation to the candidate
        let relation = classify(existing_start, existing_end, s, e);
        if relation != OverlapRelation::None {
            conflicts.push(PeriodConflict {
                invoice_id: invoice.id.clone(),
                relation,
                period_start: existing_start,
                period_end: existing_end,
            });
        }
    }
    conflicts.sort_by(|a, b| a.invoice_id.cmp(&b.invoice_id));

    Ok(OverlapReport {
        has_overlap: !conflicts.is_empty(),
        conflicts,
    })
}

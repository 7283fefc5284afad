use chrono::{Duration, NaiveDate};

use crate::calendar::add_months;
use crate::context::Context;
use crate::errors::Result;
use crate::period::registry;
use crate::types::{BillingFrequency, BillingPeriod, MemberId};

/// generate the contiguous billing-period sequence starting at `start`
///
/// Covers exactly `horizon_years` * 12 months: 12/4/1 periods per year for
/// monthly/quarterly/yearly. `period_end(k) + 1 day = period_start(k + 1)`
/// for every k; both dates are derived from the original start so that
/// month-end clamping never breaks contiguity. Same inputs, same output.
pub fn generate(
    member_id: &MemberId,
    start: NaiveDate,
    frequency: BillingFrequency,
    horizon_years: u32,
) -> Vec<BillingPeriod> {
    let step = frequency.step_months();
    let count = horizon_years * 12 / step;

    (0..count)
        .map(|k| BillingPeriod {
            member_id: member_id.clone(),
            period_start: add_months(start, (k * step) as i32),
            period_end: add_months(start, ((k + 1) * step) as i32) - Duration::days(1),
            frequency,
        })
        .collect()
}

/// generated periods not yet covered by a membership invoice
///
/// The renewal driver: everything `generate` emits, minus periods the
/// registry already finds an overlapping invoice for.
pub fn uncovered_periods(
    ctx: &Context<'_>,
    member_id: &MemberId,
    start: NaiveDate,
    frequency: BillingFrequency,
) -> Result<Vec<BillingPeriod>> {
    let mut uncovered = Vec::new();
    for period in generate(member_id, start, frequency, ctx.config.horizon_years) {
        let report = registry::check(ctx, member_id, period.period_start, period.period_end)?;
        if !report.has_overlap {
            uncovered.push(period);
        }
    }
    Ok(uncovered)
}

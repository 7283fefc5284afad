use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Context;
use crate::decimal::Money;
use crate::errors::{ReconError, Result};
use crate::events::{Event, EventStore};
use crate::idempotency::sha256_hex;
use crate::payment::poster;
use crate::types::{
    InvoiceId, MemberId, Payment, PaymentId, PaymentKind, ReturnRecord,
};

/// one row of a bank return file
#[derive(Debug, Deserialize)]
struct ReturnRow {
    #[serde(rename = "Member_ID")]
    member_id: String,
    #[serde(rename = "Invoice", default)]
    invoice: Option<String>,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "Return_Reason", default)]
    reason: String,
    #[serde(rename = "Return_Code", default)]
    code: String,
}

impl ReturnRow {
    fn reason_code(&self) -> &str {
        if self.code.is_empty() {
            &self.reason
        } else {
            &self.code
        }
    }
}

/// outcome of processing one return file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnFileReport {
    pub file_hash: String,
    /// one record per reversed row
    pub records: Vec<ReturnRecord>,
    /// payments whose reversal already existed; noted, not failed
    pub skipped: Vec<PaymentId>,
    /// members for whom no matching payment was found
    pub unmatched: Vec<MemberId>,
}

/// process a SEPA return file: reverse every listed collection once
///
/// The file's SHA-256 identifies it; a hash seen before refuses
/// reprocessing outright. Rows are independent: a row whose reversal was
/// already posted is skipped with a notice, a row with no matching payment
/// is reported as unmatched, and only storage-level failures abort the run.
pub fn process(
    ctx: &Context<'_>,
    events: &mut EventStore,
    file_bytes: &[u8],
) -> Result<ReturnFileReport> {
    let file_hash = sha256_hex(file_bytes);
    if ctx.returns.file_processed(&file_hash)? {
        tracing::info!(file_hash = %file_hash, "return file already processed, refusing replay");
        return Err(ReconError::ReturnFileAlreadyProcessed { file_hash });
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file_bytes);
    let rows: Vec<ReturnRow> = reader
        .deserialize()
        .collect::<std::result::Result<_, csv::Error>>()?;

    let mut report = ReturnFileReport {
        file_hash: file_hash.clone(),
        records: Vec::new(),
        skipped: Vec::new(),
        unmatched: Vec::new(),
    };

    for (index, row) in rows.iter().enumerate() {
        let amount =
            Money::from_str_exact(&row.amount).map_err(|e| ReconError::ReturnFileParse {
                message: format!("row {}: bad amount '{}': {e}", index + 1, row.amount),
            })?;

        let Some((payment, invoice_id)) = locate_payment(ctx, row, amount)? else {
            tracing::warn!(
                member_id = %row.member_id,
                %amount,
                "return row has no matching receive payment"
            );
            report.unmatched.push(row.member_id.clone());
            continue;
        };

        if let Some(existing) = ctx.payments.reversal_of(&payment.id)? {
            tracing::info!(
                payment_id = %payment.id,
                reversal_id = %existing.id,
                "return row already reversed, skipping"
            );
            report.skipped.push(payment.id);
            continue;
        }

        match poster::post_reversal(ctx, events, &payment.id, row.reason_code()) {
            Ok(refund) => {
                let record = ReturnRecord {
                    id: Uuid::new_v4(),
                    return_file_hash: file_hash.clone(),
                    member_id: row.member_id.clone(),
                    invoice_id,
                    amount,
                    reason_code: row.reason_code().to_string(),
                    reversal_payment_id: refund.id,
                };
                ctx.returns.insert(record.clone())?;
                report.records.push(record);
            }
            Err(e) if e.is_duplicate_prevention() => {
                tracing::info!(payment_id = %payment.id, error = %e,
                    "return row reversal refused, skipping");
                report.skipped.push(payment.id);
            }
            Err(e) => return Err(e),
        }
    }

    events.emit(Event::ReturnFileProcessed {
        file_hash,
        reversed: report.records.len(),
        skipped: report.skipped.len(),
        unmatched: report.unmatched.len(),
        timestamp: ctx.time.now(),
    });

    Ok(report)
}

/// find the non-cancelled receive payment a return row refers to
///
/// With an invoice id the search is direct; without one, every invoice of
/// the member is considered. Amounts match within tolerance. When several
/// payments qualify the most recent collection is reversed.
fn locate_payment(
    ctx: &Context<'_>,
    row: &ReturnRow,
    amount: Money,
) -> Result<Option<(Payment, InvoiceId)>> {
    let invoice_ids: Vec<InvoiceId> = match &row.invoice {
        Some(id) if !id.is_empty() => vec![id.clone()],
        _ => ctx
            .invoices
            .for_member(&row.member_id)?
            .into_iter()
            .map(|i| i.id)
            .collect(),
    };

    let tolerance = ctx.config.amount_tolerance;
    let mut best: Option<(Payment, InvoiceId)> = None;

    for invoice_id in invoice_ids {
        let invoice = match ctx.invoices.get(&invoice_id) {
            Ok(i) => i,
            Err(ReconError::InvoiceNotFound { .. }) => continue,
            Err(e) => return Err(e),
        };
        if invoice.member_id != row.member_id {
            continue;
        }

        for payment in ctx.payments.for_invoice(&invoice_id)? {
            if payment.kind != PaymentKind::Receive || payment.is_cancelled() {
                continue;
            }
            if !payment.allocated_to(&invoice_id).approx_eq(amount, tolerance) {
                continue;
            }
            let newer = match &best {
                Some((current, _)) => {
                    (payment.posting_date, payment.id) > (current.posting_date, current.id)
                }
                None => true,
            };
            if newer {
                best = Some((payment, invoice_id.clone()));
            }
        }
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconConfig;
    use crate::payment::poster::{post, PostContext};
    use crate::store::{InvoiceStore, MemoryStore, ReturnStore};
    use crate::types::{Invoice, InvoiceStatus, ItemKind};
    use chrono::{NaiveDate, TimeZone, Utc};
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn test_time() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2025, 1, 20, 9, 0, 0).unwrap(),
        ))
    }

    fn seed_paid_invoice(
        ctx: &Context<'_>,
        events: &mut EventStore,
        store: &MemoryStore,
        id: &str,
        member: &str,
        total: i64,
    ) {
        InvoiceStore::insert(
            store,
            Invoice {
                id: id.into(),
                member_id: member.into(),
                customer_id: format!("C-{member}"),
                posting_date: d(2025, 1, 1),
                grand_total: Money::from_major(total),
                outstanding: Money::from_major(total),
                status: InvoiceStatus::Unpaid,
                period_start: Some(d(2025, 1, 1)),
                period_end: Some(d(2025, 1, 31)),
                item_kind: ItemKind::Membership,
                description: "Membership dues".into(),
                subscription_id: None,
            },
        )
        .unwrap();
        post(
            ctx,
            events,
            &id.to_string(),
            Money::from_major(total),
            &PostContext {
                bank_transaction_id: Some("BT1".into()),
                batch_id: Some("B1".into()),
                idempotency_key: None,
            },
        )
        .unwrap();
    }

    const RETURN_FILE: &[u8] =
        b"Member_ID,Invoice,Amount,Return_Reason,Return_Code\nM2,INV-2,30.00,Insufficient funds,AM04\n";

    #[test]
    fn test_return_file_reverses_payment() {
        let store = MemoryStore::new();
        let config = ReconConfig::default();
        let time = test_time();
        let ctx = Context::with_store(&time, &config, &store);
        let mut events = EventStore::new();
        seed_paid_invoice(&ctx, &mut events, &store, "INV-2", "M2", 30);

        let report = process(&ctx, &mut events, RETURN_FILE).unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].reason_code, "AM04");
        assert_eq!(report.records[0].invoice_id, "INV-2");

        let invoice = InvoiceStore::get(&store, &"INV-2".to_string()).unwrap();
        assert_eq!(invoice.outstanding, Money::from_major(30));

        let stored = ReturnStore::for_file(&store, &report.file_hash).unwrap();
        assert_eq!(stored, report.records);
    }

    #[test]
    fn test_replay_is_refused() {
        let store = MemoryStore::new();
        let config = ReconConfig::default();
        let time = test_time();
        let ctx = Context::with_store(&time, &config, &store);
        let mut events = EventStore::new();
        seed_paid_invoice(&ctx, &mut events, &store, "INV-2", "M2", 30);

        let first = process(&ctx, &mut events, RETURN_FILE).unwrap();
        let replay = process(&ctx, &mut events, RETURN_FILE);
        assert!(matches!(
            replay,
            Err(ReconError::ReturnFileAlreadyProcessed { .. })
        ));

        // no extra reversal payments, identical record contents
        let stored = ReturnStore::for_file(&store, &first.file_hash).unwrap();
        assert_eq!(stored, first.records);
    }

    #[test]
    fn test_row_without_invoice_column() {
        let store = MemoryStore::new();
        let config = ReconConfig::default();
        let time = test_time();
        let ctx = Context::with_store(&time, &config, &store);
        let mut events = EventStore::new();
        seed_paid_invoice(&ctx, &mut events, &store, "INV-7", "M7", 20);

        let file = b"Member_ID,Invoice,Amount,Return_Reason,Return_Code\nM7,,20.00,Account closed,AC04\n";
        let report = process(&ctx, &mut events, file).unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].invoice_id, "INV-7");
    }

    #[test]
    fn test_unmatched_row_is_reported_not_fatal() {
        let store = MemoryStore::new();
        let config = ReconConfig::default();
        let time = test_time();
        let ctx = Context::with_store(&time, &config, &store);
        let mut events = EventStore::new();

        let file = b"Member_ID,Invoice,Amount,Return_Reason,Return_Code\nM9,INV-9,12.00,Unknown,MS03\n";
        let report = process(&ctx, &mut events, file).unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.unmatched, vec!["M9".to_string()]);
    }

    #[test]
    fn test_bad_amount_is_a_parse_error() {
        let store = MemoryStore::new();
        let config = ReconConfig::default();
        let time = test_time();
        let ctx = Context::with_store(&time, &config, &store);
        let mut events = EventStore::new();

        let file = b"Member_ID,Invoice,Amount,Return_Reason,Return_Code\nM1,INV-1,abc,Bad,XX00\n";
        let result = process(&ctx, &mut events, file);
        assert!(matches!(result, Err(ReconError::ReturnFileParse { .. })));
    }
}

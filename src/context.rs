use hourglass_rs::SafeTimeProvider;

use crate::config::ReconConfig;
use crate::store::{
    BankTransactionStore, BatchStore, IdempotencyStore, InvoiceStore, MandateStore, PaymentStore,
    ReturnStore,
};

/// explicit per-operation context: clock, configuration, and stores
///
/// Replaces any notion of a request-scoped global; every core operation
/// takes `&Context`.
pub struct Context<'a> {
    pub time: &'a SafeTimeProvider,
    pub config: &'a ReconConfig,
    pub invoices: &'a dyn InvoiceStore,
    pub batches: &'a dyn BatchStore,
    pub payments: &'a dyn PaymentStore,
    pub mandates: &'a dyn MandateStore,
    pub bank_transactions: &'a dyn BankTransactionStore,
    pub returns: &'a dyn ReturnStore,
    pub idempotency: &'a dyn IdempotencyStore,
}

impl<'a> Context<'a> {
    /// bind every store role to one backing store
    pub fn with_store<S>(time: &'a SafeTimeProvider, config: &'a ReconConfig, store: &'a S) -> Self
    where
        S: InvoiceStore
            + BatchStore
            + PaymentStore
            + MandateStore
            + BankTransactionStore
            + ReturnStore
            + IdempotencyStore,
    {
        Self {
            time,
            config,
            invoices: store,
            batches: store,
            payments: store,
            mandates: store,
            bank_transactions: store,
            returns: store,
            idempotency: store,
        }
    }
}

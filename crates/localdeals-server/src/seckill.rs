//! Flash-sale ("seckill") order pipeline.
//!
//! ```text
//! purchase ─▶ voucher lookup ─▶ window check ─▶ stock fast-path
//!          ─▶ [order lock] ─▶ conditional decrement + order insert ─▶ order
//! ```
//!
//! Oversell and duplicate orders are prevented by the store's
//! [`VoucherStore::place_order`], which decrements only while stock is
//! positive and inserts only if the user has no order for the voucher, both
//! in one atomic unit. The optional order lock additionally serializes one
//! user's in-flight purchases of the same voucher.

use std::sync::Arc;

use localdeals_storage::{
    ErrorCategory, PlaceOrderOutcome, StorageError, UserContext, VoucherOrder, VoucherStore,
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::config::{OrderGuard, SeckillConfig};
use crate::id_worker::{IdError, IdWorker};
use crate::lock::DistributedLock;
use crate::metrics;

/// Why a purchase was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    VoucherNotFound,
    WindowNotStarted,
    WindowEnded,
    OutOfStock,
    DuplicatePurchase,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VoucherNotFound => "voucher_not_found",
            Self::WindowNotStarted => "window_not_started",
            Self::WindowEnded => "window_ended",
            Self::OutOfStock => "out_of_stock",
            Self::DuplicatePurchase => "duplicate_purchase",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("purchase rejected: {0}")]
    Rejected(RejectReason),

    #[error("voucher store error: {0}")]
    Store(#[from] StorageError),

    #[error("order id error: {0}")]
    Id(#[from] IdError),

    #[error("order lock error: {0}")]
    Lock(#[source] StorageError),
}

impl PurchaseError {
    /// The rejection reason, if this is a business rejection.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Category of the underlying store failure, if any.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Store(e) | Self::Lock(e) | Self::Id(IdError::Store(e)) => Some(e.category()),
            _ => None,
        }
    }
}

/// Order lock key for one user buying one voucher.
pub fn order_lock_key(user_id: i64, voucher_id: i64) -> String {
    format!("lock:order:{user_id}:{voucher_id}")
}

#[derive(Clone)]
pub struct SeckillService {
    vouchers: Arc<dyn VoucherStore>,
    ids: IdWorker,
    lock: DistributedLock,
    config: SeckillConfig,
}

impl SeckillService {
    pub fn new(
        vouchers: Arc<dyn VoucherStore>,
        ids: IdWorker,
        lock: DistributedLock,
        config: SeckillConfig,
    ) -> Self {
        Self {
            vouchers,
            ids,
            lock,
            config,
        }
    }

    /// Buys one unit of `voucher_id` for the caller in `ctx`.
    #[instrument(skip(self, ctx), fields(user_id = ctx.user_id))]
    pub async fn purchase(
        &self,
        ctx: &UserContext,
        voucher_id: i64,
    ) -> Result<VoucherOrder, PurchaseError> {
        let result = self.try_purchase(ctx.user_id, voucher_id).await;
        match &result {
            Ok(order) => {
                metrics::record_seckill_outcome("placed");
                info!(order_id = order.id, "voucher order placed");
            }
            Err(PurchaseError::Rejected(reason)) => {
                metrics::record_seckill_outcome(reason.as_str());
                debug!(%reason, "purchase rejected");
            }
            Err(e) => {
                metrics::record_seckill_outcome("error");
                match e.category() {
                    Some(category) => warn!(error = %e, %category, "purchase failed"),
                    None => warn!(error = %e, "purchase failed"),
                }
            }
        }
        result
    }

    async fn try_purchase(&self, user_id: i64, voucher_id: i64) -> Result<VoucherOrder, PurchaseError> {
        let voucher = self
            .vouchers
            .get_voucher(voucher_id)
            .await?
            .ok_or(PurchaseError::Rejected(RejectReason::VoucherNotFound))?;

        let now = OffsetDateTime::now_utc();
        if voucher.not_started_at(now) {
            return Err(PurchaseError::Rejected(RejectReason::WindowNotStarted));
        }
        if voucher.ended_at(now) {
            return Err(PurchaseError::Rejected(RejectReason::WindowEnded));
        }
        if voucher.stock < 1 {
            return Err(PurchaseError::Rejected(RejectReason::OutOfStock));
        }

        match self.config.order_guard {
            OrderGuard::Constraint => self.place(user_id, voucher_id).await,
            OrderGuard::UserLock => self.place_under_user_lock(user_id, voucher_id).await,
        }
    }

    async fn place_under_user_lock(
        &self,
        user_id: i64,
        voucher_id: i64,
    ) -> Result<VoucherOrder, PurchaseError> {
        let key = order_lock_key(user_id, voucher_id);
        let guard = self
            .lock
            .try_lock(&key, self.config.order_lock_ttl())
            .await
            .map_err(PurchaseError::Lock)?
            .ok_or(PurchaseError::Rejected(RejectReason::DuplicatePurchase))?;

        let result = self.check_and_place(user_id, voucher_id).await;

        if let Err(e) = guard.release().await {
            warn!(key = %key, error = %e, "failed to release order lock");
        }
        result
    }

    /// Check-then-place; only sound while the order lock is held.
    async fn check_and_place(
        &self,
        user_id: i64,
        voucher_id: i64,
    ) -> Result<VoucherOrder, PurchaseError> {
        if self.vouchers.count_orders(user_id, voucher_id).await? > 0 {
            return Err(PurchaseError::Rejected(RejectReason::DuplicatePurchase));
        }
        self.place(user_id, voucher_id).await
    }

    async fn place(&self, user_id: i64, voucher_id: i64) -> Result<VoucherOrder, PurchaseError> {
        let id = self.ids.next_id(&self.config.id_prefix).await?;
        let order = VoucherOrder::new(id, voucher_id, user_id);
        match self.vouchers.place_order(&order).await {
            Ok(PlaceOrderOutcome::Placed) => Ok(order),
            Ok(PlaceOrderOutcome::SoldOut) => {
                Err(PurchaseError::Rejected(RejectReason::OutOfStock))
            }
            Ok(PlaceOrderOutcome::Duplicate) => {
                Err(PurchaseError::Rejected(RejectReason::DuplicatePurchase))
            }
            // The voucher vanished between lookup and placement.
            Err(e) if e.is_not_found() => {
                Err(PurchaseError::Rejected(RejectReason::VoucherNotFound))
            }
            Err(e) => Err(e.into()),
        }
    }
}

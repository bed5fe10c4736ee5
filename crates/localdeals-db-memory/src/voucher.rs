//! In-memory voucher and order tables.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use localdeals_storage::{
    PlaceOrderOutcome, SeckillVoucher, StorageError, VoucherOrder, VoucherStore,
};

/// [`VoucherStore`] backed by two DashMaps.
///
/// `place_order` holds the voucher row's write guard for the whole
/// check-decrement-insert sequence, so stock is serialized per voucher while
/// different vouchers proceed independently. The order table is keyed by
/// `(user_id, voucher_id)`, which plays the role of the uniqueness constraint.
/// Lock order is always voucher row, then order slot.
#[derive(Clone, Debug, Default)]
pub struct InMemoryVoucherStore {
    vouchers: Arc<DashMap<i64, SeckillVoucher>>,
    orders: Arc<DashMap<(i64, i64), VoucherOrder>>,
}

impl InMemoryVoucherStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a voucher row.
    pub fn insert_voucher(&self, voucher: SeckillVoucher) {
        self.vouchers.insert(voucher.voucher_id, voucher);
    }

    /// Current stock of a voucher, if it exists.
    pub fn stock(&self, voucher_id: i64) -> Option<i32> {
        self.vouchers.get(&voucher_id).map(|v| v.stock)
    }

    /// All committed orders for a voucher.
    pub fn orders_for(&self, voucher_id: i64) -> Vec<VoucherOrder> {
        self.orders
            .iter()
            .filter(|entry| entry.value().voucher_id == voucher_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Total number of committed orders.
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[async_trait]
impl VoucherStore for InMemoryVoucherStore {
    async fn get_voucher(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>, StorageError> {
        Ok(self.vouchers.get(&voucher_id).map(|v| v.value().clone()))
    }

    async fn count_orders(&self, user_id: i64, voucher_id: i64) -> Result<i64, StorageError> {
        Ok(i64::from(self.orders.contains_key(&(user_id, voucher_id))))
    }

    async fn place_order(&self, order: &VoucherOrder) -> Result<PlaceOrderOutcome, StorageError> {
        let mut voucher = self
            .vouchers
            .get_mut(&order.voucher_id)
            .ok_or_else(|| StorageError::not_found("seckill_voucher", order.voucher_id.to_string()))?;

        match self.orders.entry((order.user_id, order.voucher_id)) {
            Entry::Occupied(_) => Ok(PlaceOrderOutcome::Duplicate),
            Entry::Vacant(slot) => {
                if voucher.stock <= 0 {
                    return Ok(PlaceOrderOutcome::SoldOut);
                }
                voucher.stock -= 1;
                slot.insert(order.clone());
                Ok(PlaceOrderOutcome::Placed)
            }
        }
    }
}

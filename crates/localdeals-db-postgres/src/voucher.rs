//! Voucher and order tables on PostgreSQL.

use async_trait::async_trait;
use localdeals_storage::{
    PlaceOrderOutcome, SeckillVoucher, StorageError, VoucherOrder, VoucherStore,
};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::error::from_sqlx;

/// [`VoucherStore`] over `tb_seckill_voucher` and `tb_voucher_order`.
#[derive(Clone, Debug)]
pub struct PgVoucherStore {
    pool: PgPool,
}

impl PgVoucherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a voucher row.
    pub async fn upsert_voucher(&self, voucher: &SeckillVoucher) -> Result<(), StorageError> {
        query(
            "INSERT INTO tb_seckill_voucher (voucher_id, stock, begin_time, end_time) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (voucher_id) DO UPDATE \
             SET stock = EXCLUDED.stock, begin_time = EXCLUDED.begin_time, \
                 end_time = EXCLUDED.end_time, update_time = now()",
        )
        .bind(voucher.voucher_id)
        .bind(voucher.stock)
        .bind(voucher.begin_time)
        .bind(voucher.end_time)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl VoucherStore for PgVoucherStore {
    async fn get_voucher(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>, StorageError> {
        let row: Option<(i64, i32, OffsetDateTime, OffsetDateTime)> = query_as(
            "SELECT voucher_id, stock, begin_time, end_time \
             FROM tb_seckill_voucher WHERE voucher_id = $1",
        )
        .bind(voucher_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        Ok(row.map(|(voucher_id, stock, begin_time, end_time)| SeckillVoucher {
            voucher_id,
            stock,
            begin_time,
            end_time,
        }))
    }

    async fn count_orders(&self, user_id: i64, voucher_id: i64) -> Result<i64, StorageError> {
        query_scalar(
            "SELECT COUNT(*) FROM tb_voucher_order WHERE user_id = $1 AND voucher_id = $2",
        )
        .bind(user_id)
        .bind(voucher_id)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)
    }

    /// Runs the dedup insert and the conditional decrement in one
    /// transaction. The voucher row is locked first so concurrent buyers of
    /// the same voucher queue on it; any early exit rolls back.
    #[instrument(skip(self, order), fields(voucher_id = order.voucher_id, user_id = order.user_id))]
    async fn place_order(&self, order: &VoucherOrder) -> Result<PlaceOrderOutcome, StorageError> {
        let mut tx = self.pool.begin().await.map_err(from_sqlx)?;

        let locked: Option<i64> = query_scalar(
            "SELECT voucher_id FROM tb_seckill_voucher WHERE voucher_id = $1 FOR UPDATE",
        )
        .bind(order.voucher_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(from_sqlx)?;
        if locked.is_none() {
            tx.rollback().await.map_err(from_sqlx)?;
            return Err(StorageError::not_found(
                "seckill_voucher",
                order.voucher_id.to_string(),
            ));
        }

        let inserted = query(
            "INSERT INTO tb_voucher_order (id, user_id, voucher_id, create_time) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, voucher_id) DO NOTHING",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.voucher_id)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(from_sqlx)?
        .rows_affected();
        if inserted == 0 {
            tx.rollback().await.map_err(from_sqlx)?;
            debug!("order already exists for user");
            return Ok(PlaceOrderOutcome::Duplicate);
        }

        let decremented = query(
            "UPDATE tb_seckill_voucher SET stock = stock - 1, update_time = now() \
             WHERE voucher_id = $1 AND stock > 0",
        )
        .bind(order.voucher_id)
        .execute(&mut *tx)
        .await
        .map_err(from_sqlx)?
        .rows_affected();
        if decremented == 0 {
            tx.rollback().await.map_err(from_sqlx)?;
            debug!("voucher sold out");
            return Ok(PlaceOrderOutcome::SoldOut);
        }

        tx.commit().await.map_err(from_sqlx)?;
        Ok(PlaceOrderOutcome::Placed)
    }
}

//! Shop table on PostgreSQL.

use async_trait::async_trait;
use localdeals_storage::{Shop, ShopStore, StorageError};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgPool;

use crate::error::from_sqlx;

type ShopRow = (i64, String, i64, Option<String>, String, i64, i32, f64, f64);

/// [`ShopStore`] over `tb_shop`.
#[derive(Clone, Debug)]
pub struct PgShopStore {
    pool: PgPool,
}

impl PgShopStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new shop row.
    pub async fn insert_shop(&self, shop: &Shop) -> Result<(), StorageError> {
        query(
            "INSERT INTO tb_shop (id, name, type_id, area, address, avg_price, score, x, y) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(shop.id)
        .bind(&shop.name)
        .bind(shop.type_id)
        .bind(&shop.area)
        .bind(&shop.address)
        .bind(shop.avg_price)
        .bind(shop.score)
        .bind(shop.x)
        .bind(shop.y)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }
}

fn shop_from_row(row: ShopRow) -> Shop {
    let (id, name, type_id, area, address, avg_price, score, x, y) = row;
    Shop {
        id,
        name,
        type_id,
        area,
        address,
        avg_price,
        score,
        x,
        y,
    }
}

#[async_trait]
impl ShopStore for PgShopStore {
    async fn get_shop(&self, id: i64) -> Result<Option<Shop>, StorageError> {
        let row: Option<ShopRow> = query_as(
            "SELECT id, name, type_id, area, address, avg_price, score, x, y \
             FROM tb_shop WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(row.map(shop_from_row))
    }

    async fn update_shop(&self, shop: &Shop) -> Result<(), StorageError> {
        let affected = query(
            "UPDATE tb_shop SET name = $2, type_id = $3, area = $4, address = $5, \
             avg_price = $6, score = $7, x = $8, y = $9, update_time = now() \
             WHERE id = $1",
        )
        .bind(shop.id)
        .bind(&shop.name)
        .bind(shop.type_id)
        .bind(&shop.area)
        .bind(&shop.address)
        .bind(shop.avg_price)
        .bind(shop.score)
        .bind(shop.x)
        .bind(shop.y)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?
        .rows_affected();

        if affected == 0 {
            return Err(StorageError::not_found("shop", shop.id.to_string()));
        }
        Ok(())
    }
}

//! PostgreSQL backend for localdeals.
//!
//! Implements [`VoucherStore`](localdeals_storage::VoucherStore) and
//! [`ShopStore`](localdeals_storage::ShopStore) on top of sqlx.
//!
//! # Example
//!
//! ```ignore
//! use localdeals_db_postgres::{create_pool, PgVoucherStore, PostgresConfig};
//!
//! let pool = create_pool(&PostgresConfig::new("postgres://deals:pw@localhost/localdeals")).await?;
//! let vouchers = PgVoucherStore::new(pool.clone());
//! ```
//!
//! # Modules
//!
//! - [`config`]: pool settings
//! - [`pool`]: pool creation, health check
//! - [`migrations`]: embedded schema migrations
//! - [`voucher`]: vouchers and the transactional order insert
//! - [`shop`]: shop listings

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod shop;
pub mod voucher;

pub use config::PostgresConfig;
pub use error::{PostgresError, Result};
pub use pool::{create_pool, mask_password, ping};
pub use shop::PgShopStore;
pub use voucher::PgVoucherStore;

pub use sqlx_postgres::PgPool;

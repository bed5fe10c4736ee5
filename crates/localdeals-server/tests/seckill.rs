//! Flash-sale pipeline under concurrent buyers.

use std::sync::Arc;

use localdeals_db_memory::{InMemoryShopStore, InMemoryVoucherStore};
use localdeals_server::{AppConfig, AppState, OrderGuard, PurchaseError, RejectReason};
use localdeals_storage::{SeckillVoucher, UserContext};
use time::{Duration, OffsetDateTime};

fn open_voucher(id: i64, stock: i32) -> SeckillVoucher {
    let now = OffsetDateTime::now_utc();
    SeckillVoucher::new(id, stock, now - Duration::hours(1), now + Duration::hours(1))
}

fn state(guard: OrderGuard, vouchers: &InMemoryVoucherStore) -> AppState {
    let mut config = AppConfig::default();
    config.seckill.order_guard = guard;
    AppState::in_memory(&config, vouchers.clone(), InMemoryShopStore::new())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_unit_goes_to_exactly_one_buyer() {
    for guard in [OrderGuard::Constraint, OrderGuard::UserLock] {
        let vouchers = InMemoryVoucherStore::new();
        vouchers.insert_voucher(open_voucher(1, 1));
        let state = state(guard, &vouchers);

        let a = {
            let seckill = state.seckill.clone();
            tokio::spawn(async move { seckill.purchase(&UserContext::new(100), 1).await })
        };
        let b = {
            let seckill = state.seckill.clone();
            tokio::spawn(async move { seckill.purchase(&UserContext::new(200), 1).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let placed = results.iter().filter(|r| r.is_ok()).count();
        let sold_out = results
            .iter()
            .filter(|r| matches!(r, Err(PurchaseError::Rejected(RejectReason::OutOfStock))))
            .count();
        assert_eq!((placed, sold_out), (1, 1), "guard {guard:?}");
        assert_eq!(vouchers.stock(1), Some(0));
        assert_eq!(vouchers.order_count(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_racing_gets_one_order() {
    for guard in [OrderGuard::Constraint, OrderGuard::UserLock] {
        let vouchers = InMemoryVoucherStore::new();
        vouchers.insert_voucher(open_voucher(1, 10));
        let state = state(guard, &vouchers);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let seckill = state.seckill.clone();
            handles.push(tokio::spawn(async move {
                seckill.purchase(&UserContext::new(42), 1).await
            }));
        }

        let mut placed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => placed += 1,
                Err(e) => assert_eq!(e.reason(), Some(RejectReason::DuplicatePurchase)),
            }
        }
        assert_eq!(placed, 1, "guard {guard:?}");
        assert_eq!(vouchers.stock(1), Some(9));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_orders_plus_stock_equals_initial_stock() {
    let vouchers = InMemoryVoucherStore::new();
    vouchers.insert_voucher(open_voucher(1, 25));
    let state = Arc::new(state(OrderGuard::Constraint, &vouchers));

    let mut handles = Vec::new();
    for user_id in 0..200i64 {
        let state = Arc::clone(&state);
        // Every buyer tries twice.
        handles.push(tokio::spawn(async move {
            let ctx = UserContext::new(user_id % 100);
            let _ = state.seckill.purchase(&ctx, 1).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let orders = vouchers.orders_for(1);
    let stock = vouchers.stock(1).unwrap();
    assert_eq!(orders.len() as i32 + stock, 25);
    assert_eq!(stock, 0);

    let mut users: Vec<i64> = orders.iter().map(|o| o.user_id).collect();
    users.sort_unstable();
    users.dedup();
    assert_eq!(users.len(), orders.len());

    let mut ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), orders.len());
}

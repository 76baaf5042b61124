//! Lock-contention handling against a real database. Runs only when `TEST_DATABASE_URL` is set.
//!
//! Kept in its own test binary: terminating lock holders on `raw_prices` would otherwise hit
//! writers from the other database tests.

use chrono::NaiveDate;
use sqlx::{Connection, PgConnection, PgPool};
use std::time::Duration;
use stockview_core::domain::price::{PriceHistory, PriceRecord};
use stockview_core::storage::{self, contention, prices};
use stockview_core::time::range::DateRange;

fn trade_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 3, 5).unwrap()
}

fn single_day(ticker: &str, close: f64) -> (DateRange, PriceHistory) {
    let range = DateRange::new(trade_date(), trade_date()).unwrap();
    let history = PriceHistory {
        ticker: ticker.to_string(),
        records: vec![PriceRecord {
            ticker: ticker.to_string(),
            trade_date: trade_date(),
            open: None,
            high: None,
            low: None,
            close,
            volume: 100,
        }],
    };
    (range, history)
}

async fn stored_close(pool: &PgPool, ticker: &str) -> Option<f64> {
    sqlx::query_scalar("SELECT close FROM raw_prices WHERE ticker = $1 AND trade_date = $2")
        .bind(ticker)
        .bind(trade_date())
        .fetch_optional(pool)
        .await
        .unwrap()
}

async fn session_alive(pool: &PgPool, pid: i32) -> bool {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_stat_activity WHERE pid = $1)")
        .bind(pid)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn wait_until_gone(pool: &PgPool, pid: i32) -> bool {
    for _ in 0..50 {
        if !session_alive(pool, pid).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

async fn backend_pid(conn: &mut PgConnection) -> i32 {
    sqlx::query_scalar("SELECT pg_backend_pid()")
        .fetch_one(conn)
        .await
        .unwrap()
}

async fn blocked_write_outside_the_given_tables_stays_fatal(
    url: &str,
    pool: &PgPool,
    ticker: &str,
) {
    let mut blocker = PgConnection::connect(url).await.unwrap();
    let pid = backend_pid(&mut blocker).await;
    let mut held = blocker.begin().await.unwrap();
    sqlx::query("UPDATE raw_prices SET volume = volume + 1 WHERE ticker = $1")
        .bind(ticker)
        .execute(&mut *held)
        .await
        .unwrap();

    // The write touches raw_prices, but only ticker_metadata holders may be terminated, so
    // nothing is terminated and the retry times out again.
    let delete_row = move || async move {
        let mut tx = contention::begin_write(pool).await?;
        let n = sqlx::query("DELETE FROM raw_prices WHERE ticker = $1")
            .bind(ticker)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok::<u64, sqlx::Error>(n)
    };
    let result =
        contention::with_contention_retry(pool, &["ticker_metadata"], "delete row", delete_row)
            .await;

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("still blocked"), "{err:#}");
    assert!(session_alive(pool, pid).await);
    assert_eq!(stored_close(pool, ticker).await, Some(10.0));

    held.rollback().await.unwrap();
}

async fn blocking_session_is_terminated_and_write_retried(
    url: &str,
    pool: &PgPool,
    ticker: &str,
) {
    let mut blocker = PgConnection::connect(url).await.unwrap();
    let pid = backend_pid(&mut blocker).await;
    let mut held = blocker.begin().await.unwrap();
    sqlx::query("UPDATE raw_prices SET volume = volume + 1 WHERE ticker = $1")
        .bind(ticker)
        .execute(&mut *held)
        .await
        .unwrap();

    let (range, history) = single_day(ticker, 11.0);
    let written = prices::replace_histories(pool, range, &[history])
        .await
        .unwrap();

    assert_eq!(written, 1);
    assert!(wait_until_gone(pool, pid).await, "blocking session {pid} still alive");
    assert_eq!(stored_close(pool, ticker).await, Some(11.0));

    drop(held);
}

#[tokio::test]
async fn blocked_writes_terminate_only_holders_on_their_own_tables() {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        return;
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect TEST_DATABASE_URL");
    storage::migrate(&pool).await.unwrap();

    let id = uuid::Uuid::new_v4().simple().to_string();
    let ticker = format!("CT{}", &id[..8]).to_ascii_uppercase();
    let (range, history) = single_day(&ticker, 10.0);
    prices::replace_histories(&pool, range, &[history])
        .await
        .unwrap();

    // Sequential: the second case terminates every raw_prices writer.
    blocked_write_outside_the_given_tables_stays_fatal(&url, &pool, &ticker).await;
    blocking_session_is_terminated_and_write_retried(&url, &pool, &ticker).await;

    sqlx::query("DELETE FROM raw_prices WHERE ticker = $1")
        .bind(&ticker)
        .execute(&pool)
        .await
        .unwrap();
}

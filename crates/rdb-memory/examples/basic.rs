//! Basic usage of the rdb client contract over the in-memory driver.
//!
//! Run with:
//!   RUST_LOG=debug cargo run -p rdb-memory --example basic

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::print_stdout)]

use rdb_client::{
    CancellationToken, Command, Config, Error, IsolationLevel, Output, Param, Pool, Queryer,
    Transaction,
};
use rdb_memory::MemoryServer;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    MemoryServer::builder("inventory")
        .with_kv_procedures()
        .build()
        .register();

    let config: Config = "memory://localhost/inventory?init_cap=1&max_cap=4&idle_timeout=30s"
        .parse()?;
    let pool = rdb_memory::open(&config).await?;
    let cancel = CancellationToken::new();

    // Write two rows in one transaction
    let put = Command::new("put").with_prepare(true);
    let mut tx = pool.begin(&cancel, IsolationLevel::Serializable).await?;
    for (key, qty) in [("item:apple", 3), ("item:pear", 7)] {
        let mut next = tx
            .query(&cancel, &put, vec![Param::named("key", key), Param::named("value", qty)])
            .await?;
        while next.result(&cancel).await.is_ok() {}
    }
    tx.commit(&cancel).await?;

    // Stream them back
    let mut next = pool
        .query(&cancel, &Command::new("scan"), vec![Param::new("item:")])
        .await?;
    let rows = next.buffer(&cancel).await?;
    for row in &rows {
        let key: String = row.get("key")?;
        let qty: i32 = row.get("value")?;
        println!("{key} = {qty}");
    }
    drop(next);

    // Output parameters become readable once the query is drained
    let deleted = Output::new();
    let mut next = pool
        .query(
            &cancel,
            &Command::new("delete"),
            vec![Param::new("item:pear"), Param::new(false).with_output(&deleted)],
        )
        .await?;
    while next.result(&cancel).await.is_ok() {}
    println!("deleted item:pear: {}", deleted.get::<bool>()?);

    let status = pool.status();
    println!(
        "pool: {} total, {} idle, {} in use",
        status.total, status.idle, status.in_use
    );

    pool.close().await;
    Ok(())
}

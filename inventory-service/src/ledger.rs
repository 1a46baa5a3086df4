//! Per-product stock counters kept in `stock_ledger`.
//!
//! `reserved_quantity` is only ever written through these functions, and
//! only from inside a transaction opened by the Postgres store.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::warn;
use uuid::Uuid;

use crate::models::StockLedgerEntry;
use crate::schema::stock_ledger;

/// Adds `delta` to the reserved counter only while enough stock is left.
/// Returns `false` when the guard did not match, i.e. someone else consumed
/// the stock between our read and this write.
pub async fn increase_reserved(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    delta: i32,
) -> QueryResult<bool> {
    let updated = diesel::update(
        stock_ledger::table
            .filter(stock_ledger::product_id.eq(product_id))
            .filter((stock_ledger::total_quantity - stock_ledger::reserved_quantity).ge(delta)),
    )
    .set(stock_ledger::reserved_quantity.eq(stock_ledger::reserved_quantity + delta))
    .execute(conn)
    .await?;

    Ok(updated == 1)
}

/// Subtracts `delta` from the reserved counter, clamping at zero.
pub async fn decrease_reserved(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    delta: i32,
) -> QueryResult<()> {
    let entry = stock_ledger::table
        .find(product_id)
        .for_update()
        .first::<StockLedgerEntry>(conn)
        .await
        .optional()?;

    let Some(entry) = entry else {
        warn!(%product_id, delta, "Ledger row missing while releasing reserved stock");
        return Ok(());
    };

    let next = clamped_release(product_id, entry.reserved_quantity, delta);

    diesel::update(stock_ledger::table.find(product_id))
        .set(stock_ledger::reserved_quantity.eq(next))
        .execute(conn)
        .await?;

    Ok(())
}

/// New reserved value after releasing `delta`. Going below zero means the
/// counter drifted from the line items somewhere else; the value is clamped
/// and the drift logged.
pub fn clamped_release(product_id: Uuid, reserved: i32, delta: i32) -> i32 {
    if delta > reserved {
        warn!(
            %product_id,
            reserved,
            delta,
            "Reserved quantity would go negative, clamping to zero"
        );
        0
    } else {
        reserved - delta
    }
}

//! Reservation line items kept in `reservation_line_items`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::models::{LineItem, LineStatus, NewLineItem};
use crate::schema::reservation_line_items;

pub async fn insert_batch(conn: &mut AsyncPgConnection, items: &[NewLineItem]) -> QueryResult<usize> {
    diesel::insert_into(reservation_line_items::table)
        .values(items)
        .execute(conn)
        .await
}

pub async fn find_active_by_reservation_id(
    conn: &mut AsyncPgConnection,
    reservation_id: &str,
) -> QueryResult<Vec<LineItem>> {
    reservation_line_items::table
        .filter(reservation_line_items::reservation_id.eq(reservation_id))
        .filter(reservation_line_items::status.eq(LineStatus::Active.as_str()))
        .order((reservation_line_items::created_at.asc(), reservation_line_items::id.asc()))
        .load::<LineItem>(conn)
        .await
}

pub async fn find_by_reservation_id(
    conn: &mut AsyncPgConnection,
    reservation_id: &str,
) -> QueryResult<Vec<LineItem>> {
    reservation_line_items::table
        .filter(reservation_line_items::reservation_id.eq(reservation_id))
        .order((reservation_line_items::created_at.asc(), reservation_line_items::id.asc()))
        .load::<LineItem>(conn)
        .await
}

pub async fn find_expired(
    conn: &mut AsyncPgConnection,
    before: DateTime<Utc>,
    limit: i64,
) -> QueryResult<Vec<LineItem>> {
    reservation_line_items::table
        .filter(reservation_line_items::status.eq(LineStatus::Active.as_str()))
        .filter(reservation_line_items::expires_at.lt(before))
        .order(reservation_line_items::expires_at.asc())
        .limit(limit)
        .load::<LineItem>(conn)
        .await
}

/// Moves the given rows out of ACTIVE. Rows that are no longer ACTIVE are
/// left alone, and only the rows actually transitioned are returned.
pub async fn mark_status(
    conn: &mut AsyncPgConnection,
    ids: &[Uuid],
    status: LineStatus,
) -> QueryResult<Vec<LineItem>> {
    diesel::update(
        reservation_line_items::table
            .filter(reservation_line_items::id.eq_any(ids.to_vec()))
            .filter(reservation_line_items::status.eq(LineStatus::Active.as_str())),
    )
    .set((
        reservation_line_items::status.eq(status.as_str()),
        reservation_line_items::updated_at.eq(Some(Utc::now())),
    ))
    .get_results::<LineItem>(conn)
    .await
}

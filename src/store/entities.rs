//! Entity rows and their search tokens. Every function takes the connection
//! of an open [`StoreTx`](super::StoreTx) unless noted.

use std::collections::BTreeSet;

use sqlx::SqliteConnection;

use crate::model::{Entity, EntityKind};
use crate::AppResult;

pub fn decode<E: Entity>(doc: &str) -> AppResult<E> {
    serde_json::from_str(doc).map_err(|e| {
        crate::AppError::from(e).with_context("entity", E::KIND.as_str())
    })
}

pub async fn load<E: Entity>(conn: &mut SqliteConnection, id: &str) -> AppResult<Option<E>> {
    let table = E::KIND.table().name();
    let raw: Option<String> = sqlx::query_scalar(&format!("SELECT doc FROM {table} WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    raw.map(|doc| decode::<E>(&doc)).transpose()
}

/// Insert or replace the record's row. `created_at` of an existing row is
/// left untouched.
pub async fn upsert<E: Entity>(conn: &mut SqliteConnection, record: &E) -> AppResult<()> {
    let kind = E::KIND;
    let table = kind.table().name();
    let columns = kind.index_columns();
    let values = record.index_values();
    debug_assert_eq!(columns.len(), values.len());

    let mut insert_cols = String::from("id, created_at, updated_at, dup_key, doc");
    let mut placeholders = String::from("?, ?, ?, ?, ?");
    let mut updates =
        String::from("updated_at = excluded.updated_at, dup_key = excluded.dup_key, doc = excluded.doc");
    for column in columns {
        insert_cols.push_str(", ");
        insert_cols.push_str(column);
        placeholders.push_str(", ?");
        updates.push_str(&format!(", {column} = excluded.{column}"));
    }
    let sql = format!(
        "INSERT INTO {table} ({insert_cols}) VALUES ({placeholders}) \
         ON CONFLICT(id) DO UPDATE SET {updates}"
    );

    let header = record.header();
    let doc = serde_json::to_string(record)?;
    let mut query = sqlx::query(&sql)
        .bind(&header.id)
        .bind(&header.created_at)
        .bind(&header.updated_at)
        .bind(record.duplicate_key().map(|k| k.as_str().to_string()))
        .bind(doc);
    for value in values {
        query = query.bind(value);
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

/// Rewrite the multi-valued token index for one record.
pub async fn replace_tokens(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: &str,
    tokens: &BTreeSet<String>,
) -> AppResult<()> {
    sqlx::query("DELETE FROM search_tokens WHERE entity_type = ? AND entity_id = ?")
        .bind(kind.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    for token in tokens {
        sqlx::query("INSERT INTO search_tokens (entity_type, entity_id, token) VALUES (?, ?, ?)")
            .bind(kind.as_str())
            .bind(id)
            .bind(token)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Remove a record and its tokens. Returns whether a row existed.
pub async fn delete<E: Entity>(conn: &mut SqliteConnection, id: &str) -> AppResult<bool> {
    let table = E::KIND.table().name();
    let removed = sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    replace_tokens(conn, E::KIND, id, &BTreeSet::new()).await?;
    Ok(removed > 0)
}

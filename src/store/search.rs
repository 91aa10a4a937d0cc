use sqlx::{Row, SqlitePool};

use super::entities::decode;
use crate::model::Entity;
use crate::tokenize::{fold_normalized, query_tokens};
use crate::AppResult;

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub(super) async fn recent<E: Entity>(pool: &SqlitePool, limit: usize) -> AppResult<Vec<E>> {
    let table = E::KIND.table().name();
    let rows = sqlx::query(&format!(
        "SELECT doc FROM {table} ORDER BY updated_at DESC, rowid DESC LIMIT ?"
    ))
    .bind(limit.max(1) as i64)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| decode::<E>(&row.try_get::<String, _>("doc")?))
        .collect()
}

pub(super) async fn search<E: Entity>(
    pool: &SqlitePool,
    query: &str,
    limit: usize,
) -> AppResult<Vec<E>> {
    let tokens = query_tokens(query);
    let Some(first) = tokens.first() else {
        return recent::<E>(pool, limit).await;
    };

    let table = E::KIND.table().name();
    let rows = sqlx::query(&format!(
        "SELECT doc FROM {table} WHERE id IN \
         (SELECT entity_id FROM search_tokens WHERE entity_type = ? AND token LIKE ? ESCAPE '\\') \
         ORDER BY updated_at DESC, rowid DESC"
    ))
    .bind(E::KIND.as_str())
    .bind(format!("{}%", escape_like(first)))
    .fetch_all(pool)
    .await?;

    let needle = tokens.join(" ");
    let mut hits = Vec::new();
    for row in rows {
        let record = decode::<E>(&row.try_get::<String, _>("doc")?)?;
        let haystack = fold_normalized(&record.search_fields().join(" "));
        if haystack.contains(&needle) {
            hits.push(record);
            if hits.len() >= limit.max(1) {
                break;
            }
        }
    }
    tracing::debug!(
        target: "barangay_desk",
        event = "search",
        entity = E::KIND.as_str(),
        hits = hits.len()
    );
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_OFF\\"), "50\\%\\_OFF\\\\");
        assert_eq!(escape_like("CRUZ"), "CRUZ");
    }
}

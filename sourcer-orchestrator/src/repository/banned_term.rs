//! Banned Term Repository

use sourcer_core::domain::safety::BannedTerm;
use sqlx::PgPool;

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM banned_terms")
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// List all banned terms in insertion order
pub async fn list_all(pool: &PgPool) -> Result<Vec<BannedTerm>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BannedTermRow>(
        r#"
        SELECT term, reason, category
        FROM banned_terms
        ORDER BY created_at ASC, term ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Insert a term, or update reason and category of an existing one
pub async fn upsert(pool: &PgPool, term: &BannedTerm) -> Result<BannedTerm, sqlx::Error> {
    let row = sqlx::query_as::<_, BannedTermRow>(
        r#"
        INSERT INTO banned_terms (term, reason, category)
        VALUES ($1, $2, $3)
        ON CONFLICT (term) DO UPDATE
        SET reason = EXCLUDED.reason, category = EXCLUDED.category
        RETURNING term, reason, category
        "#,
    )
    .bind(&term.term)
    .bind(&term.reason)
    .bind(&term.category)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

#[derive(sqlx::FromRow)]
struct BannedTermRow {
    term: String,
    reason: String,
    category: String,
}

impl From<BannedTermRow> for BannedTerm {
    fn from(row: BannedTermRow) -> Self {
        BannedTerm {
            term: row.term,
            reason: row.reason,
            category: row.category,
        }
    }
}

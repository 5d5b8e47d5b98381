use std::sync::OnceLock;

use sqlx::{PgExecutor, PgPool};

use crate::models::{Security, SecurityInput};

const SELECT_COLUMNS: &str = "id, company_code, company_name, prowess_company_code, cin_code, \
     isin_code, nse_symbol, bse_scrip_code, industry_group, main_product_service_group, \
     company_website_address, registered_office_pincode, \
     date_1, shares_outstanding_1, market_capitalisation_1, face_value_1, shares_traded_1, beta, \
     date_2, shares_outstanding_2, market_capitalisation_2, face_value_2, shares_traded_2, \
     created_at, updated_at";

/// Columns written by an upsert, in bind order.
const UPSERT_COLUMNS: [&str; 22] = [
    "company_code",
    "company_name",
    "prowess_company_code",
    "cin_code",
    "isin_code",
    "nse_symbol",
    "bse_scrip_code",
    "industry_group",
    "main_product_service_group",
    "company_website_address",
    "registered_office_pincode",
    "date_1",
    "shares_outstanding_1",
    "market_capitalisation_1",
    "face_value_1",
    "shares_traded_1",
    "beta",
    "date_2",
    "shares_outstanding_2",
    "market_capitalisation_2",
    "face_value_2",
    "shares_traded_2",
];

/// Advisory lock key guarding the daily upsert pipeline.
pub const PIPELINE_LOCK_KEY: i64 = 7_302_019_455;

fn upsert_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        let columns = UPSERT_COLUMNS.join(", ");
        let placeholders = (1..=UPSERT_COLUMNS.len())
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(", ");
        // an incoming NULL never overwrites a stored value
        let assignments = UPSERT_COLUMNS
            .iter()
            .filter(|c| **c != "isin_code")
            .map(|c| format!("{c} = COALESCE(EXCLUDED.{c}, securities.{c})"))
            .collect::<Vec<_>>()
            .join(",\n                ");
        format!(
            r#"
            INSERT INTO securities ({columns})
            VALUES ({placeholders})
            ON CONFLICT (isin_code) DO UPDATE SET
                {assignments},
                updated_at = GREATEST(NOW(), securities.updated_at)
            RETURNING {SELECT_COLUMNS}
            "#
        )
    })
}

/// Escape LIKE wildcards so user fragments match literally.
pub fn like_escape(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len() + 2);
    for c in fragment.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub async fn fetch_by_isin(pool: &PgPool, isin: &str) -> Result<Option<Security>, sqlx::Error> {
    sqlx::query_as::<_, Security>(&format!(
        "SELECT {SELECT_COLUMNS} FROM securities WHERE isin_code = $1 ORDER BY id LIMIT 1"
    ))
    .bind(isin)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_by_nse_symbol(pool: &PgPool, symbol: &str) -> Result<Option<Security>, sqlx::Error> {
    sqlx::query_as::<_, Security>(&format!(
        "SELECT {SELECT_COLUMNS} FROM securities WHERE UPPER(nse_symbol) = UPPER($1) ORDER BY id LIMIT 1"
    ))
    .bind(symbol)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_by_bse_code(pool: &PgPool, code: &str) -> Result<Option<Security>, sqlx::Error> {
    sqlx::query_as::<_, Security>(&format!(
        "SELECT {SELECT_COLUMNS} FROM securities WHERE bse_scrip_code = $1 ORDER BY id LIMIT 1"
    ))
    .bind(code)
    .fetch_optional(pool)
    .await
}

pub async fn search_by_company_name(
    pool: &PgPool,
    fragment: &str,
    limit: i64,
) -> Result<Vec<Security>, sqlx::Error> {
    sqlx::query_as::<_, Security>(&format!(
        r#"
        SELECT {SELECT_COLUMNS}
        FROM securities
        WHERE company_name ILIKE '%' || $1 || '%'
        ORDER BY id ASC
        LIMIT $2
        "#
    ))
    .bind(like_escape(fragment))
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn search_by_industry(
    pool: &PgPool,
    industry: &str,
    limit: i64,
) -> Result<Vec<Security>, sqlx::Error> {
    sqlx::query_as::<_, Security>(&format!(
        r#"
        SELECT {SELECT_COLUMNS}
        FROM securities
        WHERE industry_group ILIKE '%' || $1 || '%'
        ORDER BY id ASC
        LIMIT $2
        "#
    ))
    .bind(like_escape(industry))
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn free_text_search(
    pool: &PgPool,
    term: &str,
    limit: i64,
) -> Result<Vec<Security>, sqlx::Error> {
    sqlx::query_as::<_, Security>(&format!(
        r#"
        SELECT {SELECT_COLUMNS}
        FROM securities
        WHERE company_name ILIKE '%' || $1 || '%'
           OR nse_symbol ILIKE '%' || $1 || '%'
           OR bse_scrip_code LIKE $1 || '%'
        ORDER BY id ASC
        LIMIT $2
        "#
    ))
    .bind(like_escape(term))
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn fetch_page(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Security>, sqlx::Error> {
    sqlx::query_as::<_, Security>(&format!(
        "SELECT {SELECT_COLUMNS} FROM securities ORDER BY id ASC LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM securities")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Insert or merge one row keyed on ISIN. Runs on any executor so the batch
/// path can call it inside a savepoint.
pub async fn upsert<'e, E>(executor: E, input: &SecurityInput) -> Result<Security, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Security>(upsert_sql())
        .bind(&input.company_code)
        .bind(&input.company_name)
        .bind(&input.prowess_company_code)
        .bind(&input.cin_code)
        .bind(&input.isin_code)
        .bind(&input.nse_symbol)
        .bind(&input.bse_scrip_code)
        .bind(&input.industry_group)
        .bind(&input.main_product_service_group)
        .bind(&input.company_website_address)
        .bind(&input.registered_office_pincode)
        .bind(input.date_1)
        .bind(&input.shares_outstanding_1)
        .bind(&input.market_capitalisation_1)
        .bind(&input.face_value_1)
        .bind(&input.shares_traded_1)
        .bind(&input.beta)
        .bind(input.date_2)
        .bind(&input.shares_outstanding_2)
        .bind(&input.market_capitalisation_2)
        .bind(&input.face_value_2)
        .bind(&input.shares_traded_2)
        .fetch_one(executor)
        .await
}

pub async fn try_advisory_lock<'e, E>(executor: E, key: i64) -> Result<bool, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .bind(key)
        .fetch_one(executor)
        .await?;
    Ok(locked)
}

pub async fn advisory_unlock<'e, E>(executor: E, key: i64) -> Result<bool, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let (released,): (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
        .bind(key)
        .fetch_one(executor)
        .await?;
    Ok(released)
}

pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(like_escape("infosys"), "infosys");
    }

    #[test]
    fn test_upsert_sql_merges_with_coalesce() {
        let sql = upsert_sql();
        assert!(sql.contains("ON CONFLICT (isin_code) DO UPDATE"));
        assert!(sql.contains("company_name = COALESCE(EXCLUDED.company_name, securities.company_name)"));
        assert!(sql.contains("beta = COALESCE(EXCLUDED.beta, securities.beta)"));
        assert!(!sql.contains("isin_code = COALESCE"));
        assert!(sql.contains("$22"));
        assert!(!sql.contains("$23"));
    }
}

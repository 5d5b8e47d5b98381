use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::db::security_queries::{self, PIPELINE_LOCK_KEY};
use crate::errors::RepositoryError;
use crate::models::{Security, SecurityInput};

pub type RowOutcome = Result<Security, RepositoryError>;

/// Storage seam for the `securities` table.
#[async_trait]
pub trait SecurityRepository: Send + Sync {
    async fn get_by_isin(&self, isin: &str) -> Result<Option<Security>, RepositoryError>;

    async fn get_by_nse_symbol(&self, symbol: &str) -> Result<Option<Security>, RepositoryError>;

    async fn get_by_bse_code(&self, code: &str) -> Result<Option<Security>, RepositoryError>;

    /// ISIN, then NSE symbol, then BSE code. At most one row.
    async fn get_by_identifier(&self, key: &str) -> Result<Option<Security>, RepositoryError> {
        if let Some(found) = self.get_by_isin(key).await? {
            return Ok(Some(found));
        }
        if let Some(found) = self.get_by_nse_symbol(key).await? {
            return Ok(Some(found));
        }
        self.get_by_bse_code(key).await
    }

    async fn search_by_company_name(&self, fragment: &str, limit: i64) -> Result<Vec<Security>, RepositoryError>;

    async fn search_by_industry(&self, industry: &str, limit: i64) -> Result<Vec<Security>, RepositoryError>;

    async fn free_text_search(&self, term: &str, limit: i64) -> Result<Vec<Security>, RepositoryError>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Security>, RepositoryError>;

    async fn count(&self) -> Result<i64, RepositoryError>;

    async fn upsert(&self, input: SecurityInput) -> Result<Security, RepositoryError>;

    /// Upsert many rows in one transaction. A failing row is rolled back on
    /// its own and reported in place; the others still commit.
    async fn upsert_batch(&self, inputs: Vec<SecurityInput>) -> Result<Vec<RowOutcome>, RepositoryError>;

    /// Returns false when another pipeline run holds the lock.
    async fn try_acquire_run_lock(&self) -> Result<bool, RepositoryError>;

    async fn release_run_lock(&self) -> Result<(), RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}

fn classify(isin: &str, err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() || db_err.is_check_violation() || db_err.is_foreign_key_violation() {
            return RepositoryError::Conflict {
                isin: isin.to_string(),
                message: db_err.message().to_string(),
            };
        }
    }
    RepositoryError::Database(err)
}

pub struct PgSecurityRepository {
    pool: PgPool,
    // advisory locks are per session, so the holder keeps its connection
    lock_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgSecurityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_conn: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SecurityRepository for PgSecurityRepository {
    async fn get_by_isin(&self, isin: &str) -> Result<Option<Security>, RepositoryError> {
        Ok(security_queries::fetch_by_isin(&self.pool, isin).await?)
    }

    async fn get_by_nse_symbol(&self, symbol: &str) -> Result<Option<Security>, RepositoryError> {
        Ok(security_queries::fetch_by_nse_symbol(&self.pool, symbol).await?)
    }

    async fn get_by_bse_code(&self, code: &str) -> Result<Option<Security>, RepositoryError> {
        Ok(security_queries::fetch_by_bse_code(&self.pool, code).await?)
    }

    async fn search_by_company_name(&self, fragment: &str, limit: i64) -> Result<Vec<Security>, RepositoryError> {
        Ok(security_queries::search_by_company_name(&self.pool, fragment, limit).await?)
    }

    async fn search_by_industry(&self, industry: &str, limit: i64) -> Result<Vec<Security>, RepositoryError> {
        Ok(security_queries::search_by_industry(&self.pool, industry, limit).await?)
    }

    async fn free_text_search(&self, term: &str, limit: i64) -> Result<Vec<Security>, RepositoryError> {
        Ok(security_queries::free_text_search(&self.pool, term, limit).await?)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Security>, RepositoryError> {
        Ok(security_queries::fetch_page(&self.pool, limit, offset).await?)
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        Ok(security_queries::count(&self.pool).await?)
    }

    async fn upsert(&self, input: SecurityInput) -> Result<Security, RepositoryError> {
        let isin = input.isin().ok_or(RepositoryError::MissingIsin)?.to_string();
        let security = security_queries::upsert(&self.pool, &input)
            .await
            .map_err(|e| classify(&isin, e))?;
        debug!("Upserted security {} (id {})", isin, security.id);
        Ok(security)
    }

    async fn upsert_batch(&self, inputs: Vec<SecurityInput>) -> Result<Vec<RowOutcome>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin upsert batch transaction: {}", e);
            e
        })?;

        let mut outcomes = Vec::with_capacity(inputs.len());
        for input in inputs {
            let Some(isin) = input.isin().map(str::to_string) else {
                outcomes.push(Err(RepositoryError::MissingIsin));
                continue;
            };

            let mut savepoint = (&mut *tx).begin().await?;
            match security_queries::upsert(&mut *savepoint, &input).await {
                Ok(security) => {
                    savepoint.commit().await?;
                    outcomes.push(Ok(security));
                }
                Err(e) => {
                    warn!("Rolling back upsert for {}: {}", isin, e);
                    savepoint.rollback().await?;
                    outcomes.push(Err(classify(&isin, e)));
                }
            }
        }

        tx.commit().await.map_err(|e| {
            error!("Failed to commit upsert batch: {}", e);
            e
        })?;
        Ok(outcomes)
    }

    async fn try_acquire_run_lock(&self) -> Result<bool, RepositoryError> {
        let mut held = self.lock_conn.lock().await;
        if held.is_some() {
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await?;
        let locked = security_queries::try_advisory_lock(&mut *conn, PIPELINE_LOCK_KEY).await?;
        if locked {
            info!("Acquired pipeline advisory lock {}", PIPELINE_LOCK_KEY);
            *held = Some(conn);
        }
        Ok(locked)
    }

    async fn release_run_lock(&self) -> Result<(), RepositoryError> {
        let mut held = self.lock_conn.lock().await;
        if let Some(mut conn) = held.take() {
            let released = security_queries::advisory_unlock(&mut *conn, PIPELINE_LOCK_KEY).await?;
            if !released {
                warn!("Pipeline advisory lock {} was not held at release", PIPELINE_LOCK_KEY);
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(security_queries::ping(&self.pool).await?)
    }
}

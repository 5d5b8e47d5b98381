use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::db::repository::{RowOutcome, SecurityRepository};
use crate::errors::RepositoryError;
use crate::models::{Security, SecurityInput};

#[derive(Default)]
struct Table {
    rows: Vec<Security>,
    next_id: i64,
}

/// `SecurityRepository` held in process memory. Same merge, ordering and
/// limit rules as the Postgres implementation; used for dry runs and tests.
#[derive(Default)]
pub struct InMemorySecurityRepository {
    table: RwLock<Table>,
    run_lock: AtomicBool,
    rejected_isins: RwLock<HashSet<String>>,
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

impl InMemorySecurityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert for `isin` fail with a constraint conflict.
    pub fn reject_isin(&self, isin: &str) {
        self.rejected_isins.write().insert(isin.to_string());
    }

    pub fn snapshot(&self) -> Vec<Security> {
        self.table.read().rows.clone()
    }

    fn find<P>(&self, predicate: P) -> Option<Security>
    where
        P: Fn(&Security) -> bool,
    {
        self.table.read().rows.iter().find(|s| predicate(s)).cloned()
    }

    fn filter<P>(&self, limit: i64, predicate: P) -> Vec<Security>
    where
        P: Fn(&Security) -> bool,
    {
        self.table
            .read()
            .rows
            .iter()
            .filter(|s| predicate(s))
            .take(limit.max(0) as usize)
            .cloned()
            .collect()
    }

    fn upsert_one(&self, input: SecurityInput) -> Result<Security, RepositoryError> {
        let isin = input.isin().ok_or(RepositoryError::MissingIsin)?.to_string();
        if self.rejected_isins.read().contains(&isin) {
            return Err(RepositoryError::Conflict {
                isin,
                message: "rejected by store".to_string(),
            });
        }

        let now = Utc::now();
        let mut table = self.table.write();
        if let Some(existing) = table
            .rows
            .iter_mut()
            .find(|s| s.isin_code.as_deref() == Some(isin.as_str()))
        {
            input.merge_into(existing);
            existing.updated_at = existing.updated_at.max(now);
            return Ok(existing.clone());
        }

        table.next_id += 1;
        let security = input.into_new_security(table.next_id, now);
        table.rows.push(security.clone());
        Ok(security)
    }
}

#[async_trait]
impl SecurityRepository for InMemorySecurityRepository {
    async fn get_by_isin(&self, isin: &str) -> Result<Option<Security>, RepositoryError> {
        Ok(self.find(|s| s.isin_code.as_deref() == Some(isin)))
    }

    async fn get_by_nse_symbol(&self, symbol: &str) -> Result<Option<Security>, RepositoryError> {
        Ok(self.find(|s| {
            s.nse_symbol
                .as_deref()
                .map(|n| n.eq_ignore_ascii_case(symbol))
                .unwrap_or(false)
        }))
    }

    async fn get_by_bse_code(&self, code: &str) -> Result<Option<Security>, RepositoryError> {
        Ok(self.find(|s| s.bse_scrip_code.as_deref() == Some(code)))
    }

    async fn search_by_company_name(&self, fragment: &str, limit: i64) -> Result<Vec<Security>, RepositoryError> {
        Ok(self.filter(limit, |s| contains_ci(s.company_name.as_deref(), fragment)))
    }

    async fn search_by_industry(&self, industry: &str, limit: i64) -> Result<Vec<Security>, RepositoryError> {
        Ok(self.filter(limit, |s| contains_ci(s.industry_group.as_deref(), industry)))
    }

    async fn free_text_search(&self, term: &str, limit: i64) -> Result<Vec<Security>, RepositoryError> {
        Ok(self.filter(limit, |s| {
            contains_ci(s.company_name.as_deref(), term)
                || contains_ci(s.nse_symbol.as_deref(), term)
                || s.bse_scrip_code
                    .as_deref()
                    .map(|c| c.starts_with(term))
                    .unwrap_or(false)
        }))
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Security>, RepositoryError> {
        Ok(self
            .table
            .read()
            .rows
            .iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        Ok(self.table.read().rows.len() as i64)
    }

    async fn upsert(&self, input: SecurityInput) -> Result<Security, RepositoryError> {
        self.upsert_one(input)
    }

    async fn upsert_batch(&self, inputs: Vec<SecurityInput>) -> Result<Vec<RowOutcome>, RepositoryError> {
        Ok(inputs.into_iter().map(|input| self.upsert_one(input)).collect())
    }

    async fn try_acquire_run_lock(&self) -> Result<bool, RepositoryError> {
        Ok(self
            .run_lock
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    async fn release_run_lock(&self) -> Result<(), RepositoryError> {
        self.run_lock.store(false, Ordering::Release);
        Ok(())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn input(isin: &str, name: &str, nse: &str, bse: &str) -> SecurityInput {
        SecurityInput {
            isin_code: Some(isin.to_string()),
            company_name: Some(name.to_string()),
            nse_symbol: Some(nse.to_string()),
            bse_scrip_code: Some(bse.to_string()),
            industry_group: Some("IT Services".to_string()),
            ..Default::default()
        }
    }

    async fn seeded() -> InMemorySecurityRepository {
        let repo = InMemorySecurityRepository::new();
        repo.upsert(input("INE009A01021", "Infosys Ltd.", "INFY", "500209")).await.unwrap();
        repo.upsert(input("INE467B01029", "Tata Consultancy Services Ltd.", "TCS", "532540")).await.unwrap();
        repo.upsert(input("INE075A01022", "Wipro Ltd.", "WIPRO", "507685")).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_disjoint_upserts_union_fields() {
        let repo = InMemorySecurityRepository::new();
        repo.upsert(SecurityInput {
            isin_code: Some("INE009A01021".into()),
            company_name: Some("Infosys Ltd.".into()),
            ..Default::default()
        })
        .await
        .unwrap();
        let merged = repo
            .upsert(SecurityInput {
                isin_code: Some("INE009A01021".into()),
                beta: Some(BigDecimal::from_str("0.85").unwrap()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(merged.company_name.as_deref(), Some("Infosys Ltd."));
        assert_eq!(merged.beta, Some(BigDecimal::from_str("0.85").unwrap()));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_updated_at_never_decreases() {
        let repo = seeded().await;
        let before = repo.get_by_isin("INE009A01021").await.unwrap().unwrap();
        let after = repo.upsert(input("INE009A01021", "Infosys Ltd.", "INFY", "500209")).await.unwrap();
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.id, before.id);
    }

    #[tokio::test]
    async fn test_upsert_requires_isin() {
        let repo = InMemorySecurityRepository::new();
        let err = repo.upsert(SecurityInput::default()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::MissingIsin));
    }

    #[tokio::test]
    async fn test_identifier_lookups_resolve_same_row() {
        let repo = seeded().await;
        let by_isin = repo.get_by_identifier("INE467B01029").await.unwrap().unwrap();
        let by_nse = repo.get_by_identifier("tcs").await.unwrap().unwrap();
        let by_bse = repo.get_by_identifier("532540").await.unwrap().unwrap();
        assert_eq!(by_isin, by_nse);
        assert_eq!(by_nse, by_bse);
        assert!(repo.get_by_identifier("UNKNOWN").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_is_bounded_and_ordered() {
        let repo = seeded().await;
        let hits = repo.search_by_company_name("LTD", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].id < hits[1].id);
        assert_eq!(repo.search_by_company_name("ltd", 2).await.unwrap(), hits);
    }

    #[tokio::test]
    async fn test_batch_failure_is_row_level() {
        let repo = seeded().await;
        repo.reject_isin("INE075A01022");
        let outcomes = repo
            .upsert_batch(vec![
                input("INE002A01018", "Reliance Industries Ltd.", "RELIANCE", "500325"),
                input("INE075A01022", "Wipro Ltd.", "WIPRO", "507685"),
                SecurityInput::default(),
            ])
            .await
            .unwrap();

        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(RepositoryError::Conflict { .. })));
        assert!(matches!(outcomes[2], Err(RepositoryError::MissingIsin)));
        assert_eq!(repo.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_run_lock_is_exclusive() {
        let repo = InMemorySecurityRepository::new();
        assert!(repo.try_acquire_run_lock().await.unwrap());
        assert!(!repo.try_acquire_run_lock().await.unwrap());
        repo.release_run_lock().await.unwrap();
        assert!(repo.try_acquire_run_lock().await.unwrap());
    }
}

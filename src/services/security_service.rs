use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::db::SecurityRepository;
use crate::domain::{self, IdentifierKind};
use crate::errors::AppError;
use crate::models::{BulkUpsertOutcome, BulkUpsertRequest, LookupResult, Security, SecurityInput, SecurityPage};

const MIN_FRAGMENT_LEN: usize = 2;

/// Page size bounds and defaults applied to every read.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default_size: i64,
    pub max_size: i64,
}

impl From<&ServerConfig> for PageLimits {
    fn from(server: &ServerConfig) -> Self {
        Self {
            default_size: server.default_page_size,
            max_size: server.max_page_size,
        }
    }
}

impl PageLimits {
    pub fn resolve(&self, limit: Option<i64>) -> Result<i64, AppError> {
        let limit = limit.unwrap_or(self.default_size);
        if limit < 1 || limit > self.max_size {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                self.max_size
            )));
        }
        Ok(limit)
    }
}

fn fragment<'a>(raw: &'a str, what: &str) -> Result<&'a str, AppError> {
    let cleaned = domain::clean_fragment(raw);
    if cleaned.is_empty() {
        return Err(AppError::Validation(format!("{} cannot be empty", what)));
    }
    if cleaned.chars().count() < MIN_FRAGMENT_LEN {
        return Err(AppError::Validation(format!(
            "{} must be at least {} characters long",
            what, MIN_FRAGMENT_LEN
        )));
    }
    Ok(cleaned)
}

/// Resolve an ISIN, NSE symbol or BSE code to one row. Input that only looks
/// like a company name is answered with a name search instead.
pub async fn get_by_identifier(
    repo: &dyn SecurityRepository,
    raw: &str,
    limits: PageLimits,
) -> Result<LookupResult, AppError> {
    let id = domain::normalize(raw)?;

    if id.kind == IdentifierKind::CompanyName {
        let matches = search_by_company_name(repo, &id.key, None, limits).await?;
        return Ok(if matches.is_empty() {
            LookupResult::NotFound
        } else {
            LookupResult::FoundMany(matches)
        });
    }

    let found = repo.get_by_identifier(&id.key).await?;
    if found.is_none() {
        info!("No security for {} '{}'", id.kind, id.key);
    }
    Ok(LookupResult::from_option(found))
}

pub async fn search_by_company_name(
    repo: &dyn SecurityRepository,
    name: &str,
    limit: Option<i64>,
    limits: PageLimits,
) -> Result<Vec<Security>, AppError> {
    let name = fragment(name, "Company name")?;
    let limit = limits.resolve(limit)?;
    Ok(repo.search_by_company_name(name, limit).await?)
}

pub async fn search_by_industry(
    repo: &dyn SecurityRepository,
    industry: &str,
    limit: Option<i64>,
    limits: PageLimits,
) -> Result<Vec<Security>, AppError> {
    let industry = fragment(industry, "Industry")?;
    let limit = limits.resolve(limit)?;
    Ok(repo.search_by_industry(industry, limit).await?)
}

pub async fn search(
    repo: &dyn SecurityRepository,
    term: &str,
    limit: Option<i64>,
    limits: PageLimits,
) -> Result<Vec<Security>, AppError> {
    let term = domain::clean_fragment(term);
    if term.is_empty() {
        return Err(AppError::Validation("Search term cannot be empty".into()));
    }
    let limit = limits.resolve(limit)?;
    Ok(repo.free_text_search(term, limit).await?)
}

pub async fn list(
    repo: &dyn SecurityRepository,
    limit: Option<i64>,
    offset: Option<i64>,
    limits: PageLimits,
) -> Result<SecurityPage, AppError> {
    let limit = limits.resolve(limit)?;
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(AppError::Validation("offset must be zero or greater".into()));
    }

    let securities = repo.list(limit, offset).await?;
    let total_count = repo.count().await?;
    Ok(SecurityPage {
        securities,
        total_count,
        limit,
        offset,
        has_more: offset.saturating_add(limit) < total_count,
    })
}

/// Normalize an upsert payload and check what the store cannot.
pub fn validate_input(input: SecurityInput) -> Result<SecurityInput, AppError> {
    let input = input.normalized();
    let isin = input
        .isin()
        .ok_or_else(|| AppError::Validation("Field 'isin_code' is required".into()))?;
    if !domain::is_isin(isin) {
        return Err(AppError::Validation(format!(
            "ISIN code '{}' must be 12 characters: country code, 9 alphanumerics, check digit",
            isin
        )));
    }
    if let Some(name) = &input.company_name {
        if name.chars().count() < MIN_FRAGMENT_LEN {
            return Err(AppError::Validation("company_name is too short".into()));
        }
    }
    Ok(input)
}

pub async fn upsert(repo: &dyn SecurityRepository, input: SecurityInput) -> Result<Security, AppError> {
    let input = validate_input(input)?;
    let security = repo.upsert(input).await?;
    info!("Upserted security {:?} (id {})", security.isin_code, security.id);
    Ok(security)
}

/// Upsert many payloads; invalid or conflicting rows are reported, not fatal.
pub async fn bulk_upsert(
    repo: &dyn SecurityRepository,
    request: BulkUpsertRequest,
    limits: PageLimits,
) -> Result<BulkUpsertOutcome, AppError> {
    if request.securities.is_empty() {
        return Err(AppError::Validation("securities cannot be empty".into()));
    }
    if request.securities.len() as i64 > limits.max_size {
        return Err(AppError::Validation(format!(
            "at most {} securities per request",
            limits.max_size
        )));
    }

    let mut outcome = BulkUpsertOutcome::default();
    let mut valid = Vec::with_capacity(request.securities.len());
    for (idx, input) in request.securities.into_iter().enumerate() {
        match validate_input(input) {
            Ok(input) => valid.push(input),
            Err(e) => {
                outcome.failed_count += 1;
                outcome.errors.push(format!("row {}: {}", idx, e));
            }
        }
    }

    if !valid.is_empty() {
        for result in repo.upsert_batch(valid).await? {
            match result {
                Ok(_) => outcome.upserted_count += 1,
                Err(e) => {
                    warn!("Bulk upsert row failed: {}", e);
                    outcome.failed_count += 1;
                    outcome.errors.push(e.to_string());
                }
            }
        }
    }

    info!(
        "Bulk upsert finished: {} upserted, {} failed",
        outcome.upserted_count, outcome.failed_count
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemorySecurityRepository;

    const LIMITS: PageLimits = PageLimits {
        default_size: 100,
        max_size: 1000,
    };

    fn input(isin: &str, name: &str, nse: &str, bse: &str, industry: &str) -> SecurityInput {
        SecurityInput {
            isin_code: Some(isin.into()),
            company_name: Some(name.into()),
            nse_symbol: Some(nse.into()),
            bse_scrip_code: Some(bse.into()),
            industry_group: Some(industry.into()),
            ..Default::default()
        }
    }

    async fn seeded() -> InMemorySecurityRepository {
        let repo = InMemorySecurityRepository::new();
        for row in [
            input("INE009A01021", "Infosys Ltd.", "INFY", "500209", "IT Services"),
            input("INE467B01029", "Tata Consultancy Services Ltd.", "TCS", "532540", "IT Services"),
            input("INE002A01018", "Reliance Industries Ltd.", "RELIANCE", "500325", "Refineries"),
        ] {
            repo.upsert(row).await.unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn test_identifier_kinds_resolve_same_row() {
        let repo = seeded().await;
        let mut rows = Vec::new();
        for raw in ["ine009a01021", "infy", "500209"] {
            match get_by_identifier(&repo, raw, LIMITS).await.unwrap() {
                LookupResult::Found(s) => rows.push(s),
                other => panic!("expected a single row for {}, got {:?}", raw, other),
            }
        }
        assert_eq!(rows[0], rows[1]);
        assert_eq!(rows[1], rows[2]);
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_not_found() {
        let repo = seeded().await;
        assert_eq!(
            get_by_identifier(&repo, "INE000X00000", LIMITS).await.unwrap(),
            LookupResult::NotFound
        );
        assert_eq!(
            get_by_identifier(&repo, "no such company", LIMITS).await.unwrap(),
            LookupResult::NotFound
        );
    }

    #[tokio::test]
    async fn test_company_name_identifier_returns_many() {
        let repo = seeded().await;
        match get_by_identifier(&repo, "consultancy services", LIMITS).await.unwrap() {
            LookupResult::FoundMany(rows) => assert_eq!(rows.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blank_identifier_is_invalid() {
        let repo = seeded().await;
        let err = get_by_identifier(&repo, "  ", LIMITS).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn test_limit_bounds() {
        let repo = seeded().await;
        assert!(search(&repo, "ltd", Some(0), LIMITS).await.is_err());
        assert!(search(&repo, "ltd", Some(1001), LIMITS).await.is_err());
        assert_eq!(search(&repo, "ltd", Some(2), LIMITS).await.unwrap().len(), 2);
        assert!(list(&repo, None, Some(-1), LIMITS).await.is_err());
    }

    #[tokio::test]
    async fn test_short_fragments_rejected() {
        let repo = seeded().await;
        assert!(matches!(
            search_by_company_name(&repo, "'I'", None, LIMITS).await,
            Err(AppError::Validation(_))
        ));
        assert!(search_by_industry(&repo, "it", None, LIMITS).await.unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn test_pages_are_contiguous() {
        let repo = InMemorySecurityRepository::new();
        for i in 0..25 {
            let isin = format!("INE{:08}{}", i, i % 10);
            repo.upsert(SecurityInput {
                isin_code: Some(isin),
                ..Default::default()
            })
            .await
            .unwrap();
        }

        let first = list(&repo, Some(10), Some(0), LIMITS).await.unwrap();
        let second = list(&repo, Some(10), Some(10), LIMITS).await.unwrap();
        let third = list(&repo, Some(10), Some(20), LIMITS).await.unwrap();

        assert_eq!(first.total_count, 25);
        assert!(first.has_more && second.has_more && !third.has_more);
        assert_eq!(third.securities.len(), 5);
        let last_of_first = first.securities.last().unwrap().id;
        assert_eq!(second.securities[0].id, last_of_first + 1);
    }

    #[tokio::test]
    async fn test_offset_past_the_end_has_no_more() {
        let repo = seeded().await;
        let page = list(&repo, Some(10), Some(i64::MAX), LIMITS).await.unwrap();
        assert!(page.securities.is_empty());
        assert_eq!(page.offset, i64::MAX);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_upsert_validates_isin() {
        let repo = InMemorySecurityRepository::new();
        let err = upsert(&repo, SecurityInput::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = upsert(
            &repo,
            SecurityInput {
                isin_code: Some("INE12".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let saved = upsert(
            &repo,
            SecurityInput {
                isin_code: Some(" ine009a01021 ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(saved.isin_code.as_deref(), Some("INE009A01021"));
    }

    #[tokio::test]
    async fn test_bulk_upsert_reports_row_errors() {
        let repo = seeded().await;
        repo.reject_isin("INE002A01018");
        let outcome = bulk_upsert(
            &repo,
            BulkUpsertRequest {
                securities: vec![
                    input("INE040A01034", "HDFC Bank Ltd.", "HDFCBANK", "500180", "Banks"),
                    SecurityInput::default(),
                    input("INE002A01018", "Reliance Industries Ltd.", "RELIANCE", "500325", "Refineries"),
                ],
            },
            LIMITS,
        )
        .await
        .unwrap();

        assert_eq!(outcome.upserted_count, 1);
        assert_eq!(outcome.failed_count, 2);
        assert!(outcome.errors[0].starts_with("row 1"));
    }
}

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// One listed security, keyed by ISIN. The two dated groups are independent
// point-in-time observations taken from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Security {
    pub id: i64,

    pub company_code: Option<String>,
    pub company_name: Option<String>,
    pub prowess_company_code: Option<String>,
    pub cin_code: Option<String>,
    pub isin_code: Option<String>,
    pub nse_symbol: Option<String>,
    pub bse_scrip_code: Option<String>,

    pub industry_group: Option<String>,
    pub main_product_service_group: Option<String>,
    pub company_website_address: Option<String>,
    pub registered_office_pincode: Option<String>,

    pub date_1: Option<NaiveDate>,
    pub shares_outstanding_1: Option<BigDecimal>,
    pub market_capitalisation_1: Option<BigDecimal>,
    pub face_value_1: Option<BigDecimal>,
    pub shares_traded_1: Option<BigDecimal>,
    pub beta: Option<BigDecimal>,

    pub date_2: Option<NaiveDate>,
    pub shares_outstanding_2: Option<BigDecimal>,
    pub market_capitalisation_2: Option<BigDecimal>,
    pub face_value_2: Option<BigDecimal>,
    pub shares_traded_2: Option<BigDecimal>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload. Every field is optional; a missing field and an explicit
/// `null` both mean "keep whatever is stored".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityInput {
    pub company_code: Option<String>,
    pub company_name: Option<String>,
    pub prowess_company_code: Option<String>,
    pub cin_code: Option<String>,
    pub isin_code: Option<String>,
    pub nse_symbol: Option<String>,
    pub bse_scrip_code: Option<String>,

    pub industry_group: Option<String>,
    pub main_product_service_group: Option<String>,
    pub company_website_address: Option<String>,
    pub registered_office_pincode: Option<String>,

    pub date_1: Option<NaiveDate>,
    pub shares_outstanding_1: Option<BigDecimal>,
    pub market_capitalisation_1: Option<BigDecimal>,
    pub face_value_1: Option<BigDecimal>,
    pub shares_traded_1: Option<BigDecimal>,
    pub beta: Option<BigDecimal>,

    pub date_2: Option<NaiveDate>,
    pub shares_outstanding_2: Option<BigDecimal>,
    pub market_capitalisation_2: Option<BigDecimal>,
    pub face_value_2: Option<BigDecimal>,
    pub shares_traded_2: Option<BigDecimal>,
}

macro_rules! merge_fields {
    ($target:expr, $source:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$source.$field {
                $target.$field = Some(value.clone());
            }
        )+
    };
}

impl SecurityInput {
    pub fn isin(&self) -> Option<&str> {
        self.isin_code.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Trim every text field, drop blanks, and upper-case the exchange codes
    /// so lookups and the ISIN conflict key compare consistently.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.company_code,
            &mut self.company_name,
            &mut self.prowess_company_code,
            &mut self.cin_code,
            &mut self.isin_code,
            &mut self.nse_symbol,
            &mut self.bse_scrip_code,
            &mut self.industry_group,
            &mut self.main_product_service_group,
            &mut self.company_website_address,
            &mut self.registered_office_pincode,
        ] {
            *field = field
                .take()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
        self.isin_code = self.isin_code.map(|v| v.to_uppercase());
        self.nse_symbol = self.nse_symbol.map(|v| v.to_uppercase());
        self.cin_code = self.cin_code.map(|v| v.to_uppercase());
        self
    }

    /// Field-wise merge into an existing row: present values win, absent
    /// values never clobber what is already stored.
    pub fn merge_into(&self, target: &mut Security) {
        merge_fields!(
            target,
            self,
            company_code,
            company_name,
            prowess_company_code,
            cin_code,
            isin_code,
            nse_symbol,
            bse_scrip_code,
            industry_group,
            main_product_service_group,
            company_website_address,
            registered_office_pincode,
            date_1,
            shares_outstanding_1,
            market_capitalisation_1,
            face_value_1,
            shares_traded_1,
            beta,
            date_2,
            shares_outstanding_2,
            market_capitalisation_2,
            face_value_2,
            shares_traded_2,
        );
    }

    pub fn into_new_security(self, id: i64, now: DateTime<Utc>) -> Security {
        Security {
            id,
            company_code: self.company_code,
            company_name: self.company_name,
            prowess_company_code: self.prowess_company_code,
            cin_code: self.cin_code,
            isin_code: self.isin_code,
            nse_symbol: self.nse_symbol,
            bse_scrip_code: self.bse_scrip_code,
            industry_group: self.industry_group,
            main_product_service_group: self.main_product_service_group,
            company_website_address: self.company_website_address,
            registered_office_pincode: self.registered_office_pincode,
            date_1: self.date_1,
            shares_outstanding_1: self.shares_outstanding_1,
            market_capitalisation_1: self.market_capitalisation_1,
            face_value_1: self.face_value_1,
            shares_traded_1: self.shares_traded_1,
            beta: self.beta,
            date_2: self.date_2,
            shares_outstanding_2: self.shares_outstanding_2,
            market_capitalisation_2: self.market_capitalisation_2,
            face_value_2: self.face_value_2,
            shares_traded_2: self.shares_traded_2,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of a lookup, shaped uniformly by the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult {
    Found(Security),
    FoundMany(Vec<Security>),
    NotFound,
}

impl LookupResult {
    pub fn from_option(security: Option<Security>) -> Self {
        match security {
            Some(s) => LookupResult::Found(s),
            None => LookupResult::NotFound,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityPage {
    pub securities: Vec<Security>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkUpsertRequest {
    pub securities: Vec<SecurityInput>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkUpsertOutcome {
    pub upserted_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

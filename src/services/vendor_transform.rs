use std::collections::HashMap;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

use crate::domain;
use crate::models::SecurityInput;

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y%m%d", "%d-%b-%Y"];
const NULL_MARKERS: [&str; 4] = ["NA", "N.A.", "-", "--"];
const INACTIVE_STATUSES: [&str; 3] = ["delisted", "suspended", "inactive"];

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("row has no ISIN code")]
    MissingIsin,
    #[error("malformed ISIN code '{0}'")]
    InvalidIsin(String),
    #[error("column '{column}': cannot parse date '{value}'")]
    InvalidDate { column: String, value: String },
    #[error("column '{column}': cannot parse number '{value}'")]
    InvalidNumber { column: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    CompanyCode,
    CompanyName,
    ProwessCompanyCode,
    CinCode,
    IsinCode,
    NseSymbol,
    BseScripCode,
    IndustryGroup,
    MainProductServiceGroup,
    CompanyWebsiteAddress,
    RegisteredOfficePincode,
    Beta,
    ListingStatus,
}

/// Columns the vendor sends twice, once per observation date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotField {
    Date,
    SharesOutstanding,
    MarketCapitalisation,
    FaceValue,
    SharesTraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Plain(Field),
    Snapshot(SnapshotField, u8),
}

fn header_key(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .replace(['/', '-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn classify_header(header: &str) -> Option<Slot> {
    let slot = match header_key(header).as_str() {
        "company code" | "co code" => Slot::Plain(Field::CompanyCode),
        "company name" | "company" | "co name" => Slot::Plain(Field::CompanyName),
        "prowess company code" | "prowess code" | "prowessiq company code" => {
            Slot::Plain(Field::ProwessCompanyCode)
        }
        "cin code" | "cin" => Slot::Plain(Field::CinCode),
        "isin code" | "isin" => Slot::Plain(Field::IsinCode),
        "nse symbol" | "nse code" => Slot::Plain(Field::NseSymbol),
        "bse scrip code" | "bse code" | "bse scrip id" => Slot::Plain(Field::BseScripCode),
        "industry group" | "industry" => Slot::Plain(Field::IndustryGroup),
        "main product service group" | "main product group" => Slot::Plain(Field::MainProductServiceGroup),
        "company website address" | "website" | "company website" => Slot::Plain(Field::CompanyWebsiteAddress),
        "registered office pincode" | "regd office pincode" | "pincode" => {
            Slot::Plain(Field::RegisteredOfficePincode)
        }
        "beta" => Slot::Plain(Field::Beta),
        "listing status" | "listed status" | "status" => Slot::Plain(Field::ListingStatus),
        "date" => Slot::Snapshot(SnapshotField::Date, 0),
        "shares outstanding" => Slot::Snapshot(SnapshotField::SharesOutstanding, 0),
        "market capitalisation" | "market capitalization" => {
            Slot::Snapshot(SnapshotField::MarketCapitalisation, 0)
        }
        "face value" => Slot::Snapshot(SnapshotField::FaceValue, 0),
        "shares traded" => Slot::Snapshot(SnapshotField::SharesTraded, 0),
        _ => return None,
    };
    Some(slot)
}

/// Fixed mapping from the vendor's header row to canonical fields.
///
/// Snapshot headers are numbered by occurrence: the first lands in group 1,
/// the second in group 2. A snapshot header seen only once feeds both groups.
/// Later duplicates of plain headers and unknown headers are ignored.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    headers: Vec<String>,
    slots: Vec<Option<Slot>>,
    plain: HashMap<Field, usize>,
    snapshot: HashMap<(SnapshotField, u8), usize>,
}

impl ColumnMap {
    pub fn from_headers(headers: &[String]) -> Self {
        let mut slots = Vec::with_capacity(headers.len());
        let mut plain = HashMap::new();
        let mut snapshot = HashMap::new();
        let mut seen: HashMap<SnapshotField, u8> = HashMap::new();

        for (idx, header) in headers.iter().enumerate() {
            let slot = match classify_header(header) {
                Some(Slot::Plain(field)) if !plain.contains_key(&field) => {
                    plain.insert(field, idx);
                    Some(Slot::Plain(field))
                }
                Some(Slot::Snapshot(field, _)) => {
                    let count = seen.entry(field).or_insert(0);
                    *count += 1;
                    if *count <= 2 {
                        snapshot.insert((field, *count), idx);
                        Some(Slot::Snapshot(field, *count))
                    } else {
                        None
                    }
                }
                _ => None,
            };
            slots.push(slot);
        }

        for (field, count) in seen {
            if count == 1 {
                if let Some(idx) = snapshot.get(&(field, 1)).copied() {
                    snapshot.insert((field, 2), idx);
                }
            }
        }

        Self {
            headers: headers.to_vec(),
            slots,
            plain,
            snapshot,
        }
    }

    pub fn has(&self, field: Field) -> bool {
        self.plain.contains_key(&field)
    }

    /// Number of header columns mapped to a canonical field.
    pub fn mapped_columns(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn text(&self, row: &[Value], field: Field) -> Option<String> {
        self.plain.get(&field).and_then(|idx| cell_text(row.get(*idx)))
    }

    /// Listed means at least one exchange code, and no status column saying
    /// otherwise.
    pub fn is_listed(&self, row: &[Value]) -> bool {
        let on_exchange =
            self.text(row, Field::NseSymbol).is_some() || self.text(row, Field::BseScripCode).is_some();
        if !on_exchange {
            return false;
        }
        match self.text(row, Field::ListingStatus) {
            Some(status) => !INACTIVE_STATUSES.contains(&status.to_lowercase().as_str()),
            None => true,
        }
    }

    fn column_name(&self, idx: usize) -> String {
        self.headers.get(idx).cloned().unwrap_or_else(|| format!("#{}", idx))
    }

    fn date(&self, row: &[Value], field: SnapshotField, group: u8) -> Result<Option<NaiveDate>, TransformError> {
        let Some(idx) = self.snapshot.get(&(field, group)).copied() else {
            return Ok(None);
        };
        match cell_text(row.get(idx)) {
            Some(raw) => parse_date(&raw).map(Some).ok_or_else(|| TransformError::InvalidDate {
                column: self.column_name(idx),
                value: raw,
            }),
            None => Ok(None),
        }
    }

    fn snapshot_number(&self, row: &[Value], field: SnapshotField, group: u8) -> Result<Option<BigDecimal>, TransformError> {
        match self.snapshot.get(&(field, group)).copied() {
            Some(idx) => self.number_at(row, idx),
            None => Ok(None),
        }
    }

    fn number(&self, row: &[Value], field: Field) -> Result<Option<BigDecimal>, TransformError> {
        match self.plain.get(&field).copied() {
            Some(idx) => self.number_at(row, idx),
            None => Ok(None),
        }
    }

    fn number_at(&self, row: &[Value], idx: usize) -> Result<Option<BigDecimal>, TransformError> {
        match cell_text(row.get(idx)) {
            Some(raw) => parse_number(&raw).map(Some).ok_or_else(|| TransformError::InvalidNumber {
                column: self.column_name(idx),
                value: raw,
            }),
            None => Ok(None),
        }
    }

    /// Convert one positional row into a typed upsert payload.
    pub fn to_input(&self, row: &[Value]) -> Result<SecurityInput, TransformError> {
        let isin = self
            .text(row, Field::IsinCode)
            .map(|v| v.to_uppercase())
            .ok_or(TransformError::MissingIsin)?;
        if !domain::is_isin(&isin) {
            return Err(TransformError::InvalidIsin(isin));
        }

        let input = SecurityInput {
            company_code: self.text(row, Field::CompanyCode),
            company_name: self.text(row, Field::CompanyName),
            prowess_company_code: self.text(row, Field::ProwessCompanyCode),
            cin_code: self.text(row, Field::CinCode),
            isin_code: Some(isin),
            nse_symbol: self.text(row, Field::NseSymbol),
            bse_scrip_code: self.text(row, Field::BseScripCode),
            industry_group: self.text(row, Field::IndustryGroup),
            main_product_service_group: self.text(row, Field::MainProductServiceGroup),
            company_website_address: self.text(row, Field::CompanyWebsiteAddress),
            registered_office_pincode: self.text(row, Field::RegisteredOfficePincode),

            date_1: self.date(row, SnapshotField::Date, 1)?,
            shares_outstanding_1: self.snapshot_number(row, SnapshotField::SharesOutstanding, 1)?,
            market_capitalisation_1: self.snapshot_number(row, SnapshotField::MarketCapitalisation, 1)?,
            face_value_1: self.snapshot_number(row, SnapshotField::FaceValue, 1)?,
            shares_traded_1: self.snapshot_number(row, SnapshotField::SharesTraded, 1)?,
            beta: self.number(row, Field::Beta)?,

            date_2: self.date(row, SnapshotField::Date, 2)?,
            shares_outstanding_2: self.snapshot_number(row, SnapshotField::SharesOutstanding, 2)?,
            market_capitalisation_2: self.snapshot_number(row, SnapshotField::MarketCapitalisation, 2)?,
            face_value_2: self.snapshot_number(row, SnapshotField::FaceValue, 2)?,
            shares_traded_2: self.snapshot_number(row, SnapshotField::SharesTraded, 2)?,
        };
        Ok(input.normalized())
    }
}

/// Cell as trimmed text; blanks and vendor null markers become `None`.
fn cell_text(cell: Option<&Value>) -> Option<String> {
    let text = match cell? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    if text.is_empty() || NULL_MARKERS.contains(&text.as_str()) {
        None
    } else {
        Some(text)
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let parse = |s: &str| {
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
    };
    // some feeds append a midnight time component to ISO dates
    parse(raw).or_else(|| raw.get(..10).and_then(parse))
}

pub fn parse_number(raw: &str) -> Option<BigDecimal> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if cleaned.is_empty() || NULL_MARKERS.contains(&cleaned.as_str()) {
        return None;
    }
    BigDecimal::from_str(&cleaned).ok()
}

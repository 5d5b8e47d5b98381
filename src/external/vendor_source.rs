use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("timed out waiting for batch {token} after {waited_secs}s")]
    Timeout { token: String, waited_secs: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One delivery from the data vendor: a header row plus positional cells.
/// `raw` keeps the bytes as delivered so they can be archived verbatim.
#[derive(Debug, Clone)]
pub struct VendorPayload {
    pub token: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub raw: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct TabularDocument {
    head: Vec<Vec<Value>>,
    data: Vec<Vec<Value>>,
}

impl VendorPayload {
    /// Parse the `{ "head": [...], "data": [...] }` layout. Only the last
    /// header row names the columns; earlier rows are report titles.
    pub fn from_json(token: impl Into<String>, raw: Vec<u8>) -> Result<Self, FetchError> {
        let doc: TabularDocument =
            serde_json::from_slice(&raw).map_err(|e| FetchError::Parse(e.to_string()))?;

        let header_row = doc
            .head
            .last()
            .ok_or_else(|| FetchError::Parse("payload has no header row".into()))?;

        let headers = header_row
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();

        Ok(Self {
            token: token.into(),
            headers,
            rows: doc.data,
            raw,
        })
    }
}

#[async_trait]
pub trait VendorSource: Send + Sync {
    /// Pull the full security-master universe. Any error aborts the run.
    async fn fetch(&self) -> Result<VendorPayload, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_head_row_is_header() {
        let raw = br#"{
            "head": [["Security master"], ["Company Name", "ISIN code"]],
            "data": [["Infosys Ltd.", "INE009A01021"], ["Wipro Ltd.", null]]
        }"#
        .to_vec();
        let payload = VendorPayload::from_json("tok", raw).unwrap();
        assert_eq!(payload.headers, vec!["Company Name", "ISIN code"]);
        assert_eq!(payload.rows.len(), 2);
        assert_eq!(payload.token, "tok");
        assert!(payload.rows[1][1].is_null());
    }

    #[test]
    fn test_missing_header_is_parse_error() {
        let raw = br#"{"head": [], "data": []}"#.to_vec();
        assert!(matches!(
            VendorPayload::from_json("tok", raw),
            Err(FetchError::Parse(_))
        ));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            VendorPayload::from_json("tok", b"not json".to_vec()),
            Err(FetchError::Parse(_))
        ));
    }
}

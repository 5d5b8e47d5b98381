use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::ObjectStoreConfig;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object store request failed: {0}")]
    Sdk(String),

    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

/// Write-only archive for operation logs and raw vendor payloads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_json(&self, key: &str, body: Vec<u8>) -> Result<(), ObjectStoreError>;

    async fn ping(&self) -> Result<(), ObjectStoreError>;
}

/// `logs/{YYYYMMDD}/{operation}_{timestamp}.json`, colons replaced so the key
/// stays filesystem friendly when synced down.
pub fn operation_log_key(now: DateTime<Utc>, operation: &str) -> String {
    let stamp = now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string().replace(':', "-");
    format!("logs/{}/{}_{}.json", now.format("%Y%m%d"), operation, stamp)
}

/// `raw_data/{YYYYMMDD}/prowess_rawdata_{token}.json`
pub fn raw_payload_key(now: DateTime<Utc>, token: &str) -> String {
    format!("raw_data/{}/prowess_rawdata_{}.json", now.format("%Y%m%d"), token)
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "security-master",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .force_path_style(config.endpoint.is_some())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        // MinIO and other S3-compatible endpoints
        builder.set_endpoint_url(config.endpoint.clone());

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_json(&self, key: &str, body: Vec<u8>) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(self.bucket.clone())
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| ObjectStoreError::Sdk(err.to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), ObjectStoreError> {
        self.client
            .head_bucket()
            .bucket(self.bucket.clone())
            .send()
            .await
            .map_err(|err| ObjectStoreError::Unavailable(err.to_string()))?;
        Ok(())
    }
}

/// Keeps objects in memory for tests.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }

    fn check(&self) -> Result<(), ObjectStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Unavailable("store marked as failing".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_json(&self, key: &str, body: Vec<u8>) -> Result<(), ObjectStoreError> {
        self.check()?;
        self.objects.lock().insert(key.to_string(), body);
        Ok(())
    }

    async fn ping(&self) -> Result<(), ObjectStoreError> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store_config(endpoint: Option<&str>) -> ObjectStoreConfig {
        ObjectStoreConfig {
            bucket: "security-master-archive".into(),
            region: "ap-south-1".into(),
            access_key_id: "key".into(),
            secret_access_key: "secret".into(),
            endpoint: endpoint.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_s3_store_builds_with_and_without_endpoint() {
        let aws = S3ObjectStore::new(&store_config(None));
        assert_eq!(aws.bucket(), "security-master-archive");

        let minio = S3ObjectStore::new(&store_config(Some("http://localhost:9000")));
        assert_eq!(minio.bucket(), "security-master-archive");
    }

    #[test]
    fn test_keys_are_date_partitioned() {
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 18, 30, 5).unwrap();
        assert_eq!(
            operation_log_key(now, "security_upsert"),
            "logs/20250307/security_upsert_2025-03-07T18-30-05.000000.json"
        );
        assert_eq!(
            raw_payload_key(now, "abc123"),
            "raw_data/20250307/prowess_rawdata_abc123.json"
        );
    }

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let store = InMemoryObjectStore::new();
        store.put_json("logs/a.json", b"{}".to_vec()).await.unwrap();
        assert_eq!(store.keys(), vec!["logs/a.json".to_string()]);
        assert_eq!(store.get("logs/a.json").unwrap(), b"{}");

        store.set_failing(true);
        assert!(store.ping().await.is_err());
        assert!(store.put_json("logs/b.json", b"{}".to_vec()).await.is_err());
    }
}

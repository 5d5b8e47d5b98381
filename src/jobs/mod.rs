//! Batch jobs run outside the request path.
//!
//! - `security_upsert_job` - daily merge of the vendor security master

pub mod security_upsert_job;

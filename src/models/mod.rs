mod security;

pub use security::{
    BulkUpsertOutcome, BulkUpsertRequest, LookupResult, Security, SecurityInput, SecurityPage,
};

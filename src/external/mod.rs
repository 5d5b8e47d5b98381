pub mod object_store;
pub mod prowess;
pub mod vendor_source;

pub use object_store::{InMemoryObjectStore, ObjectStore, ObjectStoreError, S3ObjectStore};
pub use prowess::ProwessClient;
pub use vendor_source::{FetchError, VendorPayload, VendorSource};

pub mod abbreviation_service;
pub mod security_service;
pub mod vendor_transform;

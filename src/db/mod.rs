pub mod memory;
pub mod repository;
pub mod security_queries;

pub use memory::InMemorySecurityRepository;
pub use repository::{PgSecurityRepository, RowOutcome, SecurityRepository};

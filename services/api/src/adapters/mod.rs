pub mod identity;
pub mod memory_identity;
pub mod pg_store;

pub use identity::PgIdentityProvider;
pub use memory_identity::MemoryIdentityProvider;
pub use pg_store::PgDocumentStore;

pub mod memory_store;
pub mod postgres_store;

pub use memory_store::MemoryDatastore;
pub use postgres_store::PgDatastore;

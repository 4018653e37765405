mod memory;
mod traits;

pub use memory::InMemoryPersistence;
pub use traits::{PersistenceStore, StoredRecord};

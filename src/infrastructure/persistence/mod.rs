//! Persistence implementations

pub mod file_sink;
pub mod memory_sink;
pub mod writer;

pub use file_sink::FilePersistenceSink;
pub use memory_sink::MemoryPersistenceSink;
pub use writer::{PersistenceHandle, PersistenceWriter, RetryPolicy};

use crate::config::{PersistenceBackend, PersistenceConfig};
use crate::domain::persistence::PersistenceSink;
use crate::domain::shared::result::Result;
use std::sync::Arc;

/// Build the sink selected by configuration
pub async fn create_sink(config: &PersistenceConfig) -> Result<Arc<dyn PersistenceSink>> {
    match config.backend {
        PersistenceBackend::File => Ok(Arc::new(FilePersistenceSink::new(config.directory.clone()).await?)),
        PersistenceBackend::Memory => Ok(Arc::new(MemoryPersistenceSink::new())),
    }
}

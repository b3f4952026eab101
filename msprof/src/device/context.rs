//! Device agent process context
//!
//! Owns the job registry and the session ingress for the lifetime of the
//! agent and hands them to whoever accepts sessions.

use std::sync::Arc;

use super::collection_entry::CollectionEntry;
use super::engine::{DeviceIdMapper, EngineFactory};
use super::task_manager::TaskManager;
use super::uploader::UploaderRegistry;

pub struct DeviceContext {
    pub task_manager: Arc<TaskManager>,
    pub collection_entry: Arc<CollectionEntry>,
    pub uploaders: Arc<UploaderRegistry>,
}

impl DeviceContext {
    #[must_use]
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        mapper: Arc<dyn DeviceIdMapper>,
        uploaders: Arc<UploaderRegistry>,
    ) -> Self {
        let task_manager = Arc::new(TaskManager::new(factory, mapper));
        task_manager.init();
        let collection_entry = CollectionEntry::new(Arc::clone(&task_manager), Arc::clone(&uploaders));
        Self { task_manager, collection_entry, uploaders }
    }

    /// Close every session and reset every job
    pub fn shutdown(&self) {
        self.collection_entry.uninit();
        self.task_manager.uninit();
    }
}

pub mod descriptor;
pub mod hash;
pub mod sqlite;

pub use descriptor::{DataSourceDescriptor, DriverDescriptor};
pub use hash::{content_hash, content_hash_bytes};
pub use sqlite::SqliteDescriptorStore;

use crate::error::Result;

/// Content-addressed persistence of driver and data-source descriptors.
/// Every write is its own transaction.
pub trait DescriptorStore: Send + Sync {
    fn find_driver_by_hash(&self, content_hash: &str) -> Result<Option<DriverDescriptor>>;

    fn find_driver(&self, id: i64) -> Result<Option<DriverDescriptor>>;

    /// Inserts a new descriptor (id 0) or updates an existing one; returns
    /// the stored row. A second row with the same content hash is
    /// `DuplicateActiveDriver`.
    fn save_driver(&self, descriptor: &DriverDescriptor) -> Result<DriverDescriptor>;

    fn list_active_drivers(&self) -> Result<Vec<DriverDescriptor>>;

    fn list_drivers(&self) -> Result<Vec<DriverDescriptor>>;

    fn save_data_source(&self, descriptor: &DataSourceDescriptor) -> Result<DataSourceDescriptor>;

    fn find_data_source(&self, id: i64) -> Result<Option<DataSourceDescriptor>>;

    fn list_data_sources_by_driver(&self, driver_id: i64) -> Result<Vec<DataSourceDescriptor>>;

    fn delete_data_source(&self, id: i64) -> Result<bool>;
}

//! High-level entry point for Lifeline.
//!
//! [`Lifeline`] owns one root object and its [`Serializer`]; [`Driver`] runs
//! queued jobs in the background; [`SnapshotBackup`] keeps restorable copies
//! of the store. Configuration is read from TOML with [`LifelineConfig`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use lifeline_sdk::{Lifeline, LifelineConfig, Restore};
//! # fn demo<T: Restore>(store: Arc<dyn lifeline_store::Storage>) -> lifeline_sdk::SdkResult<()> {
//! let config = LifelineConfig::from_toml_str("[driver]\ninterval_ms = 10")?;
//! let lifeline = Lifeline::<T>::open("save-1", store, &config)?;
//! if lifeline.load()?.is_none() {
//!     // first run: build a root and hand it over with `set_data`
//! }
//! lifeline.save()?;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod driver;
pub mod error;
pub mod lifeline;

#[cfg(test)]
mod testing;

pub use backup::{BackupInfo, BackupService, SnapshotBackup};
pub use config::{DriverConfig, LifelineConfig};
pub use driver::Driver;
pub use error::{SdkError, SdkResult};
pub use lifeline::Lifeline;

// Re-export the engine so applications need only this crate.
pub use lifeline_core::{
    AsNode, Container, IdConverter, NodeHeader, ObservableArray, ObservableList, ObservableMap,
    Restore, SaveError, SavePolicy, SaveResult, Savable, Serializer, SerializerConfig,
};
pub use lifeline_store::{InMemoryStore, Storage, StoredRecord};

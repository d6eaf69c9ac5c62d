//! Storage: catalog backends and the configuration file.

pub mod config;
pub mod file_catalog;
pub mod memory_catalog;

pub use config::{load_config, ConfigError, FileConfig};
pub use file_catalog::{CatalogFileError, FileCatalog};
pub use memory_catalog::InMemoryCatalog;

//! Catalog configuration

use serde::Deserialize;
use std::path::PathBuf;

/// Product catalog configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    /// YAML file with config-defined products; none means gateway-only
    pub definitions_path: Option<PathBuf>,
}

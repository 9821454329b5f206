//! File-based product definitions.
//!
//! Reads config-defined products from a YAML document:
//!
//! ```yaml
//! products:
//!   - id: basic
//!     name: Basic
//!     price: 1000
//!     currency: USD
//!   - id: pro
//!     name: Pro
//!     currency: USD
//!     plans:
//!       - id: pro_monthly
//!         name: Pro (monthly)
//!         price: 1500
//!         currency: USD
//!         frequency: month
//!         interval: 1
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

use crate::domain::billing::Product;
use crate::domain::foundation::ValidationError;

/// Errors loading product definitions
#[derive(Debug, Error)]
pub enum CatalogFileError {
    #[error("Failed to read product definitions: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse product definitions: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid product '{id}': {source}")]
    Invalid {
        id: String,
        #[source]
        source: ValidationError,
    },

    #[error("Product id '{0}' is defined more than once")]
    DuplicateId(String),
}

#[derive(Deserialize)]
struct DefinitionsFile {
    #[serde(default)]
    products: Vec<Product>,
}

/// Load and validate product definitions from `path`.
pub async fn load_product_definitions<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<Product>, CatalogFileError> {
    let yaml = fs::read_to_string(path.as_ref()).await?;
    parse_product_definitions(&yaml)
}

/// Parse and validate product definitions from a YAML string.
pub fn parse_product_definitions(yaml: &str) -> Result<Vec<Product>, CatalogFileError> {
    let file: DefinitionsFile = serde_yaml::from_str(yaml)?;

    let mut seen = HashSet::new();
    for product in &file.products {
        product.validate().map_err(|source| CatalogFileError::Invalid {
            id: product.id.to_string(),
            source,
        })?;
        let ids = std::iter::once(&product.id).chain(product.plans.iter().map(|p| &p.id));
        for id in ids {
            if !seen.insert(id.clone()) {
                return Err(CatalogFileError::DuplicateId(id.to_string()));
            }
        }
    }
    Ok(file.products)
}

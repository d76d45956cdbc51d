//! Environment document loading for the Armada orchestrator.
//!
//! The loader turns a YAML environment description into a validated
//! [`Environment`]: it renders the raw text against an explicit variable
//! map (`${VAR}` interpolation, no ambient lookup), parses the document
//! under the schema version selected by the top-level `__armada.schema`
//! key, normalizes schema differences, reads env files, and runs the
//! entity validation of `armada-core`.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::path::Path;
//!
//! let vars: BTreeMap<String, String> = std::env::vars().collect();
//! let loaded = armada_loader::load_file(Path::new("armada.yaml"), &vars)?;
//! println!("{} containers", loaded.environment.containers.len());
//! # Ok::<(), armada_loader::LoaderError>(())
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod envfile;
pub mod error;
pub mod render;
pub mod schema;

use std::collections::BTreeMap;
use std::path::Path;

use armada_core::environment::Environment;

pub use error::{LoaderError, Result};
pub use schema::AuditDoc;

/// A loaded environment plus the document sections that sit outside the
/// entity model.
#[derive(Debug)]
pub struct LoadedEnvironment {
    /// The validated environment.
    pub environment: Environment,

    /// Declared audit sinks.
    pub audit: Vec<AuditDoc>,
}

/// Loads an environment from document text.
///
/// `base_dir` anchors env file references; `vars` feeds `${VAR}`
/// interpolation.
pub fn load_str(
    text: &str,
    base_dir: &Path,
    vars: &BTreeMap<String, String>,
) -> Result<LoadedEnvironment> {
    let rendered = render::render(text, vars)?;
    let doc: schema::EnvironmentDoc = serde_yaml::from_str(&rendered)?;
    let audit = doc.audit.clone();
    let environment = schema::build(doc, base_dir)?;
    Ok(LoadedEnvironment { environment, audit })
}

/// Loads an environment from a file.
pub fn load_file(path: &Path, vars: &BTreeMap<String, String>) -> Result<LoadedEnvironment> {
    let text = std::fs::read_to_string(path).map_err(|source| LoaderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    load_str(&text, base_dir, vars)
}

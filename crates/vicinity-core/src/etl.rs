//! Import/export ports.
//!
//! Bulk interchange (CSV, JSON, Parquet, …) lives outside the core; these
//! traits are the seam it plugs into. Implementations must round-trip id,
//! values, tags and original text exactly.

use crate::error::Result;
use crate::storage::VectorList;
use std::path::Path;

/// Writes the live records of a vector list to an external format.
pub trait VectorExporter {
    /// Exports every live record to `path`.
    ///
    /// # Errors
    ///
    /// Returns `Io` on write failure.
    fn export(&self, vectors: &VectorList, path: &Path) -> Result<()>;
}

/// Reads records from an external format into a vector list.
pub trait VectorImporter {
    /// Imports records from `path`, appending them to `vectors`.
    ///
    /// # Errors
    ///
    /// Returns `Io` on read failure, `InvalidFormat` on malformed input.
    fn import(&self, path: &Path, vectors: &VectorList) -> Result<()>;
}

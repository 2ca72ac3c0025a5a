//! Weights persistence protocol.

use std::path::Path;

use crate::Result;

/// Something whose trainable weights can be written to and read from disk.
///
/// Restoring right after saving must leave the implementor's outputs unchanged.
pub trait Persist {
    /// Writes all weights to `path`, replacing any existing file.
    fn save_weights(&self, path: &Path) -> Result<()>;

    /// Replaces all weights with those stored at `path`.
    fn load_weights(&mut self, path: &Path) -> Result<()>;
}

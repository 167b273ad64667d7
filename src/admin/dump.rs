use std::io::Write;
use std::path::Path;

use crate::admin::{AdminError, Result};
use crate::storage::counts::GenericCountsStore;

/// Prints the header and every entry of the store file at `path` to `out`.
///
/// The file is never created; a missing file is [`AdminError::MissingStore`].
pub fn dump(path: impl AsRef<Path>, out: &mut dyn Write) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AdminError::missing_store(path));
    }
    GenericCountsStore::dump(path, out, &|key| key.to_string()).map_err(AdminError::from_core)?;
    out.flush()?;
    Ok(())
}

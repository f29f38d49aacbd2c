//! Persistence layer.
//!
//! Writes the posted simulation config to the JSON file the forge test
//! reads. The file is shared by every request: the last write before a
//! spawn wins.

use std::path::Path;
use tracing::debug;

use crate::types::{RunError, SimulationConfig};

/// Write `config` as pretty-printed JSON to `path`, creating parent
/// directories as needed.
pub async fn write_config(config: &SimulationConfig, path: &Path) -> Result<(), RunError> {
    let io_err = |source| RunError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    tokio::fs::write(path, json).await.map_err(io_err)?;

    debug!(
        path = %path.display(),
        revenue_amount = config.revenue_amount(),
        epochs = config.epoch_count(),
        "Config written"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::LifecycleError;

const STRATEGY_EXTENSION: &str = ".py";

/// Copies strategy sources from the shared strategy directory into an instance's own
/// `strategies/` directory.
#[derive(Debug, Clone)]
pub struct StrategyFiles {
    source_dir: PathBuf,
}

impl StrategyFiles {
    pub fn new(source_dir: PathBuf) -> Self {
        Self { source_dir }
    }

    /// Makes sure `<dest_dir>/<strategy>.py` exists and returns the strategy class name,
    /// which is the file name without its extension.
    pub async fn ensure_strategy_file(
        &self,
        strategy: &str,
        dest_dir: &Path,
    ) -> Result<String, LifecycleError> {
        let file_name = normalize_file_name(strategy)?;
        let source = self.source_dir.join(&file_name);
        let destination = dest_dir.join(&file_name);

        match tokio::fs::metadata(&source).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(LifecycleError::StrategySourceNotFound(source)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(LifecycleError::StrategySourceNotFound(source))
            }
            Err(e) => {
                return Err(LifecycleError::io(
                    format!("cannot read strategy source {}", source.display()),
                    e,
                ))
            }
        }

        tokio::fs::create_dir_all(dest_dir).await.map_err(|e| {
            LifecycleError::io(
                format!("cannot create strategy directory {}", dest_dir.display()),
                e,
            )
        })?;

        // Copy next to the destination and rename, so a crash mid-copy never leaves a
        // truncated strategy for the engine to import.
        let staging = dest_dir.join(format!(".{}.tmp", file_name));
        if let Err(e) = tokio::fs::copy(&source, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(if e.kind() == ErrorKind::NotFound {
                LifecycleError::StrategySourceNotFound(source)
            } else {
                LifecycleError::io(format!("cannot copy strategy {}", file_name), e)
            });
        }
        tokio::fs::rename(&staging, &destination)
            .await
            .map_err(|e| LifecycleError::io(format!("cannot install strategy {}", file_name), e))?;

        debug!("Installed strategy {} into {}", file_name, dest_dir.display());
        Ok(file_name[..file_name.len() - STRATEGY_EXTENSION.len()].to_string())
    }
}

/// Trims the name, rejects anything path-like and appends `.py` when missing.
pub fn normalize_file_name(raw: &str) -> Result<String, LifecycleError> {
    let name = raw.trim();
    let invalid = || LifecycleError::InvalidStrategyName(raw.to_string());

    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(invalid());
    }

    let has_extension = name.len() > STRATEGY_EXTENSION.len()
        && name
            .get(name.len() - STRATEGY_EXTENSION.len()..)
            .map(|ext| ext.eq_ignore_ascii_case(STRATEGY_EXTENSION))
            .unwrap_or(false);

    if has_extension {
        // Keep the class-name part, normalize the extension.
        let stem = &name[..name.len() - STRATEGY_EXTENSION.len()];
        Ok(format!("{}{}", stem, STRATEGY_EXTENSION))
    } else if name.eq_ignore_ascii_case(STRATEGY_EXTENSION) {
        Err(invalid())
    } else {
        Ok(format!("{}{}", name, STRATEGY_EXTENSION))
    }
}

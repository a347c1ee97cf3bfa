use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrganizerError {
    #[error("输入文件不存在: {0}")]
    MissingInput(PathBuf),

    #[error("refusing to overwrite input file in place: {0}")]
    OutputIsInput(PathBuf),

    #[error("unsupported table format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("sheet '{sheet}' not found in {path}")]
    MissingSheet { path: PathBuf, sheet: String },

    #[error("column '{column}' not found in {table}")]
    MissingColumn { table: String, column: String },

    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
}

/// Fails with `MissingInput` unless `path` exists.
pub fn require_exists(path: &std::path::Path) -> Result<(), OrganizerError> {
    if path.exists() {
        Ok(())
    } else {
        Err(OrganizerError::MissingInput(path.to_path_buf()))
    }
}

use crate::error::require_exists;
use anyhow::{Context, Result};
use chrono::Local;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_BACKUP_DIR: &str = "data/backup";

/// Copies `original` into `backup_dir` as `backup_<timestamp>_<name>`.
///
/// A numeric suffix is added when a backup with the same second-resolution
/// timestamp already exists, so every call yields a new file.
pub fn create_backup(original: &Path, backup_dir: &Path) -> Result<PathBuf> {
    require_exists(original)?;
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("无法创建备份目录: {}", backup_dir.display()))?;

    let file_name = original
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    let mut backup_path = backup_dir.join(format!("backup_{}_{}", timestamp, file_name));
    let mut counter = 1;
    while backup_path.exists() {
        backup_path = backup_dir.join(format!("backup_{}_{}_{}", timestamp, counter, file_name));
        counter += 1;
    }

    fs::copy(original, &backup_path).with_context(|| {
        format!(
            "备份文件失败: {} -> {}",
            original.display(),
            backup_path.display()
        )
    })?;
    info!("文件已备份到: {}", backup_path.display());
    Ok(backup_path)
}

/// True when both paths point at the same file (or would, once created).
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backup_copies_content() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let original = tmp_dir.path().join("papers.xlsx");
        fs::write(&original, "workbook bytes")?;

        let backup = create_backup(&original, &tmp_dir.path().join("backup"))?;
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("backup_"));
        assert!(name.ends_with("_papers.xlsx"));
        assert_eq!(fs::read_to_string(&backup)?, "workbook bytes");
        Ok(())
    }

    #[test]
    fn test_repeated_backups_are_distinct() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let original = tmp_dir.path().join("papers.xlsx");
        fs::write(&original, "v1")?;
        let backup_dir = tmp_dir.path().join("backup");

        let first = create_backup(&original, &backup_dir)?;
        let second = create_backup(&original, &backup_dir)?;
        assert_ne!(first, second);
        assert_eq!(fs::read_dir(&backup_dir)?.count(), 2);
        assert_eq!(fs::read_to_string(&original)?, "v1");
        Ok(())
    }

    #[test]
    fn test_backup_of_missing_file_fails() {
        let tmp_dir = TempDir::new().unwrap();
        let result = create_backup(&tmp_dir.path().join("missing.xlsx"), tmp_dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_same_file() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let file = tmp_dir.path().join("a.xlsx");
        fs::write(&file, "x")?;
        let dotted = tmp_dir.path().join(".").join("a.xlsx");
        assert!(same_file(&file, &dotted));
        assert!(!same_file(&file, &tmp_dir.path().join("b.xlsx")));
        Ok(())
    }
}

//! Rewrites one workbook column of file paths as clickable hyperlinks.

use crate::backup::{create_backup, same_file};
use crate::error::{require_exists, OrganizerError};
use crate::report::preview;
use crate::table::{link_target, save_tables, Table};
use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkStats {
    pub rows: usize,
    pub linked: usize,
    pub empty: usize,
    pub not_a_link: usize,
    /// Linked paths that do not exist on this machine.
    pub missing_files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkOutcome {
    pub output_path: PathBuf,
    pub backup_path: PathBuf,
    pub column: String,
    pub stats: LinkStats,
}

/// Resolves a header name, or an Excel column letter such as `J`.
pub fn resolve_column(table: &Table, column: &str) -> Option<usize> {
    table.find_column(&[column]).or_else(|| {
        let letters = column.trim();
        if letters.is_empty() || letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let index = letters
            .to_ascii_uppercase()
            .bytes()
            .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize)
            - 1;
        (index < table.headers.len()).then_some(index)
    })
}

pub fn link_column(
    input: &Path,
    sheet: Option<&str>,
    column: &str,
    output: &Path,
    backup_dir: &Path,
) -> Result<LinkOutcome> {
    require_exists(input)?;
    if same_file(input, output) {
        return Err(OrganizerError::OutputIsInput(output.to_path_buf()).into());
    }

    let backup_path = create_backup(input, backup_dir)?;
    let mut tables = Table::load_all(input)?;
    let index = match sheet {
        Some(name) => tables.iter().position(|t| t.name == name),
        None => (!tables.is_empty()).then_some(0),
    }
    .ok_or_else(|| OrganizerError::MissingSheet {
        path: input.to_path_buf(),
        sheet: sheet.unwrap_or("<first>").to_string(),
    })?;
    let table = &mut tables[index];
    let col = resolve_column(table, column).ok_or_else(|| OrganizerError::MissingColumn {
        table: table.name.clone(),
        column: column.to_string(),
    })?;
    let header = table.headers[col].clone();
    info!("正在处理列 {} ({})", column, header);

    let mut stats = LinkStats {
        rows: table.len(),
        ..Default::default()
    };
    for row in 0..table.len() {
        let value = table.cell(row, Some(col)).trim().to_string();
        if value.is_empty() {
            stats.empty += 1;
            continue;
        }
        match link_target(&value) {
            Some(target) => {
                stats.linked += 1;
                let local = target.strip_prefix("file://").map(Path::new);
                if local.is_some_and(|p| !p.exists()) && !Path::new(&value).exists() {
                    warn!("第{}行：文件不存在 - {}", row + 2, preview(&value, 50));
                    stats.missing_files += 1;
                } else {
                    debug!("第{}行：{}", row + 2, target);
                }
                table.set(row, col, value);
            }
            None => stats.not_a_link += 1,
        }
    }
    table.mark_link_column(col);

    let sheets: Vec<&Table> = tables.iter().collect();
    let output_path = save_tables(output, &sheets)?;
    info!(
        "转换完成: {} 个超链接, {} 个空单元格, {} 个非路径值, {} 个文件不存在",
        stats.linked, stats.empty, stats.not_a_link, stats.missing_files
    );

    Ok(LinkOutcome {
        output_path,
        backup_path,
        column: header,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_column() {
        let headers = (1..=10).map(|i| format!("c{}", i)).collect();
        let table = Table::new("t", headers);
        assert_eq!(resolve_column(&table, "c3"), Some(2));
        assert_eq!(resolve_column(&table, "J"), Some(9));
        assert_eq!(resolve_column(&table, "j"), Some(9));
        assert_eq!(resolve_column(&table, "K"), None);
        assert_eq!(resolve_column(&table, "no such"), None);
    }

    #[test]
    fn test_link_column() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let pdf = tmp_dir.path().join("[10.1_a].pdf");
        fs::write(&pdf, "pdf")?;

        let mut table = Table::new("Sheet1", vec!["标题".to_string(), "PDF链接".to_string()]);
        table.push_row(vec!["A".to_string(), pdf.to_string_lossy().to_string()]);
        table.push_row(vec!["B".to_string(), "PDF文件未找到".to_string()]);
        table.push_row(vec!["C".to_string(), "".to_string()]);
        table.push_row(vec!["D".to_string(), "/nowhere/[10.1_b].pdf".to_string()]);
        let input = tmp_dir.path().join("papers.xlsx");
        save_tables(&input, &[&table])?;

        let output = tmp_dir.path().join("papers_linked.xlsx");
        let outcome = link_column(&input, None, "B", &output, &tmp_dir.path().join("backup"))?;

        assert_eq!(outcome.column, "PDF链接");
        assert_eq!(outcome.stats.linked, 2);
        assert_eq!(outcome.stats.not_a_link, 1);
        assert_eq!(outcome.stats.empty, 1);
        assert_eq!(outcome.stats.missing_files, 1);
        assert!(outcome.backup_path.exists());

        let linked = Table::load(&output, None)?;
        assert_eq!(linked.cell(0, Some(1)), "[10.1_a].pdf");
        assert_eq!(linked.cell(1, Some(1)), "PDF文件未找到");
        Ok(())
    }

    #[test]
    fn test_link_column_keeps_other_sheets() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let mut main = Table::new("论文机构信息", vec!["标题".to_string(), "PDF链接".to_string()]);
        main.push_row(vec!["A".to_string(), "/nowhere/[10.1_a].pdf".to_string()]);
        let mut stats = Table::new("统计信息", vec!["统计项目".to_string(), "数值".to_string()]);
        stats.push_row(vec!["论文总数".to_string(), "1".to_string()]);
        let input = tmp_dir.path().join("affiliations.xlsx");
        save_tables(&input, &[&main, &stats])?;

        let output = tmp_dir.path().join("affiliations_linked.xlsx");
        link_column(&input, None, "PDF链接", &output, &tmp_dir.path().join("backup"))?;

        let sheets = Table::load_all(&output)?;
        let names: Vec<&str> = sheets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["论文机构信息", "统计信息"]);
        assert_eq!(sheets[0].cell(0, Some(1)), "[10.1_a].pdf");
        assert_eq!(sheets[1].cell(0, Some(0)), "论文总数");
        assert_eq!(sheets[1].cell(0, Some(1)), "1");

        let second = tmp_dir.path().join("stats_only.xlsx");
        let outcome = link_column(&input, Some("统计信息"), "数值", &second, &tmp_dir.path().join("backup"))?;
        assert_eq!(outcome.stats.linked, 0);
        assert_eq!(Table::load_all(&second)?.len(), 2);

        let missing = link_column(&input, Some("nope"), "PDF链接", &second, &tmp_dir.path().join("backup"));
        assert!(missing.is_err());
        Ok(())
    }

    #[test]
    fn test_link_column_refuses_in_place() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let input = tmp_dir.path().join("papers.xlsx");
        save_tables(&input, &[&Table::new("Sheet1", vec!["PDF链接".to_string()])])?;

        let err = link_column(&input, None, "PDF链接", &input, tmp_dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrganizerError>(),
            Some(OrganizerError::OutputIsInput(_))
        ));
        Ok(())
    }
}

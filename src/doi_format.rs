//! Rewrites the DOI column of a table between the slash form and the
//! underscore form used in PDF filenames.

use crate::backup::{create_backup, same_file};
use crate::error::{require_exists, OrganizerError};
use crate::hyperlinks::resolve_column;
use crate::normalizer::encode_doi_for_filename;
use crate::reconcile::sibling_path;
use crate::report::Report;
use crate::table::{save_tables, Table};
use anyhow::Result;
use clap::ValueEnum;
use log::{debug, info};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DOI_COLUMNS: &[&str] = &["DOI", "标准化DOI"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DoiStyle {
    /// `10.1038/nature14539`
    Slash,
    /// `10.1038_nature14539`
    Underscore,
}

impl fmt::Display for DoiStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoiStyle::Slash => write!(f, "slash"),
            DoiStyle::Underscore => write!(f, "underscore"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoiChange {
    /// 1-based data row.
    pub row: usize,
    pub original: String,
    pub converted: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertOutcome {
    pub output_path: PathBuf,
    pub backup_path: PathBuf,
    pub report_path: PathBuf,
    pub column: String,
    pub style: DoiStyle,
    pub rows: usize,
    pub changed: Vec<DoiChange>,
}

/// Converts one DOI. Case is kept; only the delimiter changes.
/// The slash form turns the first `_` into `/` when there is no `/` yet.
pub fn convert_doi(doi: &str, style: DoiStyle) -> String {
    let doi = doi.trim();
    match style {
        DoiStyle::Underscore => encode_doi_for_filename(doi),
        DoiStyle::Slash if doi.contains('/') => doi.to_string(),
        DoiStyle::Slash => doi.replacen('_', "/", 1),
    }
}

/// Rewrites the DOI column of the first sheet of `input` into `output`.
/// Other sheets and columns are copied unchanged.
pub fn convert_doi_column(
    input: &Path,
    output: &Path,
    column: Option<&str>,
    style: DoiStyle,
    backup_dir: &Path,
) -> Result<ConvertOutcome> {
    require_exists(input)?;
    if same_file(input, output) {
        return Err(OrganizerError::OutputIsInput(output.to_path_buf()).into());
    }

    let backup_path = create_backup(input, backup_dir)?;
    let mut tables = Table::load_all(input)?;
    let table = tables
        .first_mut()
        .ok_or_else(|| OrganizerError::MissingSheet {
            path: input.to_path_buf(),
            sheet: "<first>".to_string(),
        })?;
    let col = match column {
        Some(name) => resolve_column(table, name),
        None => table.find_column(DOI_COLUMNS),
    }
    .ok_or_else(|| OrganizerError::MissingColumn {
        table: table.name.clone(),
        column: column.unwrap_or(DOI_COLUMNS[0]).to_string(),
    })?;
    let header = table.headers[col].clone();

    let mut changed = Vec::new();
    for row in 0..table.len() {
        let original = table.cell(row, Some(col)).to_string();
        if original.trim().is_empty() {
            continue;
        }
        let converted = convert_doi(&original, style);
        if converted != original {
            debug!("第{}行 DOI转换: '{}' -> '{}'", row + 1, original, converted);
            table.set(row, col, converted.clone());
            changed.push(DoiChange {
                row: row + 1,
                original,
                converted,
            });
        }
    }
    let rows = table.len();

    let sheets: Vec<&Table> = tables.iter().collect();
    let output_path = save_tables(output, &sheets)?;
    info!(
        "DOI列 {} 已转换为 {} 格式: {} / {} 行有变化",
        header,
        style,
        changed.len(),
        rows
    );

    let mut outcome = ConvertOutcome {
        output_path,
        backup_path,
        report_path: sibling_path(output, "_DOI格式转换报告", "txt"),
        column: header,
        style,
        rows,
        changed,
    };
    outcome.report_path = change_report(input, &outcome).write(&outcome.report_path)?;
    Ok(outcome)
}

fn change_report(input: &Path, outcome: &ConvertOutcome) -> Report {
    let mut report = Report::plain("DOI格式转换报告");
    report
        .field("输入文件", input.display())
        .field("输出文件", outcome.output_path.display())
        .field("备份文件", outcome.backup_path.display())
        .field("DOI列", &outcome.column)
        .field("目标格式", outcome.style)
        .field("数据行数", outcome.rows)
        .field("变更数量", outcome.changed.len())
        .blank()
        .section("变更明细:");
    for change in &outcome.changed {
        report.line(&format!(
            "第{}行: {} -> {}",
            change.row, change.original, change.converted
        ));
    }
    report
}

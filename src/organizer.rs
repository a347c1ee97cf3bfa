//! Copies `[<doi>].pdf` files into one folder per publication year.

use crate::error::require_exists;
use crate::normalizer::filename_key;
use crate::report::Report;
use crate::scanner::Scanner;
use crate::table::Table;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub const UNKNOWN_YEAR_DIR: &str = "unknown";
pub const REPORT_NAME: &str = "organization_report.md";

#[derive(Debug, Clone, Serialize)]
pub struct PlacedPdf {
    pub name: String,
    pub year: Option<i32>,
    pub target: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizeOutcome {
    pub output_dir: PathBuf,
    pub total_pdfs: usize,
    pub skipped: Vec<String>,
    pub placed: Vec<PlacedPdf>,
    pub failed: Vec<String>,
    pub per_year: BTreeMap<String, usize>,
    pub report_path: PathBuf,
}

/// `filename_key(DOI)` to publication year. Rows without a usable year are
/// logged and left out.
pub fn year_index(table: &Table) -> HashMap<String, i32> {
    let doi_col = table.find_column_or_warn(&["DOI"]);
    let year_col = table.find_column_or_warn(&["Publication Year", "Year"]);

    let mut index = HashMap::new();
    for row in 0..table.len() {
        let doi = table.cell(row, doi_col).trim();
        let year = table.cell(row, year_col).trim();
        match (doi.is_empty(), parse_year(year)) {
            (false, Some(year)) => {
                index.entry(filename_key(doi)).or_insert(year);
            }
            _ => warn!("第{}行数据不完整: DOI='{}', Year='{}'", row + 2, doi, year),
        }
    }
    info!("成功加载 {} 条DOI-年份映射记录", index.len());
    index
}

fn parse_year(raw: &str) -> Option<i32> {
    let digits = raw.strip_suffix(".0").unwrap_or(raw);
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

pub fn organize_by_year(csv: &Path, input_dir: &Path, output_dir: &Path) -> Result<OrganizeOutcome> {
    require_exists(csv)?;
    require_exists(input_dir)?;

    let index = year_index(&Table::load(csv, None)?);
    let pdfs = Scanner::new(input_dir, 1)?.scan()?;
    info!("发现 {} 个PDF文件", pdfs.len());

    fs::create_dir_all(output_dir)
        .with_context(|| format!("无法创建输出目录: {}", output_dir.display()))?;

    let mut outcome = OrganizeOutcome {
        output_dir: output_dir.to_path_buf(),
        total_pdfs: pdfs.len(),
        skipped: Vec::new(),
        placed: Vec::new(),
        failed: Vec::new(),
        per_year: BTreeMap::new(),
        report_path: output_dir.join(REPORT_NAME),
    };

    for pdf in pdfs {
        let Some(encoded) = pdf.encoded_doi.as_deref() else {
            debug!("跳过非DOI文件: {}", pdf.name);
            outcome.skipped.push(pdf.name);
            continue;
        };

        let year = index.get(&filename_key(encoded)).copied();
        if year.is_none() {
            warn!("未找到DOI对应年份: {} (文件: {})", encoded, pdf.name);
        }
        let folder = year.map_or_else(|| UNKNOWN_YEAR_DIR.to_string(), |y| y.to_string());
        let target_dir = output_dir.join(&folder);
        let target = target_dir.join(&pdf.name);

        let copied = fs::create_dir_all(&target_dir).and_then(|_| fs::copy(&pdf.path, &target));
        match copied {
            Ok(_) => {
                debug!("复制文件: {} -> {}", pdf.name, folder);
                *outcome.per_year.entry(folder).or_default() += 1;
                outcome.placed.push(PlacedPdf { name: pdf.name, year, target });
            }
            Err(e) => {
                error!("复制文件失败 {}: {}", pdf.name, e);
                outcome.failed.push(pdf.name);
            }
        }
    }

    info!("各年份文件分布:");
    for (year, count) in &outcome.per_year {
        info!("  {}: {} 篇", year, count);
    }

    write_report(&outcome)?;
    Ok(outcome)
}

fn write_report(outcome: &OrganizeOutcome) -> Result<()> {
    let known = outcome
        .placed
        .iter()
        .filter(|p| p.year.is_some())
        .count();

    let mut report = Report::markdown("论文按年份整理报告");
    report
        .section("统计")
        .field("PDF文件总数", outcome.total_pdfs)
        .field("已按年份整理", known)
        .field("未知年份", outcome.placed.len() - known)
        .field("跳过的非DOI文件", outcome.skipped.len())
        .field("复制失败", outcome.failed.len())
        .blank()
        .section("年份分布")
        .table(
            &["年份", "数量"],
            &outcome
                .per_year
                .iter()
                .map(|(year, count)| vec![year.clone(), count.to_string()])
                .collect::<Vec<_>>(),
        );

    if !outcome.skipped.is_empty() {
        report.section("跳过的文件");
        for name in &outcome.skipped {
            report.item(name);
        }
        report.blank();
    }

    report.write(&outcome.report_path)?;
    Ok(())
}

//! Compares the DOIs of a CSV export with the DOIs encoded in PDF filenames.

use crate::error::require_exists;
use crate::normalizer::filename_key;
use crate::report::{percent, preview, Report};
use crate::scanner::Scanner;
use crate::table::Table;
use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const REPORT_NAME: &str = "DOI一致性验证报告.txt";

/// A DOI present on only one side, with what identifies it there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OneSided {
    pub key: String,
    /// Title from the CSV, or the PDF filename.
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyOutcome {
    pub csv_count: usize,
    pub pdf_count: usize,
    pub common: Vec<String>,
    pub csv_only: Vec<OneSided>,
    pub pdf_only: Vec<OneSided>,
    pub consistency_rate: f64,
    pub report_path: PathBuf,
}

impl ConsistencyOutcome {
    pub fn is_perfect(&self) -> bool {
        self.csv_only.is_empty() && self.pdf_only.is_empty()
    }
}

/// Key to title for every CSV row with a DOI; the first title wins.
pub fn csv_keys(table: &Table) -> BTreeMap<String, String> {
    let doi_col = table.find_column_or_warn(&["DOI"]);
    let title_col = table.find_column(&["Title"]);
    let mut keys = BTreeMap::new();
    for row in 0..table.len() {
        let doi = table.cell(row, doi_col).trim();
        if doi.is_empty() {
            continue;
        }
        let key = filename_key(doi);
        debug!("CSV第{}行 DOI: {} -> {}", row + 1, doi, key);
        keys.entry(key)
            .or_insert_with(|| preview(table.cell(row, title_col).trim(), 50));
    }
    info!("从CSV中提取到 {} 个唯一DOI", keys.len());
    keys
}

/// Key to filename for every top-level `[<doi>].pdf` in the folder.
pub fn pdf_keys(pdf_dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut keys = BTreeMap::new();
    for pdf in Scanner::new(pdf_dir, 1)?.scan()? {
        match pdf.encoded_doi.as_deref() {
            Some(encoded) => {
                keys.entry(filename_key(encoded)).or_insert(pdf.name);
            }
            None => warn!("PDF文件名格式不符合[DOI].pdf: {}", pdf.name),
        }
    }
    info!("从PDF文件名中提取到 {} 个DOI", keys.len());
    Ok(keys)
}

pub fn check_consistency(csv: &Path, pdf_dir: &Path, report_dir: &Path) -> Result<ConsistencyOutcome> {
    require_exists(csv)?;
    require_exists(pdf_dir)?;

    let from_csv = csv_keys(&Table::load(csv, None)?);
    let from_pdfs = pdf_keys(pdf_dir)?;

    let common: Vec<String> = from_csv
        .keys()
        .filter(|k| from_pdfs.contains_key(*k))
        .cloned()
        .collect();
    let one_sided = |ours: &BTreeMap<String, String>, theirs: &BTreeMap<String, String>| {
        ours.iter()
            .filter(|(k, _)| !theirs.contains_key(*k))
            .map(|(key, label)| OneSided { key: key.clone(), label: label.clone() })
            .collect::<Vec<_>>()
    };

    let outcome = ConsistencyOutcome {
        csv_count: from_csv.len(),
        pdf_count: from_pdfs.len(),
        csv_only: one_sided(&from_csv, &from_pdfs),
        pdf_only: one_sided(&from_pdfs, &from_csv),
        consistency_rate: percent(common.len(), from_csv.len()),
        common,
        report_path: report_dir.join(REPORT_NAME),
    };

    write_report(&outcome, csv, pdf_dir)?;
    Ok(outcome)
}

fn write_report(outcome: &ConsistencyOutcome, csv: &Path, pdf_dir: &Path) -> Result<()> {
    let mut report = Report::plain("DOI一致性验证详细报告");
    report
        .field("CSV文件", csv.display())
        .field("PDF文件夹", pdf_dir.display())
        .blank()
        .section("验证结果统计:")
        .field("CSV文件DOI数量", outcome.csv_count)
        .field("PDF文件DOI数量", outcome.pdf_count)
        .field("完全匹配DOI数量", outcome.common.len())
        .field("一致性比例", format!("{:.1}%", outcome.consistency_rate))
        .blank()
        .section(&format!("完全匹配的DOI列表 ({}个):", outcome.common.len()));
    for (i, key) in outcome.common.iter().enumerate() {
        report.line(&format!("{:2}. {}", i + 1, key));
    }
    report.blank();

    if !outcome.csv_only.is_empty() {
        report.section(&format!("仅在CSV中存在的DOI ({}个):", outcome.csv_only.len()));
        for (i, item) in outcome.csv_only.iter().enumerate() {
            report.entry(i + 1, &item.key, &[format!("标题: {}", item.label)]);
        }
    }
    if !outcome.pdf_only.is_empty() {
        report.section(&format!("仅在PDF中存在的DOI ({}个):", outcome.pdf_only.len()));
        for (i, item) in outcome.pdf_only.iter().enumerate() {
            report.entry(i + 1, &item.key, &[format!("文件名: {}", item.label)]);
        }
    }
    if outcome.is_perfect() {
        report.line("🎉 完美匹配！所有DOI都完全一致！");
    }

    report.write(&outcome.report_path)?;
    Ok(())
}

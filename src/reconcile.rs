//! Record reconciliation: match target rows against source records and
//! copy the payload columns of the matched source into each target row.

use crate::backup::{create_backup, same_file};
use crate::error::{require_exists, OrganizerError};
use crate::matcher::{MatchKey, MatchKind, MatchStats, Matcher, Resolution};
use crate::report::{preview, Report};
use crate::table::{save_tables, Table};
use anyhow::Result;
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A record carrying payload values, one per payload column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub doi: String,
    pub title: String,
    pub payload: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MergePlan {
    pub target: PathBuf,
    pub target_sheet: Option<String>,
    pub output: PathBuf,
    pub backup_dir: PathBuf,
    pub doi_columns: Vec<String>,
    pub title_columns: Vec<String>,
    pub payload_columns: Vec<String>,
    pub threshold: u8,
    pub match_report: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnmatchedRecord {
    /// 1-based data row number.
    pub row: usize,
    pub doi: String,
    pub title: String,
}

/// Everything a merge run produced on disk, plus its statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub output_path: PathBuf,
    pub backup_path: PathBuf,
    pub report_path: PathBuf,
    pub match_report_path: Option<PathBuf>,
    pub threshold: u8,
    pub stats: MatchStats,
    pub unmatched: Vec<UnmatchedRecord>,
}

pub fn run_merge(plan: &MergePlan, sources: &[SourceRecord]) -> Result<MergeOutcome> {
    require_exists(&plan.target)?;
    if same_file(&plan.target, &plan.output) {
        return Err(OrganizerError::OutputIsInput(plan.output.clone()).into());
    }

    let backup_path = create_backup(&plan.target, &plan.backup_dir)?;
    let mut table = Table::load(&plan.target, plan.target_sheet.as_deref())?;
    if table.is_empty() {
        warn!("目标表 '{}' 没有数据行", table.name);
    }

    let doi_candidates: Vec<&str> = plan.doi_columns.iter().map(String::as_str).collect();
    let title_candidates: Vec<&str> = plan.title_columns.iter().map(String::as_str).collect();
    let doi_col = table.find_column_or_warn(&doi_candidates);
    let title_col = table.find_column_or_warn(&title_candidates);

    let target_keys: Vec<MatchKey> = (0..table.len())
        .map(|row| MatchKey::new(table.cell(row, doi_col), table.cell(row, title_col)))
        .collect();
    let source_keys = MatchKey::from_records(sources, |s| s.doi.as_str(), |s| s.title.as_str());

    info!(
        "Matching {} target rows against {} source records (threshold {})",
        target_keys.len(),
        source_keys.len(),
        plan.threshold
    );
    let resolutions = Matcher::new(plan.threshold).resolve_all(&target_keys, &source_keys);

    let snapshot = table.clone();
    let unmatched = write_back(&mut table, &resolutions, sources, &plan.payload_columns, doi_col, title_col);
    let stats = MatchStats::from_resolutions(&resolutions);
    log_stats(&stats);

    let output_path = save_tables(&plan.output, &[&table])?;

    let match_report_path = if plan.match_report && stats.matched() > 0 {
        let details = match_details(&snapshot, &resolutions, sources, plan, doi_col, title_col);
        let path = sibling_path(&plan.output, "_match_report", "xlsx");
        save_tables(&path, &[&details])?;
        info!("详细匹配报告已保存: {}", path.display());
        Some(path)
    } else {
        None
    };

    let report_path = sibling_path(&plan.output, "_合并报告", "md");
    let outcome = MergeOutcome {
        output_path,
        backup_path,
        report_path,
        match_report_path,
        threshold: plan.threshold,
        stats,
        unmatched,
    };
    merge_report(&outcome, &plan.payload_columns).write(&outcome.report_path)?;

    Ok(outcome)
}

/// Resets every payload column to empty strings, then fills matched rows.
/// Returns the rows left unmatched.
pub fn write_back(
    table: &mut Table,
    resolutions: &[Resolution],
    sources: &[SourceRecord],
    payload_columns: &[String],
    doi_col: Option<usize>,
    title_col: Option<usize>,
) -> Vec<UnmatchedRecord> {
    let columns: Vec<usize> = payload_columns
        .iter()
        .map(|name| table.reset_column(name))
        .collect();

    let mut unmatched = Vec::new();
    for resolution in resolutions {
        match resolution.source.and_then(|idx| sources.get(idx)) {
            Some(source) => {
                for (i, &col) in columns.iter().enumerate() {
                    let value = source.payload.get(i).cloned().unwrap_or_default();
                    table.set(resolution.target, col, value);
                }
                info!(
                    "{}匹配成功 {}: {}",
                    match resolution.kind {
                        MatchKind::DoiExact => "DOI",
                        _ => "标题",
                    },
                    resolution.target + 1,
                    resolution.kind
                );
            }
            None => {
                let title = table.cell(resolution.target, title_col).to_string();
                warn!("未找到匹配 {}: {}", resolution.target + 1, preview(&title, 50));
                unmatched.push(UnmatchedRecord {
                    row: resolution.target + 1,
                    doi: table.cell(resolution.target, doi_col).to_string(),
                    title,
                });
            }
        }
    }
    unmatched
}

fn match_details(
    targets: &Table,
    resolutions: &[Resolution],
    sources: &[SourceRecord],
    plan: &MergePlan,
    doi_col: Option<usize>,
    title_col: Option<usize>,
) -> Table {
    let mut headers: Vec<String> = [
        "target_index",
        "target_title",
        "target_doi",
        "source_index",
        "source_title",
        "source_doi",
        "match_type",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect();
    headers.extend(plan.payload_columns.iter().cloned());

    let mut details = Table::new("匹配详情", headers);
    for resolution in resolutions {
        let Some(source_idx) = resolution.source else {
            continue;
        };
        let Some(source) = sources.get(source_idx) else {
            continue;
        };
        let mut row = vec![
            (resolution.target + 1).to_string(),
            targets.cell(resolution.target, title_col).to_string(),
            targets.cell(resolution.target, doi_col).to_string(),
            (source_idx + 1).to_string(),
            source.title.clone(),
            source.doi.clone(),
            resolution.kind.to_string(),
        ];
        row.extend(source.payload.iter().cloned());
        details.push_row(row);
    }
    details
}

fn log_stats(stats: &MatchStats) {
    info!("=== 匹配统计 ===");
    for (label, count) in [
        ("DOI_EXACT", stats.doi_exact),
        ("TITLE_FUZZY", stats.title_fuzzy),
        ("NO_MATCH", stats.no_match),
    ] {
        info!(
            "{}: {} 条记录 ({:.1}%)",
            label,
            count,
            stats.percentage(count)
        );
    }
    info!("总计: {}", stats.total);
}

fn merge_report(outcome: &MergeOutcome, payload_columns: &[String]) -> Report {
    let stats = &outcome.stats;
    let mut report = Report::markdown("合并匹配报告");
    report
        .section("文件")
        .field("输出文件", outcome.output_path.display())
        .field("备份文件", outcome.backup_path.display())
        .field("写入列", payload_columns.join(", "))
        .field("标题相似度阈值", outcome.threshold)
        .blank()
        .section("匹配统计")
        .table(
            &["匹配类型", "数量", "比例"],
            &[
                ("DOI_EXACT", stats.doi_exact),
                ("TITLE_FUZZY", stats.title_fuzzy),
                ("NO_MATCH", stats.no_match),
            ]
            .iter()
            .map(|(label, count)| {
                vec![
                    label.to_string(),
                    count.to_string(),
                    format!("{:.1}%", stats.percentage(*count)),
                ]
            })
            .collect::<Vec<_>>(),
        )
        .field("总计", stats.total)
        .blank();

    report.section("未匹配记录");
    if outcome.unmatched.is_empty() {
        report.line("✅ 所有记录均已匹配。").blank();
    } else {
        for record in &outcome.unmatched {
            let doi = if record.doi.is_empty() { "无DOI" } else { record.doi.as_str() };
            report.checklist_item(&format!("第 {} 行: {} ({})", record.row, record.title, doi));
        }
        report.blank();
    }
    report
}

/// `<dir>/<stem><suffix>.<ext>` next to `path`.
pub fn sibling_path(path: &Path, suffix: &str, ext: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{}{}.{}", stem, suffix, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn plan(tmp: &Path, target: &Path, output: &Path) -> MergePlan {
        MergePlan {
            target: target.to_path_buf(),
            target_sheet: None,
            output: output.to_path_buf(),
            backup_dir: tmp.join("backup"),
            doi_columns: vec!["DOI".to_string()],
            title_columns: vec!["Title".to_string()],
            payload_columns: vec!["论文主题".to_string()],
            threshold: 85,
            match_report: true,
        }
    }

    fn source(doi: &str, title: &str, payload: &str) -> SourceRecord {
        SourceRecord {
            doi: doi.to_string(),
            title: title.to_string(),
            payload: vec![payload.to_string()],
        }
    }

    #[test]
    fn test_merge_by_doi_and_title() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let target = tmp_dir.path().join("papers.csv");
        fs::write(
            &target,
            "DOI,Title\n10.1_a,\n,deep learning in neural networks!!\n10.9/zzz,Unrelated work\n",
        )?;
        let output = tmp_dir.path().join("out").join("papers_with_topics.csv");

        let sources = vec![
            source("10.1/a", "", "X"),
            source("", "Deep Learning in Neural Networks", "Y"),
        ];
        let outcome = run_merge(&plan(tmp_dir.path(), &target, &output), &sources)?;

        assert_eq!(outcome.stats.doi_exact, 1);
        assert_eq!(outcome.stats.title_fuzzy, 1);
        assert_eq!(outcome.stats.no_match, 1);
        assert_eq!(outcome.unmatched.len(), 1);
        assert_eq!(outcome.unmatched[0].row, 3);

        let merged = Table::load(&output, None)?;
        let col = merged.column("论文主题");
        assert_eq!(merged.cell(0, col), "X");
        assert_eq!(merged.cell(1, col), "Y");
        assert_eq!(merged.cell(2, col), "");

        assert!(outcome.report_path.exists());
        let report = fs::read_to_string(&outcome.report_path)?;
        assert!(report.contains("Unrelated work"));
        assert!(outcome.match_report_path.as_ref().is_some_and(|p| p.exists()));
        Ok(())
    }

    #[test]
    fn test_merge_keeps_dates_and_numbers_typed() -> Result<()> {
        use crate::table::CellValue;
        use rust_xlsxwriter::{Format, Workbook};

        let tmp_dir = TempDir::new()?;
        let target = tmp_dir.path().join("papers.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in ["DOI", "Title", "Added", "Year"].iter().enumerate() {
            sheet.write_string(0, col as u16, *header)?;
        }
        sheet.write_string(1, 0, "10.1/a")?;
        sheet.write_string(1, 1, "A")?;
        sheet.write_number_with_format(1, 2, 45429.0, &Format::new().set_num_format("yyyy-mm-dd"))?;
        sheet.write_number(1, 3, 2006)?;
        workbook.save(&target)?;

        let output = tmp_dir.path().join("papers_with_topics.xlsx");
        run_merge(&plan(tmp_dir.path(), &target, &output), &[source("10.1/a", "A", "X")])?;

        let merged = Table::load(&output, None)?;
        assert_eq!(merged.headers, vec!["DOI", "Title", "Added", "Year", "论文主题"]);
        assert_eq!(merged.cell(0, Some(2)), "2024-05-17");
        assert_eq!(merged.value(0, 2), Some(CellValue::DateTime(45429.0)));
        assert_eq!(merged.value(0, 3), Some(CellValue::Number(2006.0)));
        assert_eq!(merged.cell(0, Some(4)), "X");
        assert_eq!(merged.value(0, 4), None);
        Ok(())
    }

    #[test]
    fn test_empty_sources_leave_empty_payload() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let target = tmp_dir.path().join("papers.csv");
        fs::write(&target, "DOI,Title,论文主题\n10.1/a,A,stale\n,B,\n")?;
        let output = tmp_dir.path().join("merged.xlsx");

        let outcome = run_merge(&plan(tmp_dir.path(), &target, &output), &[])?;
        assert_eq!(outcome.stats.no_match, 2);
        assert!(outcome.match_report_path.is_none());

        let merged = Table::load(&output, None)?;
        let col = merged.column("论文主题").expect("payload column");
        for row in &merged.rows {
            assert_eq!(row.get(col).map(String::as_str).unwrap_or(""), "");
        }
        Ok(())
    }

    #[test]
    fn test_write_back_keeps_empty_strings() {
        let mut table = Table::new("t", vec!["DOI".to_string(), "Title".to_string()]);
        table.push_row(vec!["10.1/a".to_string(), "A".to_string()]);
        table.push_row(vec!["".to_string(), "B".to_string()]);
        let resolutions = vec![
            Resolution { target: 0, source: Some(0), kind: MatchKind::DoiExact },
            Resolution { target: 1, source: None, kind: MatchKind::NoMatch },
        ];
        let sources = vec![SourceRecord {
            doi: "10.1/a".to_string(),
            title: "A".to_string(),
            payload: vec!["kw1; kw2".to_string()],
        }];
        let payload = vec!["author_keywords_wos".to_string(), "keywords_plus_wos".to_string()];

        let unmatched = write_back(&mut table, &resolutions, &sources, &payload, Some(0), Some(1));

        assert_eq!(table.rows[0], vec!["10.1/a", "A", "kw1; kw2", ""]);
        assert_eq!(table.rows[1], vec!["", "B", "", ""]);
        assert_eq!(
            unmatched,
            vec![UnmatchedRecord { row: 2, doi: String::new(), title: "B".to_string() }]
        );
    }

    #[test]
    fn test_merge_twice_creates_two_backups_and_keeps_original() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let target = tmp_dir.path().join("papers.csv");
        let original = "DOI,Title\n10.1/a,A\n";
        fs::write(&target, original)?;
        let output = tmp_dir.path().join("merged.csv");
        let sources = vec![source("10.1/a", "A", "X")];
        let plan = plan(tmp_dir.path(), &target, &output);

        let first = run_merge(&plan, &sources)?;
        let second = run_merge(&plan, &sources)?;

        assert_ne!(first.backup_path, second.backup_path);
        assert!(first.backup_path.exists());
        assert!(second.backup_path.exists());
        assert_eq!(fs::read_to_string(&target)?, original);
        Ok(())
    }

    #[test]
    fn test_refuses_to_overwrite_target() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let target = tmp_dir.path().join("papers.csv");
        fs::write(&target, "DOI,Title\n10.1/a,A\n")?;

        let err = run_merge(&plan(tmp_dir.path(), &target, &target), &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrganizerError>(),
            Some(OrganizerError::OutputIsInput(_))
        ));
        assert!(!tmp_dir.path().join("backup").exists());
        Ok(())
    }

    #[test]
    fn test_missing_target_is_fatal() {
        let tmp_dir = TempDir::new().unwrap();
        let target = tmp_dir.path().join("missing.xlsx");
        let output = tmp_dir.path().join("out.xlsx");
        let err = run_merge(&plan(tmp_dir.path(), &target, &output), &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrganizerError>(),
            Some(OrganizerError::MissingInput(_))
        ));
    }

    #[test]
    fn test_sibling_path() {
        assert_eq!(
            sibling_path(Path::new("/data/out/v5.xlsx"), "_match_report", "xlsx"),
            PathBuf::from("/data/out/v5_match_report.xlsx")
        );
    }
}

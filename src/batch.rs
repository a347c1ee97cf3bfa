//! DOI batching and Web of Science advanced-search query files.

use crate::error::OrganizerError;
use crate::report::{file_stamp, Report};
use crate::table::Table;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_BATCH_SIZE: usize = 5;
/// Queries longer than this are rejected by the search form in practice.
pub const QUERY_LENGTH_WARNING: usize = 2000;
const TITLE_QUERY_LIMIT: usize = 10;

/// Consecutive chunks of `size`; the last chunk holds the remainder.
pub fn split_batches<T: Clone>(ids: &[T], size: usize) -> Result<Vec<Vec<T>>, OrganizerError> {
    if size == 0 {
        return Err(OrganizerError::ZeroBatchSize);
    }
    Ok(ids.chunks(size).map(|chunk| chunk.to_vec()).collect())
}

/// `FIELD="a" OR FIELD="b"`, with double quotes removed from the ids.
pub fn format_query<S: AsRef<str>>(field: &str, ids: &[S]) -> String {
    ids.iter()
        .map(|id| format!("{}=\"{}\"", field, id.as_ref().replace('"', "")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFile {
    pub index: usize,
    pub path: PathBuf,
    pub count: usize,
    /// 1-based, inclusive range of the ids in this batch.
    pub first: usize,
    pub last: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub batch_size: usize,
    pub batches: Vec<BatchFile>,
    pub summary_path: PathBuf,
    pub doi_list_path: PathBuf,
    pub doi_query_path: PathBuf,
    pub title_query_path: PathBuf,
}

/// DOI and title of every row that has a DOI.
pub fn collect_ids(table: &Table) -> (Vec<String>, Vec<String>) {
    let doi_col = table.find_column_or_warn(&["DOI"]);
    let title_col = table.find_column(&["Title"]);
    let mut dois = Vec::new();
    let mut titles = Vec::new();
    for row in 0..table.len() {
        let doi = table.cell(row, doi_col).trim();
        if doi.is_empty() {
            continue;
        }
        dois.push(doi.to_string());
        titles.push(table.cell(row, title_col).trim().to_string());
    }
    info!("Extracted {} DOIs from {} rows", dois.len(), table.len());
    (dois, titles)
}

pub fn write_batch_searches(
    dois: &[String],
    titles: &[String],
    batch_size: usize,
    output_dir: &Path,
) -> Result<BatchOutcome> {
    let batches = split_batches(dois, batch_size)?;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("无法创建输出目录: {}", output_dir.display()))?;
    let stamp = file_stamp();

    info!("{} DOIs in {} batches of at most {}", dois.len(), batches.len(), batch_size);

    let mut files = Vec::new();
    let mut offset = 0;
    for (i, batch) in batches.iter().enumerate() {
        let index = i + 1;
        let path = output_dir.join(format!("batch_{:02}_search_{}.txt", index, stamp));
        let first = offset + 1;
        let last = offset + batch.len();

        let mut content = String::new();
        content.push_str(&format!("=== 第 {} 批 DOI 检索语句 ===\n", index));
        content.push_str(&format!("包含 {} 个DOI (序号 {}-{})\n\n", batch.len(), first, last));
        content.push_str("复制下面的语句到Web of Science高级检索：\n\n");
        content.push_str(&format_query("DO", batch));
        content.push_str("\n\n包含的DOI:\n");
        for (j, doi) in batch.iter().enumerate() {
            content.push_str(&format!("{}. {}\n", j + 1, doi));
        }
        fs::write(&path, content)
            .with_context(|| format!("无法写入批次文件: {}", path.display()))?;
        info!("批次 {}: {} 个DOI -> {}", index, batch.len(), path.display());

        files.push(BatchFile { index, path, count: batch.len(), first, last });
        offset = last;
    }

    let full_query = format_query("DO", dois);
    if full_query.chars().count() > QUERY_LENGTH_WARNING {
        warn!(
            "The single DOI query is {} characters long; use the batch files instead",
            full_query.chars().count()
        );
    }
    let doi_query_path = output_dir.join(format!("wos_doi_search_{}.txt", stamp));
    fs::write(
        &doi_query_path,
        format!(
            "=== Web of Science DOI批量检索语句 ===\n使用方法：复制下面的检索语句到WOS高级检索框中\n\n{}\n\n总计DOI数量: {}\n",
            full_query,
            dois.len()
        ),
    )
    .with_context(|| format!("无法写入检索文件: {}", doi_query_path.display()))?;

    let doi_list_path = output_dir.join(format!("doi_list_{}.txt", stamp));
    fs::write(
        &doi_list_path,
        format!("=== DOI列表 ===\n每行一个DOI，可用于其他数据库检索\n\n{}\n", dois.join("\n")),
    )
    .with_context(|| format!("无法写入DOI列表: {}", doi_list_path.display()))?;

    let named: Vec<&String> = titles
        .iter()
        .filter(|t| !t.is_empty())
        .take(TITLE_QUERY_LIMIT)
        .collect();
    let title_query_path = output_dir.join(format!("wos_title_search_{}.txt", stamp));
    fs::write(
        &title_query_path,
        format!(
            "=== Web of Science 标题检索语句（备用方案）===\n注意：由于长度限制，只包含前{}个标题\n\n{}\n",
            TITLE_QUERY_LIMIT,
            format_query("TI", &named)
        ),
    )
    .with_context(|| format!("无法写入检索文件: {}", title_query_path.display()))?;

    let summary_path = output_dir.join(format!("batch_summary_{}.md", stamp));
    let mut summary = Report::markdown("DOI分批检索总览");
    summary
        .field("总DOI数量", dois.len())
        .field("批次数量", files.len())
        .field("每批大小", format!("最多{}个DOI", batch_size))
        .blank()
        .section("使用步骤")
        .line("1. 按顺序使用每个批次的检索语句")
        .line("2. 在Web of Science中逐一检索")
        .line("3. 将所有结果导出并合并")
        .blank()
        .section("批次详情")
        .table(
            &["批次", "文件名", "DOI数量", "序号范围"],
            &files
                .iter()
                .map(|f| {
                    vec![
                        f.index.to_string(),
                        f.path
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default(),
                        f.count.to_string(),
                        format!("{}-{}", f.first, f.last),
                    ]
                })
                .collect::<Vec<_>>(),
        )
        .section("注意事项")
        .item("建议按批次顺序检索，避免遗漏")
        .item("每次检索后建议导出结果，最后合并")
        .item("如果某批次检索结果为空，检查DOI格式是否正确")
        .blank();
    summary.write(&summary_path)?;

    Ok(BatchOutcome {
        total: dois.len(),
        batch_size,
        batches: files,
        summary_path,
        doi_list_path,
        doi_query_path,
        title_query_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_batches_remainder() {
        let ids: Vec<usize> = (1..=13).collect();
        let batches = split_batches(&ids, 5).unwrap();

        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![5, 5, 3]);
        assert_eq!(batches.concat(), ids);
    }

    #[test]
    fn test_split_batches_edges() {
        let empty: Vec<String> = Vec::new();
        assert!(split_batches(&empty, 5).unwrap().is_empty());
        assert_eq!(split_batches(&[1, 2], 10).unwrap(), vec![vec![1, 2]]);
        assert!(matches!(
            split_batches(&[1], 0),
            Err(OrganizerError::ZeroBatchSize)
        ));
    }

    #[test]
    fn test_format_query() {
        assert_eq!(
            format_query("DO", &["10.1/a", "10.1/\"b\""]),
            "DO=\"10.1/a\" OR DO=\"10.1/b\""
        );
        assert_eq!(format_query::<&str>("TI", &[]), "");
    }

    #[test]
    fn test_write_batch_searches() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let dois: Vec<String> = (1..=13).map(|i| format!("10.1/{}", i)).collect();
        let titles: Vec<String> = (1..=13).map(|i| format!("Paper {}", i)).collect();

        let outcome = write_batch_searches(&dois, &titles, 5, tmp_dir.path())?;
        assert_eq!(outcome.batches.len(), 3);
        assert_eq!((outcome.batches[2].first, outcome.batches[2].last), (11, 13));

        let last = fs::read_to_string(&outcome.batches[2].path)?;
        assert!(last.contains("DO=\"10.1/11\" OR DO=\"10.1/12\" OR DO=\"10.1/13\""));

        let titles = fs::read_to_string(&outcome.title_query_path)?;
        assert!(titles.contains("TI=\"Paper 10\""));
        assert!(!titles.contains("Paper 11"));

        let summary = fs::read_to_string(&outcome.summary_path)?;
        assert!(summary.contains("| 3 |"));
        assert!(summary.contains("11-13"));
        Ok(())
    }

    #[test]
    fn test_collect_ids_skips_rows_without_doi() {
        let mut table = Table::new("papers", vec!["Title".to_string(), "DOI".to_string()]);
        table.push_row(vec!["A".to_string(), " 10.1/a ".to_string()]);
        table.push_row(vec!["B".to_string(), "".to_string()]);

        let (dois, titles) = collect_ids(&table);
        assert_eq!(dois, vec!["10.1/a"]);
        assert_eq!(titles, vec!["A"]);
    }
}

//! Looks up a researcher's institutions for every paper of a CSV export.

use crate::backup::{create_backup, same_file};
use crate::error::{require_exists, OrganizerError};
use crate::normalizer::{canonical_doi, pdf_filename_for_doi};
use crate::openalex::MetadataSource;
use crate::report::{percent, preview};
use crate::table::{save_tables, Table};
use anyhow::Result;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DELAY_MS: u64 = 1500;
pub const MAIN_SHEET: &str = "论文机构信息";
pub const STATS_SHEET: &str = "统计信息";
pub const NOT_FOUND: &str = "机构信息未找到";
pub const PDF_NOT_FOUND: &str = "PDF文件未找到";
const TOP_INSTITUTIONS: usize = 10;

const HEADERS: [&str; 11] = [
    "作者",
    "标题",
    "DOI",
    "标准化DOI",
    "发表年份",
    "发表日期",
    "期刊/会议",
    "引用次数",
    "机构",
    "PDF链接",
    "查询状态",
];

#[derive(Debug, Clone)]
pub struct AffiliationPlan {
    pub csv: PathBuf,
    pub output: PathBuf,
    pub backup_dir: PathBuf,
    pub pdf_dir: Option<PathBuf>,
    /// Only rows whose `Author` cell contains this substring.
    pub author_filter: Option<String>,
    pub researcher: String,
    pub delay: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AffiliationStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub api_errors: usize,
}

impl AffiliationStats {
    pub fn success_rate(&self) -> f64 {
        percent(self.successful, self.total)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AffiliationOutcome {
    pub output_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub stats: AffiliationStats,
    pub top_institutions: Vec<(String, usize)>,
}

struct Paper {
    author: String,
    title: String,
    doi: String,
    year: String,
    date: String,
    venue: String,
}

fn papers(table: &Table, author_filter: Option<&str>) -> Vec<Paper> {
    let author = table.find_column_or_warn(&["Author"]);
    let title = table.find_column_or_warn(&["Title"]);
    let doi = table.find_column_or_warn(&["DOI"]);
    let year = table.find_column(&["Publication Year"]);
    let date = table.find_column(&["Date"]);
    let venue = table.find_column(&["Publication Title"]);

    (0..table.len())
        .filter(|&row| author_filter.is_none_or(|needle| table.cell(row, author).contains(needle)))
        .map(|row| Paper {
            author: table.cell(row, author).to_string(),
            title: table.cell(row, title).to_string(),
            doi: table.cell(row, doi).trim().to_string(),
            year: table.cell(row, year).to_string(),
            date: table.cell(row, date).to_string(),
            venue: table.cell(row, venue).to_string(),
        })
        .collect()
}

/// `file://<abs>` of `[<doi>].pdf` in `pdf_dir`, trying the DOI as written
/// and in canonical form.
pub fn pdf_link(pdf_dir: Option<&Path>, doi: &str) -> String {
    let Some(dir) = pdf_dir else {
        return PDF_NOT_FOUND.to_string();
    };
    [doi.trim().to_string(), canonical_doi(doi)]
        .iter()
        .filter(|d| !d.is_empty())
        .map(|d| dir.join(pdf_filename_for_doi(d)))
        .find(|path| path.exists())
        .and_then(|path| path.canonicalize().ok())
        .map(|abs| format!("file://{}", abs.display()))
        .unwrap_or_else(|| PDF_NOT_FOUND.to_string())
}

pub async fn query_affiliations(
    plan: &AffiliationPlan,
    source: &dyn MetadataSource,
) -> Result<AffiliationOutcome> {
    require_exists(&plan.csv)?;
    if same_file(&plan.csv, &plan.output) {
        return Err(OrganizerError::OutputIsInput(plan.output.clone()).into());
    }

    let input = Table::load(&plan.csv, None)?;
    let papers = papers(&input, plan.author_filter.as_deref());
    info!("找到 {} 篇待查询的论文", papers.len());

    let mut stats = AffiliationStats {
        total: papers.len(),
        ..Default::default()
    };
    let mut institution_counts: HashMap<String, usize> = HashMap::new();
    let mut results = Table::new(MAIN_SHEET, HEADERS.iter().map(|h| h.to_string()).collect());

    for (i, paper) in papers.iter().enumerate() {
        if i > 0 && !plan.delay.is_zero() {
            tokio::time::sleep(plan.delay).await;
        }
        info!(
            "处理第 {}/{} 篇论文: {}",
            i + 1,
            papers.len(),
            preview(&paper.title, 50)
        );

        let mut title = paper.title.clone();
        let mut year = paper.year.clone();
        let mut date = paper.date.clone();
        let mut venue = paper.venue.clone();
        let mut citations = 0;
        let mut affiliations = NOT_FOUND.to_string();

        let status = match source.lookup_doi(&paper.doi).await {
            Ok(work) => {
                if title.trim().is_empty() {
                    title = work.title.clone().unwrap_or_default();
                }
                if let Some(y) = work.publication_year {
                    year = y.to_string();
                }
                if let Some(d) = work.publication_date.as_deref().filter(|d| !d.is_empty()) {
                    date = d.to_string();
                }
                if let Some(v) = work.venue() {
                    venue = v.to_string();
                }
                citations = work.cited_by_count;

                match work.affiliations_of(&plan.researcher) {
                    Some(labels) if !labels.is_empty() => {
                        for label in &labels {
                            let name = label.split(" (").next().unwrap_or(label);
                            *institution_counts.entry(name.to_string()).or_default() += 1;
                        }
                        affiliations = labels.join(" | ");
                        stats.successful += 1;
                        "success".to_string()
                    }
                    Some(_) => {
                        warn!("{} 在该论文中没有机构信息: {}", plan.researcher, paper.doi);
                        stats.failed += 1;
                        "no_institutions".to_string()
                    }
                    None => {
                        warn!("在论文中未找到 {}: {}", plan.researcher, paper.doi);
                        stats.failed += 1;
                        "author_not_found".to_string()
                    }
                }
            }
            Err(e) => {
                warn!("查询DOI {} 失败: {}", paper.doi, e);
                stats.failed += 1;
                if e.is_api_error() {
                    stats.api_errors += 1;
                }
                e.status_label()
            }
        };

        results.push_row(vec![
            paper.author.clone(),
            title,
            paper.doi.clone(),
            canonical_doi(&paper.doi),
            year,
            date,
            venue,
            citations.to_string(),
            affiliations,
            pdf_link(plan.pdf_dir.as_deref(), &paper.doi),
            status,
        ]);
    }

    if let Some(col) = results.column("PDF链接") {
        results.mark_link_column(col);
    }

    let mut summary = Table::new(STATS_SHEET, vec!["统计项目".to_string(), "数值".to_string()]);
    for (label, value) in [
        ("论文总数", stats.total.to_string()),
        ("成功查询", stats.successful.to_string()),
        ("查询失败", stats.failed.to_string()),
        ("API错误", stats.api_errors.to_string()),
        ("成功率", format!("{:.1}%", stats.success_rate())),
    ] {
        summary.push_row(vec![label.to_string(), value]);
    }

    let backup_path = if plan.output.exists() {
        Some(create_backup(&plan.output, &plan.backup_dir)?)
    } else {
        None
    };
    let output_path = save_tables(&plan.output, &[&results, &summary])?;

    let mut top: Vec<(String, usize)> = institution_counts.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top.truncate(TOP_INSTITUTIONS);

    info!("=== 总结报告 ===");
    info!("论文总数: {}", stats.total);
    info!("成功查询: {}", stats.successful);
    info!("成功率: {:.1}%", stats.success_rate());
    for (name, count) in &top {
        info!("  {}: {} 篇论文", name, count);
    }

    Ok(AffiliationOutcome {
        output_path,
        backup_path,
        stats,
        top_institutions: top,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openalex::{AuthorRef, Authorship, Institution, LookupError, WorkMetadata};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    struct FakeSource;

    fn institution(name: &str, country: &str) -> Institution {
        Institution {
            display_name: Some(name.to_string()),
            country_code: Some(country.to_string()),
        }
    }

    #[async_trait]
    impl MetadataSource for FakeSource {
        async fn lookup_doi(&self, doi: &str) -> Result<WorkMetadata, LookupError> {
            match canonical_doi(doi).as_str() {
                "10.1126/science.1127647" => Ok(WorkMetadata {
                    publication_year: Some(2006),
                    publication_date: Some("2006-07-28".to_string()),
                    cited_by_count: 42,
                    authorships: vec![Authorship {
                        author: AuthorRef {
                            display_name: Some("Geoffrey E. Hinton".to_string()),
                        },
                        institutions: vec![
                            institution("University of Toronto", "CA"),
                            institution("Google", "US"),
                        ],
                    }],
                    ..Default::default()
                }),
                "10.1038/nature14539" => Ok(WorkMetadata {
                    title: Some("Deep learning".to_string()),
                    authorships: vec![Authorship {
                        author: AuthorRef {
                            display_name: Some("Geoffrey Hinton".to_string()),
                        },
                        institutions: vec![institution("University of Toronto", "CA")],
                    }],
                    ..Default::default()
                }),
                "10.1/down" => Err(LookupError::Status(503)),
                _ => Err(LookupError::NotFound),
            }
        }
    }

    fn plan(tmp: &Path) -> Result<AffiliationPlan> {
        let csv = tmp.join("papers.csv");
        fs::write(
            &csv,
            "Author,Title,DOI,Publication Year,Publication Title\n\
             \"Hinton, Geoffrey E.; Salakhutdinov, R.\",Reducing,10.1126/science.1127647,2005,Sci\n\
             \"LeCun, Yann; Bengio, Yoshua; Hinton, Geoffrey\",,10.1038_nature14539,2015,Nature\n\
             \"Hinton, Geoffrey\",Outage,10.1/down,2020,\n\
             \"Hinton, Geoffrey\",Unknown,10.1/missing,2021,\n\
             \"Smith, John\",Other,10.1/other,2019,\n",
        )?;
        let pdfs = tmp.join("pdfs");
        fs::create_dir_all(&pdfs)?;
        fs::write(pdfs.join("[10.1126_science.1127647].pdf"), "pdf")?;

        Ok(AffiliationPlan {
            csv,
            output: tmp.join("out").join("affiliations.xlsx"),
            backup_dir: tmp.join("backup"),
            pdf_dir: Some(pdfs),
            author_filter: Some("Hinton, Geoffrey".to_string()),
            researcher: "Geoffrey Hinton".to_string(),
            delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_query_affiliations() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let plan = plan(tmp_dir.path())?;

        let outcome = query_affiliations(&plan, &FakeSource).await?;
        assert_eq!(outcome.stats.total, 4);
        assert_eq!(outcome.stats.successful, 2);
        assert_eq!(outcome.stats.failed, 2);
        assert_eq!(outcome.stats.api_errors, 1);
        assert!(outcome.backup_path.is_none());
        assert_eq!(
            outcome.top_institutions[0],
            ("University of Toronto".to_string(), 2)
        );

        let main = Table::load(&outcome.output_path, Some(MAIN_SHEET))?;
        let col = |name: &str| main.column(name);
        assert_eq!(
            main.cell(0, col("机构")),
            "University of Toronto (CA) | Google (US)"
        );
        assert_eq!(main.cell(0, col("发表年份")), "2006");
        assert_eq!(main.cell(0, col("发表日期")), "2006-07-28");
        assert_eq!(main.cell(1, col("标题")), "Deep learning");
        assert_eq!(main.cell(0, col("期刊/会议")), "Sci");
        assert_eq!(main.cell(0, col("PDF链接")), "[10.1126_science.1127647].pdf");
        assert_eq!(main.cell(1, col("标准化DOI")), "10.1038/nature14539");
        assert_eq!(main.cell(1, col("PDF链接")), PDF_NOT_FOUND);
        assert_eq!(main.cell(2, col("机构")), NOT_FOUND);
        assert_eq!(main.cell(2, col("查询状态")), "http_503");
        assert_eq!(main.cell(3, col("查询状态")), "not_found");

        let stats = Table::load(&outcome.output_path, Some(STATS_SHEET))?;
        assert_eq!(stats.cell(4, Some(1)), "50.0%");
        Ok(())
    }

    #[tokio::test]
    async fn test_rerun_backs_up_existing_output() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let plan = plan(tmp_dir.path())?;

        query_affiliations(&plan, &FakeSource).await?;
        let second = query_affiliations(&plan, &FakeSource).await?;
        assert!(second.backup_path.is_some_and(|p| p.exists()));
        Ok(())
    }

    #[test]
    fn test_pdf_link() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        fs::write(tmp_dir.path().join("[10.1_a].pdf"), "pdf")?;

        let link = pdf_link(Some(tmp_dir.path()), "10.1/A");
        assert!(link.starts_with("file:///"));
        assert!(link.ends_with("[10.1_a].pdf"));
        assert_eq!(pdf_link(None, "10.1/a"), PDF_NOT_FOUND);
        assert_eq!(pdf_link(Some(tmp_dir.path()), "10.1/b"), PDF_NOT_FOUND);
        Ok(())
    }
}

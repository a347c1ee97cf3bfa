//! Copies attachment PDFs to `[<encoded-doi>].pdf` names.

use crate::error::{require_exists, OrganizerError};
use crate::normalizer::{encode_doi_for_filename, pdf_filename_for_doi};
use crate::report::{percent, Report};
use crate::scanner::{compute_md5, Scanner, UNLIMITED_DEPTH};
use crate::table::Table;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MAPPING_REPORT: &str = "DOI转换对照表.txt";
pub const DETAIL_REPORT: &str = "详细处理报告.txt";
pub const MISSING_REPORT: &str = "缺失DOI清单.txt";

#[derive(Debug, Clone)]
pub struct RenamePlan {
    pub csv: PathBuf,
    pub pdf_dir: PathBuf,
    pub output_dir: PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameStatus {
    Copied,
    Planned,
    /// Destination already holds identical content.
    AlreadyPresent,
    /// Destination exists with different content; left untouched.
    Conflict,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RenamedPdf {
    pub original_name: String,
    pub original_path: PathBuf,
    pub doi: String,
    pub encoded_doi: String,
    pub new_name: String,
    pub new_path: PathBuf,
    pub status: RenameStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingPdf {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenameOutcome {
    pub output_dir: PathBuf,
    pub dry_run: bool,
    pub renamed: Vec<RenamedPdf>,
    pub missing: Vec<MissingPdf>,
    pub reports: Vec<PathBuf>,
}

impl RenameOutcome {
    pub fn count(&self, status: &RenameStatus) -> usize {
        self.renamed.iter().filter(|r| &r.status == status).count()
    }
}

/// Attachment filename to DOI, in CSV order.
#[derive(Debug, Default)]
pub struct AttachmentMap {
    by_name: HashMap<String, String>,
    /// Distinct raw DOIs with their encoded form, first-seen order.
    pub transformations: Vec<(String, String)>,
}

impl AttachmentMap {
    pub fn from_table(table: &Table) -> Result<Self> {
        let doi_col = table.find_column(&["DOI"]).ok_or_else(|| OrganizerError::MissingColumn {
            table: table.name.clone(),
            column: "DOI".to_string(),
        })?;
        let attachments_col = table.find_column(&["File Attachments"]).ok_or_else(|| {
            OrganizerError::MissingColumn {
                table: table.name.clone(),
                column: "File Attachments".to_string(),
            }
        })?;

        let mut map = AttachmentMap::default();
        for row in 0..table.len() {
            let doi = table.cell(row, Some(doi_col)).trim();
            let attachments = table.cell(row, Some(attachments_col)).trim();
            if doi.is_empty() || attachments.is_empty() {
                continue;
            }

            for attachment in attachments.split(';').map(str::trim) {
                let Some(name) = attachment_name(attachment) else {
                    continue;
                };
                if let Some(previous) = map.by_name.insert(name.clone(), doi.to_string()) {
                    if previous != doi {
                        warn!("Attachment {} is listed for both {} and {}", name, previous, doi);
                    }
                }
                debug!("映射添加: {} -> {}", name, doi);
            }

            if !map.transformations.iter().any(|(raw, _)| raw == doi) {
                map.transformations
                    .push((doi.to_string(), encode_doi_for_filename(doi)));
            }
        }

        info!("CSV解析完成，共找到 {} 个文件-DOI映射", map.by_name.len());
        Ok(map)
    }

    pub fn doi_for(&self, file_name: &str) -> Option<&str> {
        self.by_name.get(file_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Basename of a `.pdf` attachment path (either separator style).
fn attachment_name(attachment: &str) -> Option<String> {
    let name = attachment.rsplit(['/', '\\']).next()?.trim();
    let is_pdf = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    (is_pdf && !name.is_empty()).then(|| name.to_string())
}

pub fn rename_pdfs(plan: &RenamePlan) -> Result<RenameOutcome> {
    require_exists(&plan.csv)?;
    require_exists(&plan.pdf_dir)?;

    let table = Table::load(&plan.csv, None)?;
    let map = AttachmentMap::from_table(&table)?;
    if map.is_empty() {
        warn!("CSV中没有可用的PDF附件映射: {}", plan.csv.display());
    } else {
        info!("建立了 {} 个附件文件名到DOI的映射", map.len());
    }
    for (raw, encoded) in map.transformations.iter().take(5) {
        debug!("DOI转换: {} -> [{}].pdf", raw, encoded);
    }

    let pdfs = Scanner::new(&plan.pdf_dir, UNLIMITED_DEPTH)?.scan()?;
    info!("找到 {} 个PDF文件", pdfs.len());

    if !plan.dry_run {
        fs::create_dir_all(&plan.output_dir)
            .with_context(|| format!("无法创建输出目录: {}", plan.output_dir.display()))?;
    }

    let mut renamed = Vec::new();
    let mut missing = Vec::new();
    for pdf in pdfs {
        let Some(doi) = map.doi_for(&pdf.name) else {
            warn!("⚠️  未找到DOI: {}", pdf.name);
            missing.push(MissingPdf { name: pdf.name, path: pdf.path });
            continue;
        };

        let new_name = pdf_filename_for_doi(doi);
        let new_path = plan.output_dir.join(&new_name);
        let status = if plan.dry_run {
            RenameStatus::Planned
        } else {
            copy_verified(&pdf.path, &new_path)
        };

        match &status {
            RenameStatus::Copied | RenameStatus::Planned => {
                info!("✅ {}: {} -> {}", doi, pdf.name, new_name)
            }
            RenameStatus::AlreadyPresent => info!("{} already exists with identical content", new_name),
            RenameStatus::Conflict => warn!(
                "{} already exists with different content, skipping {}",
                new_name, pdf.name
            ),
            RenameStatus::Failed(reason) => error!("❌ 复制文件失败 {}: {}", pdf.name, reason),
        }

        renamed.push(RenamedPdf {
            original_name: pdf.name,
            original_path: pdf.path,
            doi: doi.to_string(),
            encoded_doi: encode_doi_for_filename(doi),
            new_name,
            new_path,
            status,
        });
    }

    let mut outcome = RenameOutcome {
        output_dir: plan.output_dir.clone(),
        dry_run: plan.dry_run,
        renamed,
        missing,
        reports: Vec::new(),
    };

    if !plan.dry_run {
        outcome.reports = write_reports(&outcome, &map)?;
    }
    Ok(outcome)
}

/// Copies `from` to `to` unless `to` exists, then checks both MD5 digests.
fn copy_verified(from: &Path, to: &Path) -> RenameStatus {
    let source_md5 = match compute_md5(from) {
        Ok(digest) => digest,
        Err(e) => return RenameStatus::Failed(e.to_string()),
    };

    if to.exists() {
        return match compute_md5(to) {
            Ok(existing) if existing == source_md5 => RenameStatus::AlreadyPresent,
            Ok(_) => RenameStatus::Conflict,
            Err(e) => RenameStatus::Failed(e.to_string()),
        };
    }

    if let Err(e) = fs::copy(from, to) {
        return RenameStatus::Failed(e.to_string());
    }

    match compute_md5(to) {
        Ok(copied) if copied == source_md5 => RenameStatus::Copied,
        Ok(copied) => {
            let _ = fs::remove_file(to);
            RenameStatus::Failed(format!("checksum mismatch ({} != {})", copied, source_md5))
        }
        Err(e) => RenameStatus::Failed(e.to_string()),
    }
}

fn write_reports(outcome: &RenameOutcome, map: &AttachmentMap) -> Result<Vec<PathBuf>> {
    let dir = &outcome.output_dir;

    let mut mapping = Report::plain("DOI转换对照表报告");
    mapping
        .line("转换说明: 将DOI中的'/'替换为'_'以符合文件系统要求")
        .blank()
        .section("详细转换对照:");
    for (i, (raw, encoded)) in map.transformations.iter().enumerate() {
        let mut details = vec![
            format!("转换DOI: {}", encoded),
            format!("文件名:  [{}].pdf", encoded),
        ];
        let slashes = raw.matches('/').count();
        if slashes > 0 {
            details.push(format!("转换点: '/' -> '_' ({}处)", slashes));
        }
        mapping.entry(i + 1, &format!("原始DOI: {}", raw), &details);
    }

    let handled = outcome.renamed.len();
    let mut detail = Report::plain("PDF文件重命名详细处理报告");
    detail
        .field("成功处理文件数", outcome.count(&RenameStatus::Copied))
        .field("已存在文件数", outcome.count(&RenameStatus::AlreadyPresent))
        .field("冲突文件数", outcome.count(&RenameStatus::Conflict))
        .field("缺失DOI文件数", outcome.missing.len())
        .field(
            "处理成功率",
            format!("{:.1}%", percent(handled, handled + outcome.missing.len())),
        )
        .blank()
        .section("处理的文件详情:");
    for (i, file) in outcome.renamed.iter().enumerate() {
        detail.entry(
            i + 1,
            &format!("原文件名: {}", file.original_name),
            &[
                format!("新文件名: {}", file.new_name),
                format!("原始DOI: {}", file.doi),
                format!("转换DOI: {}", file.encoded_doi),
                format!("原路径: {}", file.original_path.display()),
                format!("新路径: {}", file.new_path.display()),
                format!("状态: {:?}", file.status),
            ],
        );
    }

    let mut missing = Report::plain("缺失DOI的PDF文件清单");
    missing.field("总数", outcome.missing.len()).blank();
    if outcome.missing.is_empty() {
        missing.line("🎉 所有PDF文件都成功匹配到了对应的DOI！");
    }
    for (i, file) in outcome.missing.iter().enumerate() {
        missing.entry(
            i + 1,
            &format!("文件名: {}", file.name),
            &[format!("路径: {}", file.path.display())],
        );
    }

    Ok(vec![
        mapping.write(&dir.join(MAPPING_REPORT))?,
        detail.write(&dir.join(DETAIL_REPORT))?,
        missing.write(&dir.join(MISSING_REPORT))?,
    ])
}

mod affiliations;
mod backup;
mod batch;
mod cli;
mod consistency;
mod doi_format;
mod error;
mod hyperlinks;
mod json_output;
mod logging;
mod matcher;
mod normalizer;
mod openalex;
mod organizer;
mod reconcile;
mod renamer;
mod report;
mod scanner;
mod sources;
mod table;
mod tweets;

use anyhow::Result;
use clap::Parser;
use cli::{Args, Command, MergeArgs};
use colored::*;
use error::require_exists;
use json_output::CommandOutput;
use log::{error, info};
use reconcile::{MergeOutcome, MergePlan};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use table::Table;

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose, &args.log_file, args.json)?;
    info!("Starting paper-organizer {} with args: {:?}", args.command.name(), args);

    let result = run(&args);
    if let Err(e) = &result {
        error!("{} failed: {:#}", args.command.name(), e);
    }
    result
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Command::AddTopics { merge, source, column } => {
            require_exists(source)?;
            let records = sources::topic_records(&Table::load(source, None)?);
            let plan = merge_plan(merge, &args.backup_dir, vec![column.clone()]);
            let outcome = reconcile::run_merge(&plan, &records)?;
            emit(args, &outcome, print_merge)
        }
        Command::MergeKeywords { merge, wos } => {
            require_exists(wos)?;
            let records = sources::wos_records(&Table::load(wos, None)?);
            let plan = merge_plan(
                merge,
                &args.backup_dir,
                vec![
                    sources::WOS_AUTHOR_KEYWORDS_COLUMN.to_string(),
                    sources::WOS_KEYWORDS_PLUS_COLUMN.to_string(),
                ],
            );
            let outcome = reconcile::run_merge(&plan, &records)?;
            emit(args, &outcome, print_merge)
        }
        Command::RenamePdfs {
            csv,
            pdf_dir,
            output_dir,
            dry_run,
        } => {
            let plan = renamer::RenamePlan {
                csv: csv.clone(),
                pdf_dir: pdf_dir.clone(),
                output_dir: output_dir.clone(),
                dry_run: *dry_run,
            };
            let outcome = renamer::rename_pdfs(&plan)?;
            emit(args, &outcome, print_rename)
        }
        Command::OrganizeByYear {
            csv,
            input_dir,
            output_dir,
        } => {
            let outcome = organizer::organize_by_year(csv, input_dir, output_dir)?;
            emit(args, &outcome, print_organize)
        }
        Command::CheckDois {
            csv,
            pdf_dir,
            report_dir,
        } => {
            let report_dir = report_dir.clone().unwrap_or_else(|| parent_dir(csv));
            let outcome = consistency::check_consistency(csv, pdf_dir, &report_dir)?;
            emit(args, &outcome, print_consistency)
        }
        Command::ConvertDois {
            input,
            output,
            to,
            column,
        } => {
            let outcome = doi_format::convert_doi_column(
                input,
                output,
                column.as_deref(),
                *to,
                &args.backup_dir,
            )?;
            emit(args, &outcome, print_convert)
        }
        Command::BatchSearches {
            csv,
            output_dir,
            batch_size,
        } => {
            require_exists(csv)?;
            let (dois, titles) = batch::collect_ids(&Table::load(csv, None)?);
            let outcome = batch::write_batch_searches(&dois, &titles, *batch_size, output_dir)?;
            emit(args, &outcome, print_batches)
        }
        Command::TweetsToMd {
            csv,
            output_dir,
            front_matter,
            source,
        } => {
            let plan = tweets::TweetPlan {
                csv: csv.clone(),
                output_dir: output_dir.clone(),
                front_matter: *front_matter,
                source: source.clone(),
            };
            let outcome = tweets::convert_tweets(&plan)?;
            emit(args, &outcome, print_tweets)
        }
        Command::Affiliations {
            csv,
            output,
            researcher,
            author_filter,
            pdf_dir,
            base_url,
            delay_ms,
            timeout_secs,
        } => {
            let plan = affiliations::AffiliationPlan {
                csv: csv.clone(),
                output: output.clone(),
                backup_dir: args.backup_dir.clone(),
                pdf_dir: pdf_dir.clone(),
                author_filter: author_filter.clone(),
                researcher: researcher.clone(),
                delay: Duration::from_millis(*delay_ms),
            };
            let client = openalex::OpenAlexClient::new(
                base_url,
                Duration::from_secs(*timeout_secs),
                openalex::ATTEMPT_DELAY,
            )?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let outcome = runtime.block_on(affiliations::query_affiliations(&plan, &client))?;
            emit(args, &outcome, print_affiliations)
        }
        Command::LinkColumn {
            input,
            column,
            output,
            sheet,
        } => {
            let outcome =
                hyperlinks::link_column(input, sheet.as_deref(), column, output, &args.backup_dir)?;
            emit(args, &outcome, print_links)
        }
    }
}

fn merge_plan(merge: &MergeArgs, backup_dir: &Path, payload_columns: Vec<String>) -> MergePlan {
    let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
    MergePlan {
        target: merge.target.clone(),
        target_sheet: merge.sheet.clone(),
        output: merge.output.clone(),
        backup_dir: backup_dir.to_path_buf(),
        doi_columns: owned(sources::TARGET_DOI_COLUMNS),
        title_columns: owned(sources::TARGET_TITLE_COLUMNS),
        payload_columns,
        threshold: merge.threshold,
        match_report: !merge.no_match_report,
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Prints the outcome as JSON with `--json`, otherwise as a colored summary.
fn emit<T: Serialize>(args: &Args, outcome: &T, human: fn(&T)) -> Result<()> {
    if args.json {
        println!("{}", CommandOutput::new(args.command.name(), outcome).to_json()?);
    } else {
        human(outcome);
        println!(
            "\n{} {}",
            "✓".green().bold(),
            "Operation completed successfully!".bright_green().bold()
        );
    }
    Ok(())
}

fn done(title: &str) {
    println!("\n{}", format!("═══ {} ═══", title).bold().bright_blue());
}

fn path_line(label: &str, path: &Path) {
    println!("  {} {}", label.bright_white(), path.display().to_string().cyan());
}

fn print_merge(outcome: &MergeOutcome) {
    let stats = &outcome.stats;
    done("合并匹配结果");
    for (label, count) in [
        ("🔗 DOI_EXACT  ", stats.doi_exact),
        ("🔤 TITLE_FUZZY", stats.title_fuzzy),
        ("❓ NO_MATCH   ", stats.no_match),
    ] {
        println!(
            "  {} {} ({:.1}%)",
            label,
            count.to_string().cyan(),
            stats.percentage(count)
        );
    }
    if !outcome.unmatched.is_empty() {
        println!("\n{}", "未匹配记录:".yellow().bold());
        for record in &outcome.unmatched {
            println!(
                "  {} 第 {} 行: {}",
                "- [ ]".bright_yellow(),
                record.row,
                report::preview(&record.title, 60)
            );
        }
    }
    println!();
    path_line("输出文件:", &outcome.output_path);
    path_line("备份文件:", &outcome.backup_path);
    path_line("合并报告:", &outcome.report_path);
    if let Some(path) = &outcome.match_report_path {
        path_line("匹配详情:", path);
    }
}

fn print_rename(outcome: &renamer::RenameOutcome) {
    use renamer::RenameStatus;
    done(if outcome.dry_run { "DRY RUN MODE" } else { "PDF重命名结果" });
    for file in &outcome.renamed {
        let marker = match file.status {
            RenameStatus::Copied | RenameStatus::Planned => "✓".green(),
            RenameStatus::AlreadyPresent => "=".bright_blue(),
            RenameStatus::Conflict => "⚠️".yellow(),
            RenameStatus::Failed(_) => "✗".red(),
        };
        println!(
            "  {} {} → {}",
            marker,
            file.original_name.bright_white(),
            file.new_name.green()
        );
    }
    for file in &outcome.missing {
        println!("  {} {} ({})", "⚠️".yellow(), file.name.yellow(), "未找到DOI".yellow());
    }
    let handled = outcome.renamed.len();
    println!(
        "\n  成功率: {}",
        format!("{:.1}%", report::percent(handled, handled + outcome.missing.len())).cyan()
    );
    for path in &outcome.reports {
        path_line("报告:", path);
    }
}

fn print_organize(outcome: &organizer::OrganizeOutcome) {
    done("按年份整理结果");
    for (year, count) in &outcome.per_year {
        println!("  📁 {}: {} 篇", year.bright_white(), count.to_string().cyan());
    }
    if !outcome.skipped.is_empty() {
        println!("  {} 跳过 {} 个非DOI文件", "ℹ️".bright_blue(), outcome.skipped.len());
    }
    for name in &outcome.failed {
        println!("  {} {}", "✗".red(), name.red());
    }
    path_line("报告:", &outcome.report_path);
}

fn print_consistency(outcome: &consistency::ConsistencyOutcome) {
    done("DOI一致性验证结果");
    println!("  📁 CSV文件DOI数量: {}", outcome.csv_count.to_string().cyan());
    println!("  📁 PDF文件DOI数量: {}", outcome.pdf_count.to_string().cyan());
    println!("  ✅ 完全匹配DOI: {}", outcome.common.len().to_string().green());
    println!("  ❌ 仅CSV存在: {}", outcome.csv_only.len().to_string().red());
    println!("  ❌ 仅PDF存在: {}", outcome.pdf_only.len().to_string().red());
    println!("  📈 一致性比例: {:.1}%", outcome.consistency_rate);
    for item in &outcome.csv_only {
        println!("    - {} ({})", item.key.yellow(), item.label);
    }
    for item in &outcome.pdf_only {
        println!("    - {} ({})", item.key.yellow(), item.label);
    }
    if outcome.is_perfect() {
        println!("\n  {}", "🎉 完美匹配！所有DOI都完全一致！".bright_green());
    }
    path_line("报告:", &outcome.report_path);
}

fn print_convert(outcome: &doi_format::ConvertOutcome) {
    done("DOI格式转换结果");
    println!(
        "  列 {} → {} 格式: {}/{} 行已转换",
        outcome.column.bright_white(),
        outcome.style.to_string().cyan(),
        outcome.changed.len().to_string().green(),
        outcome.rows
    );
    for change in outcome.changed.iter().take(5) {
        println!("    {} → {}", change.original, change.converted.green());
    }
    if outcome.changed.len() > 5 {
        println!("    ... 另有 {} 处变更", outcome.changed.len() - 5);
    }
    path_line("输出文件:", &outcome.output_path);
    path_line("备份文件:", &outcome.backup_path);
    path_line("报告:", &outcome.report_path);
}

fn print_batches(outcome: &batch::BatchOutcome) {
    done("DOI分批检索");
    println!(
        "  总共 {} 个DOI，分成 {} 批",
        outcome.total.to_string().cyan(),
        outcome.batches.len().to_string().cyan()
    );
    for file in &outcome.batches {
        println!(
            "  批次 {}: {} 个DOI -> {}",
            file.index,
            file.count,
            file.path.display().to_string().green()
        );
    }
    path_line("总览文件:", &outcome.summary_path);
}

fn print_tweets(outcome: &tweets::TweetOutcome) {
    done("推文转换结果");
    println!(
        "  成功处理: {}/{} 条记录",
        outcome.written.len().to_string().green(),
        outcome.total
    );
    if outcome.skipped > 0 {
        println!("  {} 跳过 {} 条空记录", "⚠️".yellow(), outcome.skipped);
    }
    if outcome.unknown_timestamps > 0 {
        println!("  {} {} 条记录时间戳无法解析", "⚠️".yellow(), outcome.unknown_timestamps);
    }
    path_line("索引文件:", &outcome.index_path);
}

fn print_affiliations(outcome: &affiliations::AffiliationOutcome) {
    let stats = &outcome.stats;
    done("机构信息查询结果");
    println!("  论文总数: {}", stats.total.to_string().cyan());
    println!("  成功查询: {}", stats.successful.to_string().green());
    println!("  查询失败: {}", stats.failed.to_string().red());
    println!("  成功率: {:.1}%", stats.success_rate());
    if !outcome.top_institutions.is_empty() {
        println!("\n{}", "主要机构:".bright_white());
        for (name, count) in &outcome.top_institutions {
            println!("  {}: {} 篇论文", name, count.to_string().cyan());
        }
    }
    println!();
    path_line("输出文件:", &outcome.output_path);
    if let Some(path) = &outcome.backup_path {
        path_line("备份文件:", path);
    }
}

fn print_links(outcome: &hyperlinks::LinkOutcome) {
    let stats = &outcome.stats;
    done("超链接转换结果");
    println!("  列: {}", outcome.column.bright_white());
    println!("  超链接: {}", stats.linked.to_string().green());
    println!("  空单元格: {}", stats.empty);
    println!("  非路径值: {}", stats.not_a_link);
    if stats.missing_files > 0 {
        println!("  {} 文件不存在: {}", "⚠️".yellow(), stats.missing_files);
    }
    path_line("输出文件:", &outcome.output_path);
    path_line("备份文件:", &outcome.backup_path);
}

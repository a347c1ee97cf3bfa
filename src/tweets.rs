//! Timestamped text records (tweets) to one markdown file each, plus an
//! index workbook linking every record to its file.

use crate::error::require_exists;
use crate::report::preview;
use crate::table::{save_tables, Table};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

pub const INDEX_NAME: &str = "tweets_with_md.xlsx";
pub const MD_FILE_COLUMN: &str = "md_file";
const UNKNOWN_TIMESTAMP: &str = "unknown-timestamp";
const EXCERPT_CHARS: usize = 50;
const LAYOUT: &str = "default";

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone)]
pub struct TweetPlan {
    pub csv: PathBuf,
    pub output_dir: PathBuf,
    pub front_matter: bool,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TweetOutcome {
    pub total: usize,
    pub written: Vec<PathBuf>,
    pub skipped: usize,
    pub unknown_timestamps: usize,
    pub index_path: PathBuf,
}

/// Twitter's `created_at` format, RFC 3339, or a plain `YYYY-mm-dd HH:MM:SS`.
/// Zoned timestamps keep their own wall-clock time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Decodes the HTML entities the export escapes and collapses blank-line runs.
pub fn clean_text(raw: &str) -> String {
    let decoded = raw
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    BLANK_LINES.replace_all(&decoded, "\n\n").trim().to_string()
}

/// `<base>.md`, or `<base>-1.md`, `<base>-2.md`, ... when already taken.
pub fn unique_filename(base: &str, used: &mut HashSet<String>) -> String {
    let mut name = format!("{}.md", base);
    let mut counter = 1;
    while used.contains(&name) {
        name = format!("{}-{}.md", base, counter);
        counter += 1;
    }
    used.insert(name.clone());
    name
}

/// Every digit written as its Chinese numeral.
pub fn chinese_digits(value: u32) -> String {
    const DIGITS: [&str; 10] = ["零", "一", "二", "三", "四", "五", "六", "七", "八", "九"];
    value
        .to_string()
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| DIGITS[d as usize])
        .collect()
}

pub fn chinese_date(dt: &NaiveDateTime) -> String {
    use chrono::{Datelike, Timelike};
    format!(
        "{}年{}月{}日 {}点{}分",
        chinese_digits(dt.year().unsigned_abs()),
        chinese_digits(dt.month()),
        chinese_digits(dt.day()),
        chinese_digits(dt.hour()),
        chinese_digits(dt.minute())
    )
}

pub fn category(text: &str) -> &'static str {
    const RULES: &[(&str, &[&str])] = &[
        (
            "AI技术",
            &["ai", "artificial intelligence", "machine learning", "deep learning", "neural", "gpt", "openai"],
        ),
        ("学术研究", &["paper", "research", "study", "university", "conference", "publication"]),
        ("观点评论", &["think", "believe", "opinion", "view", "should", "must"]),
        ("新闻动态", &["news", "announcement", "launch", "report", "breaking"]),
    ];

    let lowered = text.to_lowercase();
    let words: HashSet<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let mentions = |keyword: &str| {
        if keyword.contains(' ') {
            lowered.contains(keyword)
        } else {
            words.contains(keyword) || (keyword.len() > 4 && lowered.contains(keyword))
        }
    };

    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| mentions(k)))
        .map_or("其他推文", |(name, _)| *name)
}

/// Export columns read for each record; any of them may be absent.
struct TweetColumns {
    created: Option<usize>,
    text: Option<usize>,
    favorites: Option<usize>,
    retweets: Option<usize>,
    replies: Option<usize>,
    bookmarks: Option<usize>,
    views: Option<usize>,
    url: Option<usize>,
    id: Option<usize>,
    lang: Option<usize>,
    source: Option<usize>,
}

impl TweetColumns {
    fn find(table: &Table) -> Self {
        Self {
            created: table.find_column_or_warn(&["created_at"]),
            text: table.find_column_or_warn(&["full_text", "text"]),
            favorites: table.find_column(&["favorite_count"]),
            retweets: table.find_column(&["retweet_count"]),
            replies: table.find_column(&["reply_count"]),
            bookmarks: table.find_column(&["bookmark_count"]),
            views: table.find_column(&["view_count"]),
            url: table.find_column(&["url"]),
            id: table.find_column(&["id"]),
            lang: table.find_column(&["lang"]),
            source: table.find_column(&["source"]),
        }
    }
}

fn count_cell(table: &Table, row: usize, col: Option<usize>) -> &str {
    match table.cell(row, col).trim() {
        "" => "0",
        value => value,
    }
}

/// Markdown body of one record: text, counters, link and publishing details.
fn tweet_body(table: &Table, row: usize, cols: &TweetColumns, text: &str) -> String {
    let cell = move |col: Option<usize>| table.cell(row, col).trim();
    format!(
        "## 推文内容\n\n{}\n\n\
         ## 推文统计\n\n\
         - 点赞数: {}\n- 转发数: {}\n- 回复数: {}\n- 收藏数: {}\n- 浏览量: {}\n\n\
         ## 推文链接\n\n[查看原推文]({})\n\n\
         ## 发布信息\n\n\
         - 发布时间: {}\n- 推文ID: {}\n- 语言: {}\n- 来源: {}\n",
        text,
        count_cell(table, row, cols.favorites),
        count_cell(table, row, cols.retweets),
        count_cell(table, row, cols.replies),
        count_cell(table, row, cols.bookmarks),
        count_cell(table, row, cols.views),
        cell(cols.url),
        cell(cols.created),
        cell(cols.id),
        cell(cols.lang),
        cell(cols.source),
    )
}

fn front_matter(text: &str, created: Option<&NaiveDateTime>, source: &str) -> String {
    let flattened = WHITESPACE.replace_all(text, " ");
    let excerpt = preview(flattened.trim(), EXCERPT_CHARS).replace('"', "\\\"");
    let (title, uin) = match created {
        Some(dt) => (chinese_date(dt), dt.format("%Y%m%d%H%M%S").to_string()),
        None => ("时间解析失败".to_string(), "19700101000000".to_string()),
    };
    format!(
        "---\ntitle: {}\nexcerpt: \"{}\"\nlayout: {}\ncategory: {}\nsource: {}\nuin: {}\n---\n\n",
        title,
        excerpt,
        LAYOUT,
        category(text),
        source,
        uin
    )
}

pub fn convert_tweets(plan: &TweetPlan) -> Result<TweetOutcome> {
    require_exists(&plan.csv)?;
    let mut table = Table::load(&plan.csv, None)?;
    let columns = TweetColumns::find(&table);

    fs::create_dir_all(&plan.output_dir)
        .with_context(|| format!("无法创建输出目录: {}", plan.output_dir.display()))?;
    let output_dir = plan
        .output_dir
        .canonicalize()
        .unwrap_or_else(|_| plan.output_dir.clone());

    let md_col = table.reset_column(MD_FILE_COLUMN);
    table.mark_link_column(md_col);

    let total = table.len();
    info!("共找到 {} 条记录，开始处理...", total);

    let mut used = HashSet::new();
    let mut written = Vec::new();
    let mut skipped = 0;
    let mut unknown_timestamps = 0;

    for row in 0..total {
        let text = clean_text(table.cell(row, columns.text));
        if text.is_empty() {
            warn!("第 {} 条记录没有文本内容，已跳过", row + 1);
            skipped += 1;
            continue;
        }

        let raw_created = table.cell(row, columns.created).to_string();
        let created = parse_timestamp(&raw_created);
        let base = match &created {
            Some(dt) => dt.format("%Y-%m-%d-%H-%M-%S").to_string(),
            None => {
                warn!("时间戳解析错误: '{}' (第 {} 条记录)", raw_created, row + 1);
                unknown_timestamps += 1;
                UNKNOWN_TIMESTAMP.to_string()
            }
        };

        let name = unique_filename(&base, &mut used);
        let path = output_dir.join(&name);
        let mut content = String::new();
        if plan.front_matter {
            content.push_str(&front_matter(&text, created.as_ref(), &plan.source));
            content.push_str(&tweet_body(&table, row, &columns, &text));
        } else {
            content.push_str(&text);
            content.push('\n');
        }

        fs::write(&path, content).with_context(|| format!("无法写入文件: {}", path.display()))?;
        table.set(row, md_col, path.to_string_lossy().to_string());
        written.push(path);

        if written.len() % 10 == 0 {
            info!("已处理: {}/{} 条记录", written.len(), total);
        }
    }

    table.name = "Tweets".to_string();
    let index_path = save_tables(&output_dir.join(INDEX_NAME), &[&table])?;
    info!(
        "处理完成: {}/{} 条记录, 索引文件: {}",
        written.len(),
        total,
        index_path.display()
    );

    Ok(TweetOutcome {
        total,
        written,
        skipped,
        unknown_timestamps,
        index_path,
    })
}

//! Builders turning exported tables into [`SourceRecord`]s for the merge.

use crate::reconcile::SourceRecord;
use crate::table::Table;
use log::{info, warn};
use std::collections::HashSet;

pub const DEFAULT_TOPIC_COLUMN: &str = "论文主题";
pub const WOS_AUTHOR_KEYWORDS_COLUMN: &str = "author_keywords_wos";
pub const WOS_KEYWORDS_PLUS_COLUMN: &str = "keywords_plus_wos";

/// Target key column candidates, in priority order.
pub const TARGET_DOI_COLUMNS: &[&str] = &["DOI", "标准化DOI"];
pub const TARGET_TITLE_COLUMNS: &[&str] = &["标题", "Title"];

/// Splits a `;`-separated tag list, trimmed and de-duplicated in first-seen order.
pub fn split_tags(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(';')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_string()))
        .map(str::to_string)
        .collect()
}

/// Manual tags, falling back to automatic tags when there are none.
pub fn extract_topics(manual: &str, automatic: &str) -> String {
    let mut topics = split_tags(manual);
    if topics.is_empty() {
        topics = split_tags(automatic);
    }
    topics.join("; ")
}

/// One record per row of a reference-manager export, payload = topics.
pub fn topic_records(table: &Table) -> Vec<SourceRecord> {
    let doi_col = table.find_column_or_warn(&["DOI"]);
    let title_col = table.find_column_or_warn(&["Title"]);
    let manual_col = table.find_column(&["Manual Tags"]);
    let automatic_col = table.find_column(&["Automatic Tags"]);
    if manual_col.is_none() && automatic_col.is_none() {
        warn!("'{}' has neither 'Manual Tags' nor 'Automatic Tags'", table.name);
    }

    let records: Vec<SourceRecord> = (0..table.len())
        .map(|row| SourceRecord {
            doi: table.cell(row, doi_col).to_string(),
            title: table.cell(row, title_col).to_string(),
            payload: vec![extract_topics(
                table.cell(row, manual_col),
                table.cell(row, automatic_col),
            )],
        })
        .collect();

    let tagged = records.iter().filter(|r| !r.payload[0].is_empty()).count();
    info!("{} of {} source records carry topics", tagged, records.len());
    records
}

/// One record per row of a Web of Science export, payload = author keywords
/// and Keywords Plus.
pub fn wos_records(table: &Table) -> Vec<SourceRecord> {
    let doi_col = table.find_column_or_warn(&["DOI"]);
    let title_col = table.find_column_or_warn(&["Article Title", "Title"]);
    let author_keywords_col = table.find_column_or_warn(&["Author Keywords"]);
    let keywords_plus_col = table.find_column_or_warn(&["Keywords Plus"]);

    info!(
        "WOS columns: DOI={:?} title={:?} Author Keywords={:?} Keywords Plus={:?}",
        doi_col, title_col, author_keywords_col, keywords_plus_col
    );

    (0..table.len())
        .map(|row| SourceRecord {
            doi: table.cell(row, doi_col).trim().to_string(),
            title: table.cell(row, title_col).trim().to_string(),
            payload: vec![
                table.cell(row, author_keywords_col).trim().to_string(),
                table.cell(row, keywords_plus_col).trim().to_string(),
            ],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        let mut table = Table::new("export", headers.iter().map(|h| h.to_string()).collect());
        for row in rows {
            table.push_row(row.iter().map(|c| c.to_string()).collect());
        }
        table
    }

    #[test]
    fn test_extract_topics_prefers_manual_tags() {
        assert_eq!(
            extract_topics(" learning; memory ;learning;", "auto"),
            "learning; memory"
        );
        assert_eq!(extract_topics("", "spacing; testing"), "spacing; testing");
        assert_eq!(extract_topics(" ; ", ""), "");
    }

    #[test]
    fn test_topic_records() {
        let export = table(
            &["Title", "DOI", "Manual Tags", "Automatic Tags"],
            &[
                &["Deep learning", "10.1038/nature14539", "neural networks", "ignored"],
                &["Dropout", "", "", "regularization"],
            ],
        );

        let records = topic_records(&export);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].doi, "10.1038/nature14539");
        assert_eq!(records[0].payload, vec!["neural networks"]);
        assert_eq!(records[1].title, "Dropout");
        assert_eq!(records[1].payload, vec!["regularization"]);
    }

    #[test]
    fn test_wos_records_detect_columns_case_insensitively() {
        let export = table(
            &["article title", "doi", "AUTHOR KEYWORDS"],
            &[&[" Deep learning ", "10.1038/nature14539", "deep learning; AI"]],
        );

        let records = wos_records(&export);
        assert_eq!(records[0].title, "Deep learning");
        assert_eq!(records[0].payload, vec!["deep learning; AI", ""]);
    }
}

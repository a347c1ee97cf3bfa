use crate::error::{require_exists, OrganizerError};
use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader, Sheets};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use rust_xlsxwriter::{Format, Url, Workbook};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

const MAX_COLUMN_WIDTH: usize = 80;
const DATE_FORMAT: &str = "yyyy-mm-dd";
const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Workbook value of a non-text cell. The text form used for matching
/// stays in `Table::rows`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue {
    Number(f64),
    /// Excel serial date.
    DateTime(f64),
    Bool(bool),
}

/// One sheet of cells under a header row. Every cell has a text form;
/// cells read from a workbook as numbers, dates or booleans also keep
/// their typed value until they are overwritten.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    values: HashMap<(usize, usize), CellValue>,
    link_columns: BTreeSet<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableFormat {
    Csv,
    Workbook,
}

fn table_format(path: &Path) -> Option<TableFormat> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "csv" => Some(TableFormat::Csv),
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Some(TableFormat::Workbook),
        _ => None,
    }
}

impl Table {
    pub fn new(name: &str, headers: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            headers,
            rows: Vec::new(),
            values: HashMap::new(),
            link_columns: BTreeSet::new(),
        }
    }

    /// Loads a CSV file, or one sheet of a workbook (first sheet by default).
    pub fn load(path: &Path, sheet: Option<&str>) -> Result<Self> {
        require_exists(path)?;
        let table = match table_format(path) {
            Some(TableFormat::Csv) => Self::load_csv(path)?,
            Some(TableFormat::Workbook) => {
                let mut workbook = open_workbook(path)?;
                let sheet_name = match sheet {
                    Some(name) => name.to_string(),
                    None => workbook.sheet_names().first().cloned().ok_or_else(|| {
                        OrganizerError::MissingSheet {
                            path: path.to_path_buf(),
                            sheet: "<first>".to_string(),
                        }
                    })?,
                };
                Self::read_sheet(&mut workbook, path, &sheet_name)?
            }
            None => return Err(OrganizerError::UnsupportedFormat(path.to_path_buf()).into()),
        };
        info!(
            "Loaded {} rows from {} (columns: {:?})",
            table.rows.len(),
            path.display(),
            table.headers
        );
        Ok(table)
    }

    fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("无法读取CSV文件: {}", path.display()))?;

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut table = Table::new(&name, headers);

        for (idx, record) in reader.records().enumerate() {
            match record {
                Ok(record) => {
                    let row = record.iter().map(|cell| cell.to_string()).collect();
                    table.push_row(row);
                }
                Err(e) => warn!("Skipping malformed CSV row {} in {}: {}", idx + 2, path.display(), e),
            }
        }

        Ok(table)
    }

    /// Every sheet of a workbook, in workbook order. A CSV file is one table.
    pub fn load_all(path: &Path) -> Result<Vec<Self>> {
        require_exists(path)?;
        match table_format(path) {
            Some(TableFormat::Csv) => Ok(vec![Self::load_csv(path)?]),
            Some(TableFormat::Workbook) => {
                let mut workbook = open_workbook(path)?;
                let tables = workbook
                    .sheet_names()
                    .iter()
                    .map(|name| Self::read_sheet(&mut workbook, path, name))
                    .collect::<Result<Vec<_>>>()?;
                info!("Loaded {} sheets from {}", tables.len(), path.display());
                Ok(tables)
            }
            None => Err(OrganizerError::UnsupportedFormat(path.to_path_buf()).into()),
        }
    }

    /// Reads one sheet. Blank rows are kept so row numbers match the sheet.
    fn read_sheet<RS: Read + Seek>(workbook: &mut Sheets<RS>, path: &Path, sheet_name: &str) -> Result<Self> {
        if !workbook.sheet_names().iter().any(|name| name == sheet_name) {
            return Err(OrganizerError::MissingSheet {
                path: path.to_path_buf(),
                sheet: sheet_name.to_string(),
            }
            .into());
        }

        let range = workbook
            .worksheet_range(sheet_name)
            .with_context(|| format!("无法读取工作表 {} ({})", sheet_name, path.display()))?;

        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .map(|row| row.iter().map(|cell| read_cell(cell).0.trim().to_string()).collect())
            .unwrap_or_default();

        let mut table = Table::new(sheet_name, headers);
        let width = table.headers.len();
        let mut blank = 0;
        for row in rows {
            let index = table.rows.len();
            let mut cells = Vec::with_capacity(width);
            for (col, cell) in row.iter().take(width).enumerate() {
                let (text, value) = read_cell(cell);
                if let Some(value) = value {
                    table.values.insert((index, col), value);
                }
                cells.push(text);
            }
            if cells.iter().all(|c| c.is_empty()) {
                blank += 1;
            }
            table.push_row(cells);
        }

        if blank > 0 {
            debug!("Sheet '{}' has {} blank rows, kept in place", sheet_name, blank);
        }
        Ok(table)
    }

    /// Appends a row, padding or truncating it to the header width.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// First header equal (ignoring case) to any of the candidates, in candidate order.
    pub fn find_column(&self, candidates: &[&str]) -> Option<usize> {
        candidates.iter().find_map(|candidate| {
            self.headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(candidate.trim()))
        })
    }

    /// Like `find_column`, logging a warning when no candidate is present.
    pub fn find_column_or_warn(&self, candidates: &[&str]) -> Option<usize> {
        let found = self.find_column(candidates);
        if found.is_none() {
            warn!(
                "None of the columns {:?} exist in '{}'; those values are treated as empty",
                candidates, self.name
            );
        }
        found
    }

    pub fn cell(&self, row: usize, col: Option<usize>) -> &str {
        col.and_then(|c| self.rows.get(row).and_then(|r| r.get(c)))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    /// Returns the column index, appending the column if it does not exist.
    /// Every cell of the column is reset to the empty string.
    pub fn reset_column(&mut self, name: &str) -> usize {
        let col = match self.column(name) {
            Some(col) => col,
            None => {
                self.headers.push(name.to_string());
                self.headers.len() - 1
            }
        };
        let width = self.headers.len();
        for row in &mut self.rows {
            row.resize(width, String::new());
            row[col].clear();
        }
        self.values.retain(|&(_, c), _| c != col);
        col
    }

    pub fn set(&mut self, row: usize, col: usize, value: impl Into<String>) {
        if let Some(cells) = self.rows.get_mut(row) {
            if col >= cells.len() {
                cells.resize(col + 1, String::new());
            }
            cells[col] = value.into();
            self.values.remove(&(row, col));
        }
    }

    /// Typed workbook value of a cell that still holds what was loaded.
    pub fn value(&self, row: usize, col: usize) -> Option<CellValue> {
        self.values.get(&(row, col)).copied()
    }

    /// Marks a column to be written as hyperlinks in workbook output.
    pub fn mark_link_column(&mut self, col: usize) {
        self.link_columns.insert(col);
    }

    pub fn is_link_column(&self, col: usize) -> bool {
        self.link_columns.contains(&col)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn open_workbook(path: &Path) -> Result<Sheets<std::io::BufReader<fs::File>>> {
    open_workbook_auto(path).with_context(|| format!("无法读取工作簿: {}", path.display()))
}

/// Text form of a cell, plus its typed value for non-text cells.
fn read_cell(cell: &Data) -> (String, Option<CellValue>) {
    match cell {
        Data::Empty => (String::new(), None),
        Data::String(s) => (s.clone(), None),
        Data::Float(f) => (number_text(*f), Some(CellValue::Number(*f))),
        Data::Int(i) => (i.to_string(), Some(CellValue::Number(*i as f64))),
        Data::Bool(b) => (b.to_string(), Some(CellValue::Bool(*b))),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            (date_text(serial, dt.as_datetime()), Some(CellValue::DateTime(serial)))
        }
        other => (other.to_string(), None),
    }
}

fn number_text(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn date_text(serial: f64, value: Option<NaiveDateTime>) -> String {
    match value {
        Some(dt) if serial.fract() == 0.0 => dt.format("%Y-%m-%d").to_string(),
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => number_text(serial),
    }
}

/// Turns a cell value into a hyperlink target, when it looks like one.
pub fn link_target(value: &str) -> Option<String> {
    let value = value.trim();
    if value.starts_with("file://") || value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    let path = Path::new(value);
    if path.is_absolute() {
        let normalized = value.replace('\\', "/");
        let normalized = normalized.trim_start_matches('/');
        return Some(format!("file:///{}", normalized));
    }
    None
}

fn link_text(target: &str, value: &str) -> String {
    if target.starts_with("file://") {
        Path::new(target.trim_start_matches("file://"))
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| value.to_string())
    } else {
        value.to_string()
    }
}

/// Writes the tables to `path`: every table as one sheet for workbooks,
/// only the first table for CSV.
pub fn save_tables(path: &Path, tables: &[&Table]) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("无法创建输出目录: {}", parent.display()))?;
    }

    match table_format(path) {
        Some(TableFormat::Csv) => {
            let table = tables
                .first()
                .ok_or_else(|| anyhow::anyhow!("no table to write to {}", path.display()))?;
            save_csv(path, table)?;
        }
        Some(TableFormat::Workbook) => save_workbook(path, tables)?,
        None => return Err(OrganizerError::UnsupportedFormat(path.to_path_buf()).into()),
    }

    info!("Saved {}", path.display());
    Ok(path.to_path_buf())
}

fn save_csv(path: &Path, table: &Table) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("无法写入CSV文件: {}", path.display()))?;
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn save_workbook(path: &Path, tables: &[&Table]) -> Result<()> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let date_format = Format::new().set_num_format(DATE_FORMAT);
    let datetime_format = Format::new().set_num_format(DATETIME_FORMAT);

    for table in tables {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet_name(&table.name))?;

        let mut widths: Vec<usize> = table.headers.iter().map(|h| h.chars().count()).collect();

        for (col, header) in table.headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, header, &header_format)?;
        }

        for (row_idx, row) in table.rows.iter().enumerate() {
            let excel_row = (row_idx + 1) as u32;
            for (col, value) in row.iter().enumerate() {
                let excel_col = col as u16;
                match table.value(row_idx, col) {
                    Some(CellValue::Number(number)) => {
                        worksheet.write_number(excel_row, excel_col, number)?;
                    }
                    Some(CellValue::DateTime(serial)) => {
                        let format = if serial.fract() == 0.0 { &date_format } else { &datetime_format };
                        worksheet.write_number_with_format(excel_row, excel_col, serial, format)?;
                    }
                    Some(CellValue::Bool(flag)) => {
                        worksheet.write_boolean(excel_row, excel_col, flag)?;
                    }
                    None if value.is_empty() => continue,
                    None => match link_target(value).filter(|_| table.is_link_column(col)) {
                        Some(target) => {
                            let text = link_text(&target, value);
                            worksheet.write_url(excel_row, excel_col, Url::new(target).set_text(text))?;
                        }
                        None => {
                            worksheet.write_string(excel_row, excel_col, value)?;
                        }
                    },
                }
                if let Some(width) = widths.get_mut(col) {
                    *width = (*width).max(value.chars().count());
                }
            }
        }

        for (col, width) in widths.iter().enumerate() {
            let width = (*width + 2).min(MAX_COLUMN_WIDTH);
            worksheet.set_column_width(col as u16, width as f64)?;
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("保存文件失败: {}", path.display()))?;
    Ok(())
}

/// Excel sheet names: at most 31 characters, no `[]:*?/\`.
fn sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if "[]:*?/\\".contains(c) { '_' } else { c })
        .take(31)
        .collect();
    if cleaned.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Table {
        let mut table = Table::new("Sheet1", vec!["DOI".to_string(), "Title".to_string()]);
        table.push_row(vec!["10.1038/nature14539".to_string(), "Deep learning".to_string()]);
        table.push_row(vec!["".to_string()]);
        table
    }

    #[test]
    fn test_load_csv_with_bom_and_short_rows() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("papers.csv");
        fs::write(&path, "\u{feff}DOI,Title,Publication Year\n10.1/a,First,2006\n10.1/b\n")?;

        let table = Table::load(&path, None)?;
        assert_eq!(table.headers, vec!["DOI", "Title", "Publication Year"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(1, table.column("DOI")), "10.1/b");
        assert_eq!(table.cell(1, table.column("Title")), "");
        assert_eq!(table.cell(0, None), "");
        Ok(())
    }

    #[test]
    fn test_load_missing_file_is_missing_input() {
        let err = Table::load(Path::new("/nonexistent/papers.csv"), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrganizerError>(),
            Some(OrganizerError::MissingInput(_))
        ));
    }

    #[test]
    fn test_find_column_ignores_case_and_keeps_candidate_order() {
        let table = Table::new(
            "wos",
            vec!["Article Title".to_string(), "author keywords".to_string(), "DOI".to_string()],
        );
        assert_eq!(table.find_column(&["Author Keywords"]), Some(1));
        assert_eq!(table.find_column(&["标准化DOI", "doi"]), Some(2));
        assert_eq!(table.find_column(&["Keywords Plus"]), None);
    }

    #[test]
    fn test_reset_column_initializes_empty_strings() {
        let mut table = sample();
        table.set(0, 1, "changed");
        let col = table.reset_column("论文主题");
        assert_eq!(col, 2);
        assert!(table.rows.iter().all(|r| r.len() == 3 && r[2].is_empty()));

        table.set(0, col, "deep learning");
        let again = table.reset_column("论文主题");
        assert_eq!(again, col);
        assert_eq!(table.cell(0, Some(col)), "");
    }

    #[test]
    fn test_workbook_roundtrip_with_two_sheets() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("out.xlsx");

        let table = sample();
        let mut stats = Table::new("统计信息", vec!["统计项目".to_string(), "数值".to_string()]);
        stats.push_row(vec!["论文总数".to_string(), "2".to_string()]);

        save_tables(&path, &[&table, &stats])?;

        let loaded = Table::load(&path, None)?;
        assert_eq!(loaded.headers, table.headers);
        assert_eq!(loaded.cell(0, loaded.column("DOI")), "10.1038/nature14539");

        let loaded_stats = Table::load(&path, Some("统计信息"))?;
        assert_eq!(loaded_stats.cell(0, Some(1)), "2");

        let missing = Table::load(&path, Some("nope"));
        assert!(missing.is_err());
        Ok(())
    }

    /// Sheet1: DOI, Title, Date (dated), Year (number), Open (bool), with a
    /// blank second data row.
    fn typed_workbook(path: &Path) -> Result<()> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name("Sheet1")?;
        for (col, header) in ["DOI", "Title", "Date", "Year", "Open"].iter().enumerate() {
            worksheet.write_string(0, col as u16, *header)?;
        }
        worksheet.write_string(1, 0, "10.1/a")?;
        worksheet.write_string(1, 1, "A")?;
        worksheet.write_number_with_format(1, 2, 45429.0, &Format::new().set_num_format(DATE_FORMAT))?;
        worksheet.write_number(1, 3, 2006)?;
        worksheet.write_boolean(1, 4, true)?;
        worksheet.write_string(3, 0, "10.1/b")?;
        worksheet.write_string(3, 1, "B")?;
        workbook.save(path)?;
        Ok(())
    }

    #[test]
    fn test_typed_cells_survive_save() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let input = tmp_dir.path().join("papers.xlsx");
        typed_workbook(&input)?;

        let mut table = Table::load(&input, None)?;
        assert_eq!(table.len(), 3);
        assert_eq!(table.cell(1, Some(0)), "");
        assert_eq!(table.cell(2, Some(0)), "10.1/b");
        assert_eq!(table.cell(0, Some(2)), "2024-05-17");
        assert_eq!(table.cell(0, Some(3)), "2006");
        assert_eq!(table.value(0, 2), Some(CellValue::DateTime(45429.0)));
        assert_eq!(table.value(0, 3), Some(CellValue::Number(2006.0)));
        assert_eq!(table.value(0, 4), Some(CellValue::Bool(true)));
        assert_eq!(table.value(0, 1), None);

        table.set(0, 1, "A changed");
        let output = tmp_dir.path().join("out.xlsx");
        save_tables(&output, &[&table])?;

        let mut saved = open_workbook(&output)?;
        let range = saved.worksheet_range("Sheet1")?;
        assert_eq!(range.get_value((1, 1)), Some(&Data::String("A changed".to_string())));
        assert!(matches!(range.get_value((1, 2)), Some(Data::DateTime(dt)) if dt.as_f64() == 45429.0));
        assert_eq!(range.get_value((1, 3)), Some(&Data::Float(2006.0)));
        assert_eq!(range.get_value((1, 4)), Some(&Data::Bool(true)));
        assert_eq!(range.get_value((3, 0)), Some(&Data::String("10.1/b".to_string())));
        Ok(())
    }

    #[test]
    fn test_overwritten_cells_lose_their_type() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let input = tmp_dir.path().join("papers.xlsx");
        typed_workbook(&input)?;

        let mut table = Table::load(&input, None)?;
        table.set(0, 3, "unknown");
        assert_eq!(table.value(0, 3), None);
        let col = table.reset_column("Date");
        assert_eq!(table.value(0, col), None);
        assert_eq!(table.value(0, 4), Some(CellValue::Bool(true)));
        Ok(())
    }

    #[test]
    fn test_load_all_sheets() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("two.xlsx");
        let mut stats = Table::new("统计信息", vec!["统计项目".to_string(), "数值".to_string()]);
        stats.push_row(vec!["论文总数".to_string(), "2".to_string()]);
        save_tables(&path, &[&sample(), &stats])?;

        let tables = Table::load_all(&path)?;
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Sheet1", "统计信息"]);
        assert_eq!(tables[1].cell(0, Some(0)), "论文总数");

        let csv = tmp_dir.path().join("one.csv");
        save_tables(&csv, &[&sample()])?;
        assert_eq!(Table::load_all(&csv)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_csv_output() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("nested").join("out.csv");
        save_tables(&path, &[&sample()])?;

        let content = fs::read_to_string(&path)?;
        assert!(content.starts_with("DOI,Title\n"));
        assert!(content.contains("10.1038/nature14539,Deep learning"));
        Ok(())
    }

    #[test]
    fn test_link_target() {
        assert_eq!(
            link_target("file:///tmp/[10.1_a].pdf"),
            Some("file:///tmp/[10.1_a].pdf".to_string())
        );
        assert_eq!(
            link_target("/data/pdf/[10.1_a].pdf"),
            Some("file:///data/pdf/[10.1_a].pdf".to_string())
        );
        assert_eq!(link_target("PDF文件未找到"), None);
        assert_eq!(link_text("file:///data/pdf/a.pdf", "x"), "a.pdf");
    }

    #[test]
    fn test_sheet_name_sanitized() {
        assert_eq!(sheet_name("a/b[c]"), "a_b_c_");
        assert_eq!(sheet_name(""), "Sheet1");
        assert_eq!(sheet_name(&"x".repeat(40)).len(), 31);
    }
}

use anyhow::{Context, Result};
use chrono::Local;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStyle {
    Markdown,
    Plain,
}

/// Human-readable report, rendered either as markdown or as plain text.
pub struct Report {
    style: ReportStyle,
    body: String,
}

pub fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn file_stamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

impl Report {
    pub fn markdown(title: &str) -> Self {
        let mut report = Report {
            style: ReportStyle::Markdown,
            body: String::new(),
        };
        report.body.push_str(&format!("# {}\n\n", title));
        report.body.push_str(&format!("生成时间: {}\n\n", now_stamp()));
        report
    }

    pub fn plain(title: &str) -> Self {
        let mut report = Report {
            style: ReportStyle::Plain,
            body: String::new(),
        };
        report.body.push_str(&format!("{}\n", title));
        report.body.push_str(&format!("{}\n\n", "=".repeat(50)));
        report.body.push_str(&format!("处理时间: {}\n\n", now_stamp()));
        report
    }

    pub fn section(&mut self, heading: &str) -> &mut Self {
        match self.style {
            ReportStyle::Markdown => self.body.push_str(&format!("## {}\n\n", heading)),
            ReportStyle::Plain => {
                self.body.push_str(&format!("{}\n", heading));
                self.body.push_str(&format!("{}\n", "-".repeat(30)));
            }
        }
        self
    }

    pub fn line(&mut self, text: &str) -> &mut Self {
        self.body.push_str(text);
        self.body.push('\n');
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.body.push('\n');
        self
    }

    pub fn field(&mut self, label: &str, value: impl std::fmt::Display) -> &mut Self {
        match self.style {
            ReportStyle::Markdown => self.body.push_str(&format!("- **{}**: {}\n", label, value)),
            ReportStyle::Plain => self.body.push_str(&format!("{}: {}\n", label, value)),
        }
        self
    }

    pub fn item(&mut self, text: &str) -> &mut Self {
        self.body.push_str(&format!("- {}\n", text));
        self
    }

    pub fn checklist_item(&mut self, text: &str) -> &mut Self {
        self.body.push_str(&format!("- [ ] {}\n", text));
        self
    }

    /// Numbered entry with indented detail lines.
    pub fn entry(&mut self, index: usize, first: &str, details: &[String]) -> &mut Self {
        self.body.push_str(&format!("{}. {}\n", index, first));
        for detail in details {
            self.body.push_str(&format!("   {}\n", detail));
        }
        self.body.push('\n');
        self
    }

    /// Markdown pipe table; in plain style rows are tab-separated.
    pub fn table(&mut self, headers: &[&str], rows: &[Vec<String>]) -> &mut Self {
        match self.style {
            ReportStyle::Markdown => {
                self.body.push_str(&format!("| {} |\n", headers.join(" | ")));
                let separator: Vec<&str> = headers.iter().map(|_| "------").collect();
                self.body.push_str(&format!("|{}|\n", separator.join("|")));
                for row in rows {
                    let cells: Vec<String> = row.iter().map(|c| c.replace('|', "\\|")).collect();
                    self.body.push_str(&format!("| {} |\n", cells.join(" | ")));
                }
            }
            ReportStyle::Plain => {
                self.body.push_str(&format!("{}\n", headers.join("\t")));
                for row in rows {
                    self.body.push_str(&format!("{}\n", row.join("\t")));
                }
            }
        }
        self.body.push('\n');
        self
    }

    pub fn render(&self) -> String {
        let mut out = self.body.clone();
        if self.style == ReportStyle::Markdown {
            out.push_str("---\n");
            out.push_str("*此文件由 paper-organizer 自动生成*\n");
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("无法创建报告目录: {}", parent.display()))?;
        }
        fs::write(path, self.render())
            .with_context(|| format!("无法写入报告: {}", path.display()))?;
        debug!("Wrote report {}", path.display());
        Ok(path.to_path_buf())
    }
}

/// `part / whole` as a percentage, 0 when `whole` is 0.
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Shortens `text` to at most `max_chars` characters, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

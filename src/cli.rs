use crate::affiliations::DEFAULT_DELAY_MS;
use crate::backup::DEFAULT_BACKUP_DIR;
use crate::batch::DEFAULT_BATCH_SIZE;
use crate::doi_format::DoiStyle;
use crate::logging::DEFAULT_LOG_FILE;
use crate::matcher::DEFAULT_FUZZY_THRESHOLD;
use crate::openalex::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use crate::sources::DEFAULT_TOPIC_COLUMN;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "paper-organizer",
    about = "Reconcile, rename and enrich a researcher's paper collection",
    version
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(long, short = 'v', global = true, help = "Enable verbose (debug) logging")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        default_value = DEFAULT_LOG_FILE,
        help = "Append log lines to this file as well as the console"
    )]
    pub log_file: PathBuf,

    #[arg(
        long,
        global = true,
        help = "Print the result as JSON on stdout (log lines go to stderr)"
    )]
    pub json: bool,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        default_value = DEFAULT_BACKUP_DIR,
        help = "Directory for timestamped backups of files that get rewritten"
    )]
    pub backup_dir: PathBuf,
}

/// Options shared by the two merge commands.
#[derive(ClapArgs, Debug, Clone)]
pub struct MergeArgs {
    #[arg(long, value_name = "FILE", help = "Workbook (or CSV) to enrich; never modified")]
    pub target: PathBuf,

    #[arg(long, value_name = "FILE", help = "Where to write the enriched copy")]
    pub output: PathBuf,

    #[arg(long, value_name = "NAME", help = "Sheet of the target workbook (default: first sheet)")]
    pub sheet: Option<String>,

    #[arg(
        long,
        value_name = "0-100",
        default_value_t = DEFAULT_FUZZY_THRESHOLD,
        value_parser = clap::value_parser!(u8).range(0..=100),
        help = "Minimum title similarity for a fuzzy match"
    )]
    pub threshold: u8,

    #[arg(long, help = "Skip the per-match detail workbook")]
    pub no_match_report: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Merge reference-manager tags into a workbook as a topic column
    AddTopics {
        #[command(flatten)]
        merge: MergeArgs,

        #[arg(long, value_name = "FILE", help = "Reference-manager CSV export with Manual/Automatic Tags")]
        source: PathBuf,

        #[arg(long, value_name = "NAME", default_value = DEFAULT_TOPIC_COLUMN, help = "Name of the topic column")]
        column: String,
    },

    /// Merge Web of Science keywords into a workbook
    MergeKeywords {
        #[command(flatten)]
        merge: MergeArgs,

        #[arg(long, value_name = "FILE", help = "Web of Science export (.xls, .xlsx or .csv)")]
        wos: PathBuf,
    },

    /// Copy attachment PDFs to [<doi>].pdf names
    RenamePdfs {
        #[arg(long, value_name = "FILE", help = "CSV with DOI and File Attachments columns")]
        csv: PathBuf,

        #[arg(long, value_name = "DIR", help = "Folder holding the attachment PDFs (searched recursively)")]
        pdf_dir: PathBuf,

        #[arg(long, value_name = "DIR", help = "Folder receiving the renamed copies and reports")]
        output_dir: PathBuf,

        #[arg(long, short = 'd', help = "Show what would be copied without writing anything")]
        dry_run: bool,
    },

    /// Copy [<doi>].pdf files into per-year folders
    OrganizeByYear {
        #[arg(long, value_name = "FILE", help = "CSV with DOI and Publication Year columns")]
        csv: PathBuf,

        #[arg(long, value_name = "DIR", help = "Folder holding [<doi>].pdf files")]
        input_dir: PathBuf,

        #[arg(long, value_name = "DIR", help = "Folder receiving one sub-folder per year")]
        output_dir: PathBuf,
    },

    /// Compare the DOIs of a CSV with the DOIs in PDF filenames
    CheckDois {
        #[arg(long, value_name = "FILE")]
        csv: PathBuf,

        #[arg(long, value_name = "DIR", help = "Folder holding [<doi>].pdf files")]
        pdf_dir: PathBuf,

        #[arg(long, value_name = "DIR", help = "Where to write the report (default: next to the CSV)")]
        report_dir: Option<PathBuf>,
    },

    /// Rewrite a DOI column between the slash and underscore forms
    ConvertDois {
        #[arg(long, value_name = "FILE", help = "CSV or workbook with a DOI column")]
        input: PathBuf,

        #[arg(long, value_name = "FILE")]
        output: PathBuf,

        #[arg(long, value_enum, help = "DOI form to write")]
        to: DoiStyle,

        #[arg(long, value_name = "NAME|LETTER", help = "DOI column (default: DOI or 标准化DOI)")]
        column: Option<String>,
    },

    /// Write Web of Science advanced-search queries in DOI batches
    BatchSearches {
        #[arg(long, value_name = "FILE", help = "CSV with DOI and Title columns")]
        csv: PathBuf,

        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,

        #[arg(long, value_name = "N", default_value_t = DEFAULT_BATCH_SIZE, help = "DOIs per query")]
        batch_size: usize,
    },

    /// Turn each tweet of a CSV export into its own markdown file
    TweetsToMd {
        #[arg(long, value_name = "FILE", help = "CSV with created_at and full_text columns")]
        csv: PathBuf,

        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,

        #[arg(long, help = "Prepend YAML front matter (title, excerpt, category, source, uin)")]
        front_matter: bool,

        #[arg(long, value_name = "TEXT", default_value = "X", help = "Value of the front matter source field")]
        source: String,
    },

    /// Query OpenAlex for a researcher's institutions on each paper
    Affiliations {
        #[arg(long, value_name = "FILE", help = "CSV with Author, Title, DOI columns")]
        csv: PathBuf,

        #[arg(long, value_name = "FILE", help = "Output workbook")]
        output: PathBuf,

        #[arg(long, value_name = "NAME", help = "Researcher whose affiliations are collected")]
        researcher: String,

        #[arg(long, value_name = "TEXT", help = "Only rows whose Author cell contains this text")]
        author_filter: Option<String>,

        #[arg(long, value_name = "DIR", help = "Folder of [<doi>].pdf files to link")]
        pdf_dir: Option<PathBuf>,

        #[arg(long, value_name = "URL", default_value = DEFAULT_BASE_URL)]
        base_url: String,

        #[arg(long, value_name = "MS", default_value_t = DEFAULT_DELAY_MS, help = "Pause between requests")]
        delay_ms: u64,

        #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TIMEOUT_SECS, help = "Request timeout")]
        timeout_secs: u64,
    },

    /// Rewrite a workbook column of file paths as hyperlinks
    LinkColumn {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        #[arg(long, value_name = "NAME|LETTER", help = "Header name or column letter (e.g. J)")]
        column: String,

        #[arg(long, value_name = "FILE")]
        output: PathBuf,

        #[arg(long, value_name = "NAME", help = "Sheet to convert (default: first sheet)")]
        sheet: Option<String>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddTopics { .. } => "add-topics",
            Command::MergeKeywords { .. } => "merge-keywords",
            Command::RenamePdfs { .. } => "rename-pdfs",
            Command::OrganizeByYear { .. } => "organize-by-year",
            Command::CheckDois { .. } => "check-dois",
            Command::ConvertDois { .. } => "convert-dois",
            Command::BatchSearches { .. } => "batch-searches",
            Command::TweetsToMd { .. } => "tweets-to-md",
            Command::Affiliations { .. } => "affiliations",
            Command::LinkColumn { .. } => "link-column",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_topics_defaults() {
        let args = Args::try_parse_from([
            "paper-organizer",
            "add-topics",
            "--target",
            "papers.xlsx",
            "--source",
            "zotero.csv",
            "--output",
            "papers_with_topics.xlsx",
        ])
        .unwrap();

        assert_eq!(args.log_file, PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(args.backup_dir, PathBuf::from(DEFAULT_BACKUP_DIR));
        match args.command {
            Command::AddTopics { merge, column, .. } => {
                assert_eq!(merge.threshold, 85);
                assert_eq!(column, "论文主题");
                assert!(!merge.no_match_report);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "paper-organizer",
            "batch-searches",
            "--csv",
            "papers.csv",
            "--output-dir",
            "out",
            "--json",
            "-v",
        ])
        .unwrap();
        assert!(args.json);
        assert!(args.verbose);
        assert_eq!(args.command.name(), "batch-searches");
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        let result = Args::try_parse_from([
            "paper-organizer",
            "merge-keywords",
            "--target",
            "a.xlsx",
            "--wos",
            "wos.xls",
            "--output",
            "b.xlsx",
            "--threshold",
            "101",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_convert_dois_style() {
        let args = Args::try_parse_from([
            "paper-organizer",
            "convert-dois",
            "--input",
            "papers.csv",
            "--output",
            "papers_fixed.csv",
            "--to",
            "underscore",
        ])
        .unwrap();
        match args.command {
            Command::ConvertDois { to, column, .. } => {
                assert_eq!(to, DoiStyle::Underscore);
                assert!(column.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }

        let bad = Args::try_parse_from([
            "paper-organizer",
            "convert-dois",
            "--input",
            "a.csv",
            "--output",
            "b.csv",
            "--to",
            "dash",
        ]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_affiliations_requires_researcher() {
        let result = Args::try_parse_from([
            "paper-organizer",
            "affiliations",
            "--csv",
            "papers.csv",
            "--output",
            "out.xlsx",
        ]);
        assert!(result.is_err());
    }
}

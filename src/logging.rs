use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

pub const DEFAULT_LOG_FILE: &str = "paper_organizer.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
}

/// Copies every log line to the log file and to the console.
pub struct TeeWriter {
    file: File,
    console: Console,
}

impl TeeWriter {
    pub fn new(file: File, console: Console) -> Self {
        Self { file, console }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        match self.console {
            Console::Stdout => io::stdout().write_all(buf)?,
            Console::Stderr => io::stderr().write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        match self.console {
            Console::Stdout => io::stdout().flush(),
            Console::Stderr => io::stderr().flush(),
        }
    }
}

/// Installs the global logger. `RUST_LOG` takes precedence over `verbose`.
/// In JSON mode log lines go to stderr so stdout carries only the JSON.
pub fn init(verbose: bool, log_file: &Path, json: bool) -> Result<()> {
    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("无法创建日志目录: {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("无法打开日志文件: {}", log_file.display()))?;

    let console = if json { Console::Stderr } else { Console::Stdout };
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    Builder::new()
        .filter_level(level)
        .parse_env(Env::default())
        .format_timestamp_millis()
        .target(Target::Pipe(Box::new(TeeWriter::new(file, console))))
        .try_init()?;
    Ok(())
}

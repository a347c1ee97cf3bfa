use crate::normalizer::doi_from_filename;
use anyhow::{anyhow, Result};
use log::debug;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursion depth meaning "walk the whole tree".
pub const UNLIMITED_DEPTH: usize = usize::MAX;

#[derive(Debug, Clone)]
pub struct PdfFile {
    pub path: PathBuf,
    pub name: String,
    /// `<encoded>` when the file is named `[<encoded>].pdf`.
    pub encoded_doi: Option<String>,
}

pub struct Scanner {
    root_path: PathBuf,
    max_depth: usize,
}

impl Scanner {
    pub fn new(path: &Path, max_depth: usize) -> Result<Self> {
        let root_path = path
            .canonicalize()
            .map_err(|e| anyhow!("Cannot open PDF folder {:?}: {}", path, e))?;
        if !root_path.is_dir() {
            return Err(anyhow!("Path is not a directory: {:?}", path));
        }
        Ok(Scanner {
            root_path,
            max_depth,
        })
    }

    /// PDF files under the root, sorted by path.
    pub fn scan(&self) -> Result<Vec<PdfFile>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.root_path)
            .max_depth(self.max_depth)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_pdf(path) {
                continue;
            }

            match self.create_pdf_file(path) {
                Ok(pdf) => files.push(pdf),
                Err(e) => debug!("Skipping {:?}: {}", path, e),
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Scanner found {} PDF files in {:?}", files.len(), self.root_path);
        Ok(files)
    }

    fn create_pdf_file(&self, path: &Path) -> Result<PdfFile> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("Invalid filename: {:?}", path))?
            .to_string();
        let encoded_doi = doi_from_filename(&name).map(str::to_string);

        Ok(PdfFile {
            path: path.to_path_buf(),
            name,
            encoded_doi,
        })
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Hex MD5 digest of a file, read in 8 KiB chunks.
pub fn compute_md5(path: &Path) -> Result<String> {
    const BUFFER_SIZE: usize = 8192;

    let mut file = fs::File::open(path)?;
    let mut hasher = md5::Context::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.compute()))
}

use once_cell::sync::Lazy;
use regex::Regex;

static DOI_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:doi:\s*|https?://(?:dx\.)?doi\.org/)").unwrap());

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static FILENAME_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"|?*\\]"#).unwrap());

static UNDERSCORE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());

static DOI_FILENAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\[(.+)\]\.pdf$").unwrap());

/// Reduces a raw DOI to its comparison form.
///
/// Prefixes (`doi:`, `https://doi.org/`, `https://dx.doi.org/`) are stripped,
/// the result is lower-cased, and the filesystem-safe underscore variant is
/// folded back to the slash form: a DOI without any `/` gets its first `_`
/// turned into `/`. Empty input stays empty.
pub fn canonical_doi(raw: &str) -> String {
    let mut doi = raw.trim();
    while let Some(m) = DOI_PREFIX.find(doi) {
        doi = doi[m.end()..].trim_start();
    }

    let mut doi = doi.trim().to_lowercase();
    if !doi.contains('/') {
        if let Some(pos) = doi.find('_') {
            doi.replace_range(pos..pos + 1, "/");
        }
    }
    doi
}

/// Lower-cases, turns punctuation into spaces and collapses whitespace.
pub fn canonical_title(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let spaced = NON_WORD.replace_all(&lowered, " ");
    WHITESPACE_RUN.replace_all(&spaced, " ").trim().to_string()
}

/// Filesystem-safe form of a DOI: `/` and reserved characters become `_`.
pub fn encode_doi_for_filename(doi: &str) -> String {
    let replaced = doi.trim().replace('/', "_");
    let replaced = FILENAME_UNSAFE.replace_all(&replaced, "_");
    UNDERSCORE_RUN.replace_all(&replaced, "_").to_string()
}

/// `[<encoded-doi>].pdf`
pub fn pdf_filename_for_doi(doi: &str) -> String {
    format!("[{}].pdf", encode_doi_for_filename(doi))
}

/// Extracts the encoded DOI from a `[<encoded-doi>].pdf` filename.
pub fn doi_from_filename(filename: &str) -> Option<&str> {
    DOI_FILENAME
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Key for comparing DOIs against ones recovered from filenames.
///
/// The filename encoding loses every slash after the first, so both sides
/// are compared in encoded form.
pub fn filename_key(raw: &str) -> String {
    encode_doi_for_filename(&canonical_doi(raw))
}

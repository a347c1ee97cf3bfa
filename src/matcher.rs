use crate::normalizer::{canonical_doi, canonical_title};
use log::{debug, warn};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

pub const DEFAULT_FUZZY_THRESHOLD: u8 = 85;

/// How a target record was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    DoiExact,
    TitleFuzzy(u8),
    NoMatch,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKind::DoiExact => write!(f, "DOI_EXACT"),
            MatchKind::TitleFuzzy(score) => write!(f, "TITLE_FUZZY_{}", score),
            MatchKind::NoMatch => write!(f, "NO_MATCH"),
        }
    }
}

impl Serialize for MatchKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Canonical DOI and title of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchKey {
    pub doi: String,
    pub title: String,
}

impl MatchKey {
    pub fn new(raw_doi: &str, raw_title: &str) -> Self {
        Self {
            doi: canonical_doi(raw_doi),
            title: canonical_title(raw_title),
        }
    }

    /// Builds keys for any record type through field accessors.
    pub fn from_records<T>(
        records: &[T],
        doi: impl Fn(&T) -> &str,
        title: impl Fn(&T) -> &str,
    ) -> Vec<MatchKey> {
        records
            .iter()
            .map(|record| MatchKey::new(doi(record), title(record)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub target: usize,
    pub source: Option<usize>,
    pub kind: MatchKind,
}

/// Levenshtein ratio scaled to 0..=100.
pub fn similarity(a: &str, b: &str) -> u8 {
    (strsim::normalized_levenshtein(a, b) * 100.0).round() as u8
}

pub struct Matcher {
    threshold: u8,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(DEFAULT_FUZZY_THRESHOLD)
    }
}

impl Matcher {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold: threshold.min(100),
        }
    }

    /// Finds the source for one target: DOI equality first, then the best
    /// title score at or above the threshold. Ties go to the earlier source.
    pub fn resolve(&self, target: &MatchKey, sources: &[MatchKey]) -> (Option<usize>, MatchKind) {
        if !target.doi.is_empty() {
            if let Some(idx) = sources.iter().position(|s| s.doi == target.doi) {
                return (Some(idx), MatchKind::DoiExact);
            }
        }

        if target.title.is_empty() {
            return (None, MatchKind::NoMatch);
        }

        let mut best: Option<(usize, u8)> = None;
        for (idx, source) in sources.iter().enumerate() {
            if source.title.is_empty() {
                continue;
            }
            let score = similarity(&target.title, &source.title);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((idx, score));
            }
        }

        match best {
            Some((idx, score)) if score >= self.threshold => {
                (Some(idx), MatchKind::TitleFuzzy(score))
            }
            _ => (None, MatchKind::NoMatch),
        }
    }

    pub fn resolve_all(&self, targets: &[MatchKey], sources: &[MatchKey]) -> Vec<Resolution> {
        warn_duplicate_dois(sources);

        targets
            .iter()
            .enumerate()
            .map(|(target_idx, target)| {
                let (source, kind) = self.resolve(target, sources);
                debug!("target {} -> {:?} ({})", target_idx + 1, source, kind);
                Resolution {
                    target: target_idx,
                    source,
                    kind,
                }
            })
            .collect()
    }
}

fn warn_duplicate_dois(sources: &[MatchKey]) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for key in sources.iter().filter(|k| !k.doi.is_empty()) {
        if !seen.insert(key.doi.as_str()) && reported.insert(key.doi.as_str()) {
            warn!(
                "Duplicate DOI in source records: {} (the first occurrence is used)",
                key.doi
            );
        }
    }
}

/// Per-kind counts of a matching run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub doi_exact: usize,
    pub title_fuzzy: usize,
    pub no_match: usize,
    pub total: usize,
}

impl MatchStats {
    pub fn from_resolutions(resolutions: &[Resolution]) -> Self {
        let mut stats = MatchStats {
            total: resolutions.len(),
            ..Default::default()
        };
        for resolution in resolutions {
            match resolution.kind {
                MatchKind::DoiExact => stats.doi_exact += 1,
                MatchKind::TitleFuzzy(_) => stats.title_fuzzy += 1,
                MatchKind::NoMatch => stats.no_match += 1,
            }
        }
        stats
    }

    pub fn matched(&self) -> usize {
        self.doi_exact + self.title_fuzzy
    }

    pub fn percentage(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64 * 100.0
        }
    }
}

//! Fuzzy venue-name index.
//!
//! Maps free-text publication-venue names ("Astrophysical Journal",
//! "Proc. SPIE", "AAS Meeting Abstracts") to canonical short codes
//! (bibstems). Built once at startup from flat authority tables and
//! immutable afterwards, so a single index can be shared by reference
//! across concurrently running resolutions without synchronization.
//!
//! Lookup strategy: an exact casefolded hit wins outright; very short
//! names go through a dedicated short-key map (trigrams are useless below
//! three characters); everything else is narrowed by trigram overlap and
//! then ranked by normalized Levenshtein similarity.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

#[derive(Error, Debug)]
pub enum SourceMatchError {
    #[error("IO error reading authority table: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed authority row at line {line}: {text:?}")]
    MalformedRow { line: usize, text: String },
}

/// One scored lookup result.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMatch {
    pub code: String,
    pub score: f64,
}

#[derive(Debug)]
struct NameEntry {
    normalized: String,
    /// Codes this name maps to (many-to-many).
    codes: Vec<String>,
}

/// Immutable venue-name → bibstem index.
#[derive(Debug, Default)]
pub struct FuzzyNameIndex {
    entries: Vec<NameEntry>,
    /// Normalized full name → entry ids.
    exact: HashMap<String, Vec<usize>>,
    /// Names shorter than three characters, keyed directly.
    short: HashMap<String, Vec<usize>>,
    /// Trigram → entry ids that contain it.
    trigrams: HashMap<[char; 3], Vec<usize>>,
    /// Code → every authority name registered for it.
    code_names: HashMap<String, Vec<String>>,
    /// Codes flagged as conference series by the authority type column.
    conference_codes: HashMap<String, bool>,
}

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9 ]").unwrap());

/// Casefold, ASCII-fold and strip punctuation so that lookups are
/// insensitive to accents, case and separators.
pub fn normalize_name(raw: &str) -> String {
    let folded: String = raw.nfkd().filter(|c| c.is_ascii()).collect();
    let lower = folded.to_lowercase();
    let cleaned = NON_WORD_RE.replace_all(&lower, " ");
    WS_RE.replace_all(cleaned.trim(), " ").to_string()
}

fn trigrams_of(name: &str) -> Vec<[char; 3]> {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() < 3 {
        return Vec::new();
    }
    chars.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
}

impl FuzzyNameIndex {
    /// Build an index from every `*.dat` / `*.tsv` / `*.txt` file in a
    /// directory. Files are newline-delimited, tab-separated authority
    /// tables: `code<TAB>name` or `code<TAB>type<TAB>name`, where a type
    /// column of `C` marks a conference series.
    pub fn from_dir(dir: &Path) -> Result<Self, SourceMatchError> {
        let mut index = Self::default();
        let mut files = 0usize;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !matches!(ext, "dat" | "tsv" | "txt") {
                continue;
            }
            let file = std::fs::File::open(&path)?;
            index.load_reader(std::io::BufReader::new(file))?;
            files += 1;
        }
        tracing::info!(files, names = index.entries.len(), "built fuzzy name index");
        Ok(index)
    }

    /// Build an index from a single authority table.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, SourceMatchError> {
        let mut index = Self::default();
        index.load_reader(reader)?;
        Ok(index)
    }

    fn load_reader<R: BufRead>(&mut self, reader: R) -> Result<(), SourceMatchError> {
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let cols: Vec<&str> = trimmed.split('\t').collect();
            let (code, conference, name) = match cols.as_slice() {
                [code, name] => (*code, false, *name),
                [code, kind, name] => (*code, kind.trim().eq_ignore_ascii_case("c"), *name),
                _ => {
                    return Err(SourceMatchError::MalformedRow {
                        line: lineno + 1,
                        text: trimmed.to_string(),
                    });
                }
            };
            self.insert(code.trim(), name.trim(), conference);
        }
        Ok(())
    }

    fn insert(&mut self, code: &str, name: &str, conference: bool) {
        if code.is_empty() || name.is_empty() {
            return;
        }
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return;
        }

        self.code_names
            .entry(code.to_string())
            .or_default()
            .push(name.to_string());
        *self.conference_codes.entry(code.to_string()).or_insert(false) |= conference;

        // Same normalized name may already exist; extend its code list.
        if let Some(ids) = self.exact.get(&normalized) {
            for &id in ids {
                if !self.entries[id].codes.iter().any(|c| c == code) {
                    self.entries[id].codes.push(code.to_string());
                }
            }
            return;
        }

        let id = self.entries.len();
        self.entries.push(NameEntry {
            normalized: normalized.clone(),
            codes: vec![code.to_string()],
        });
        self.exact.entry(normalized.clone()).or_default().push(id);
        if normalized.len() < 3 {
            self.short.entry(normalized.clone()).or_default().push(id);
        }
        for tri in trigrams_of(&normalized) {
            let ids = self.trigrams.entry(tri).or_default();
            if ids.last() != Some(&id) {
                ids.push(id);
            }
        }
    }

    /// Number of distinct authority names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the authority tables flagged this code as a conference series.
    pub fn is_conference(&self, code: &str) -> bool {
        self.conference_codes.get(code).copied().unwrap_or(false)
    }

    /// Every authority name registered for a code.
    pub fn names_for(&self, code: &str) -> &[String] {
        self.code_names.get(code).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Approximate lookup: scored candidate codes, best first.
    ///
    /// An exact casefolded hit always scores 1.0. Queries shorter than
    /// three characters bypass trigram selection and hit the short-key map
    /// directly (exact only). Otherwise candidates sharing at least a third
    /// of the query's trigrams are re-scored by normalized Levenshtein
    /// similarity and anything below `min_score` is discarded.
    pub fn lookup(&self, raw: &str, min_score: f64) -> Vec<SourceMatch> {
        let query = normalize_name(raw);
        if query.is_empty() {
            return Vec::new();
        }

        // Exact hit short-circuits at full confidence.
        if let Some(ids) = self.exact.get(&query) {
            return ids
                .iter()
                .flat_map(|&id| self.entries[id].codes.iter())
                .map(|code| SourceMatch {
                    code: code.clone(),
                    score: 1.0,
                })
                .collect();
        }

        if query.len() < 3 {
            return self
                .short
                .get(&query)
                .into_iter()
                .flatten()
                .flat_map(|&id| self.entries[id].codes.iter())
                .map(|code| SourceMatch {
                    code: code.clone(),
                    score: 1.0,
                })
                .collect();
        }

        let query_tris = trigrams_of(&query);
        let mut overlap: HashMap<usize, usize> = HashMap::new();
        for tri in &query_tris {
            if let Some(ids) = self.trigrams.get(tri) {
                for &id in ids {
                    *overlap.entry(id).or_insert(0) += 1;
                }
            }
        }

        let needed = (query_tris.len() / 3).max(1);
        let mut matches: Vec<SourceMatch> = Vec::new();
        for (id, shared) in overlap {
            if shared < needed {
                continue;
            }
            let entry = &self.entries[id];
            let score = rapidfuzz::distance::levenshtein::normalized_similarity(
                query.chars(),
                entry.normalized.chars(),
            );
            if score < min_score {
                continue;
            }
            for code in &entry.codes {
                matches.push(SourceMatch {
                    code: code.clone(),
                    score,
                });
            }
        }

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.code.cmp(&b.code)));
        // Keep only the best score per code.
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        matches.retain(|m| seen.insert(m.code.clone()));
        matches
    }

    /// Best single code at/above `min_score`, if any.
    pub fn best_code(&self, raw: &str, min_score: f64) -> Option<SourceMatch> {
        self.lookup(raw, min_score).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TABLE: &str = "\
ApJ\tAstrophysical Journal
ApJ\tThe Astrophysical Journal
ApJL\tAstrophysical Journal Letters
AAS\tC\tAmerican Astronomical Society Meeting Abstracts
AAS\tC\tAAS Meeting
MNRAS\tMonthly Notices of the Royal Astronomical Society
PhRvL\tPhysical Review Letters
A&A\tAstronomy and Astrophysics
Sci\tScience
JL\tJL
";

    fn index() -> FuzzyNameIndex {
        FuzzyNameIndex::from_reader(Cursor::new(TABLE)).unwrap()
    }

    #[test]
    fn exact_casefolded_lookup_scores_one() {
        let idx = index();
        let hits = idx.lookup("ASTROPHYSICAL JOURNAL", 0.5);
        assert_eq!(hits[0].code, "ApJ");
        assert_eq!(hits[0].score, 1.0);
    }

    #[test]
    fn accented_exact_lookup_scores_one() {
        let idx = index();
        // NFKD folding makes the accented form identical to the stored one.
        let hits = idx.lookup("Astrophysicál Journal", 0.5);
        assert_eq!(hits[0].code, "ApJ");
        assert_eq!(hits[0].score, 1.0);
    }

    #[test]
    fn short_queries_bypass_trigrams() {
        let idx = index();
        let hits = idx.lookup("JL", 0.5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].code, "JL");
        assert_eq!(hits[0].score, 1.0);
        // No fuzzy drift into longer names for short keys.
        assert!(idx.lookup("XQ", 0.5).is_empty());
    }

    #[test]
    fn fuzzy_lookup_tolerates_typos() {
        let idx = index();
        let hits = idx.lookup("Astrophysicl Journal", 0.5);
        assert_eq!(hits[0].code, "ApJ");
        assert!(hits[0].score > 0.9 && hits[0].score < 1.0);
    }

    #[test]
    fn fuzzy_lookup_ranks_closest_first() {
        let idx = index();
        let hits = idx.lookup("Astrophysical Journal Letter", 0.5);
        assert_eq!(hits[0].code, "ApJL");
    }

    #[test]
    fn many_to_many_codes() {
        let idx = index();
        assert_eq!(idx.names_for("ApJ").len(), 2);
        let hits = idx.lookup("AAS Meeting", 0.5);
        assert_eq!(hits[0].code, "AAS");
    }

    #[test]
    fn conference_flag_from_type_column() {
        let idx = index();
        assert!(idx.is_conference("AAS"));
        assert!(!idx.is_conference("ApJ"));
    }

    #[test]
    fn below_threshold_discarded() {
        let idx = index();
        assert!(idx.best_code("Journal of Irreproducible Results", 0.8).is_none());
    }

    #[test]
    fn blank_and_comment_lines_ignored() {
        let table = "# authority\n\nApJ\tAstrophysical Journal\n";
        let idx = FuzzyNameIndex::from_reader(Cursor::new(table)).unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn malformed_row_is_an_error() {
        let table = "ApJ\tx\ty\tz\n";
        assert!(matches!(
            FuzzyNameIndex::from_reader(Cursor::new(table)),
            Err(SourceMatchError::MalformedRow { line: 1, .. })
        ));
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_name("Mon. Not. R. Astron. Soc."), "mon not r astron soc");
        assert_eq!(normalize_name("  A&A  "), "a a");
    }
}

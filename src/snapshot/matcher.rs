//! Entity Matcher
//!
//! Resolves which files and findings in two snapshots are the same logical
//! entity. Exact matches come from stable keys; renamed files are only
//! ever reported as probable, with a confidence score, in a separate list.

use crate::snapshot::models::{FileRecord, FindingRecord};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Upper bound on unmatched base × target pairs scored by the rename pass
pub const MAX_RENAME_CANDIDATES: usize = 250_000;

/// Entities that carry a stable cross-snapshot key
pub trait StableKey {
    fn stable_key(&self) -> &str;
}

impl StableKey for FileRecord {
    fn stable_key(&self) -> &str {
        &self.path
    }
}

impl StableKey for FindingRecord {
    fn stable_key(&self) -> &str {
        self.id.as_str()
    }
}

/// Result of an exact key match, every list sorted by key
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedMatch<'a, T> {
    pub matched: Vec<(&'a T, &'a T)>,
    pub only_base: Vec<&'a T>,
    pub only_target: Vec<&'a T>,
}

/// A file that probably moved from `from` to `to`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbableRename {
    pub from: String,
    pub to: String,
    /// 0.0 - 1.0
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileMatches<'a> {
    pub exact: KeyedMatch<'a, FileRecord>,
    pub probable_renames: Vec<ProbableRename>,
}

/// Match two collections by stable key in linear time.
pub fn match_by_key<'a, T: StableKey>(base: &'a [T], target: &'a [T]) -> KeyedMatch<'a, T> {
    let target_index: HashMap<&str, &T> = target.iter().map(|t| (t.stable_key(), t)).collect();
    let base_keys: HashMap<&str, ()> = base.iter().map(|b| (b.stable_key(), ())).collect();

    let mut matched = Vec::new();
    let mut only_base = Vec::new();
    for item in base {
        match target_index.get(item.stable_key()) {
            Some(other) => matched.push((item, *other)),
            None => only_base.push(item),
        }
    }

    let mut only_target: Vec<&T> = target
        .iter()
        .filter(|t| !base_keys.contains_key(t.stable_key()))
        .collect();

    // Inputs are normally pre-sorted, which makes these sorts linear
    matched.sort_by(|a, b| a.0.stable_key().cmp(b.0.stable_key()));
    only_base.sort_by(|a, b| a.stable_key().cmp(b.stable_key()));
    only_target.sort_by(|a, b| a.stable_key().cmp(b.stable_key()));

    KeyedMatch {
        matched,
        only_base,
        only_target,
    }
}

/// The entity matcher
pub struct EntityMatcher {
    rename_threshold: f64,
}

impl EntityMatcher {
    pub fn new(rename_threshold: f64) -> Self {
        Self { rename_threshold }
    }

    pub fn match_findings<'a>(
        &self,
        base: &'a [FindingRecord],
        target: &'a [FindingRecord],
    ) -> KeyedMatch<'a, FindingRecord> {
        match_by_key(base, target)
    }

    pub fn match_files<'a>(&self, base: &'a [FileRecord], target: &'a [FileRecord]) -> FileMatches<'a> {
        let exact = match_by_key(base, target);
        let probable_renames = self.detect_renames(&exact.only_base, &exact.only_target);

        FileMatches {
            exact,
            probable_renames,
        }
    }

    /// Heuristic pass over files unmatched by path
    fn detect_renames(&self, only_base: &[&FileRecord], only_target: &[&FileRecord]) -> Vec<ProbableRename> {
        if only_base.is_empty() || only_target.is_empty() {
            return Vec::new();
        }

        let candidates = only_base.len().saturating_mul(only_target.len());
        if candidates > MAX_RENAME_CANDIDATES {
            warn!(
                "Skipping rename detection: {} candidate pairs exceeds {}",
                candidates, MAX_RENAME_CANDIDATES
            );
            return Vec::new();
        }

        let mut scored: Vec<(f64, &FileRecord, &FileRecord)> = Vec::new();
        for &from in only_base {
            for &to in only_target {
                let score = similarity(from, to);
                if score >= self.rename_threshold {
                    scored.push((score, from, to));
                }
            }
        }

        // Highest score first, ties broken by path so the result never
        // depends on iteration order
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.path.cmp(&b.1.path))
                .then_with(|| a.2.path.cmp(&b.2.path))
        });

        let mut used_from = HashSet::new();
        let mut used_to = HashSet::new();
        let mut renames = Vec::new();
        for (score, from, to) in scored {
            if used_from.contains(from.path.as_str()) || used_to.contains(to.path.as_str()) {
                continue;
            }
            used_from.insert(from.path.as_str());
            used_to.insert(to.path.as_str());
            renames.push(ProbableRename {
                from: from.path.clone(),
                to: to.path.clone(),
                confidence: (score * 1000.0).round() / 1000.0,
            });
        }

        renames.sort_by(|a, b| a.from.cmp(&b.from));
        debug!("Detected {} probable renames among {} candidate pairs", renames.len(), candidates);
        renames
    }
}

/// Structural similarity of two files, 0.0 - 1.0
pub fn similarity(a: &FileRecord, b: &FileRecord) -> f64 {
    let size = ratio(a.loc as f64, b.loc as f64);
    let complexity = ratio(a.complexity, b.complexity);
    let name = name_similarity(file_name(&a.path), file_name(&b.path));

    0.4 * size + 0.3 * complexity + 0.3 * name
}

fn ratio(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max <= 0.0 {
        return 1.0;
    }
    1.0 - (a - b).abs() / max
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn name_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::models::fixtures::*;
    use crate::snapshot::models::Severity;
    use pretty_assertions::assert_eq;

    fn paths<'a>(items: &[&'a FileRecord]) -> Vec<&'a str> {
        items.iter().map(|&f| f.path.as_str()).collect()
    }

    #[test]
    fn test_exact_match_by_path() {
        let a = snapshot(1, 0, 7.0, vec![file("x.py", 0.1, 10, 1.0), file("y.py", 0.1, 10, 1.0)], vec![]);
        let b = snapshot(2, 1, 7.0, vec![file("y.py", 0.3, 12, 1.0), file("z.py", 0.1, 10, 1.0)], vec![]);

        let result = EntityMatcher::new(0.85).match_files(&a.files, &b.files);
        assert_eq!(result.exact.matched.len(), 1);
        assert_eq!(result.exact.matched[0].0.path, "y.py");
        assert_eq!(paths(&result.exact.only_base), vec!["x.py"]);
        assert_eq!(paths(&result.exact.only_target), vec!["z.py"]);
    }

    #[test]
    fn test_rename_reported_separately() {
        let a = snapshot(1, 0, 7.0, vec![file("src/engine.py", 0.4, 400, 12.0)], vec![]);
        let b = snapshot(2, 1, 7.0, vec![file("core/engine.py", 0.4, 410, 12.0)], vec![]);

        let result = EntityMatcher::new(0.85).match_files(&a.files, &b.files);
        assert!(result.exact.matched.is_empty());
        assert_eq!(result.exact.only_base.len(), 1);
        assert_eq!(result.probable_renames.len(), 1);
        assert_eq!(result.probable_renames[0].from, "src/engine.py");
        assert_eq!(result.probable_renames[0].to, "core/engine.py");
        assert!(result.probable_renames[0].confidence > 0.9);
    }

    #[test]
    fn test_dissimilar_files_are_not_renames() {
        let a = snapshot(1, 0, 7.0, vec![file("a/parser.py", 0.4, 900, 40.0)], vec![]);
        let b = snapshot(2, 1, 7.0, vec![file("b/util.py", 0.1, 20, 1.0)], vec![]);

        let result = EntityMatcher::new(0.85).match_files(&a.files, &b.files);
        assert!(result.probable_renames.is_empty());
    }

    #[test]
    fn test_rename_ties_break_by_path() {
        // Two identical candidates for one target; the lexicographically
        // smaller base path wins
        let a = snapshot(
            1,
            0,
            7.0,
            vec![file("b/mod.py", 0.1, 100, 5.0), file("a/mod.py", 0.1, 100, 5.0)],
            vec![],
        );
        let b = snapshot(2, 1, 7.0, vec![file("c/mod.py", 0.1, 100, 5.0)], vec![]);

        let result = EntityMatcher::new(0.85).match_files(&a.files, &b.files);
        assert_eq!(result.probable_renames.len(), 1);
        assert_eq!(result.probable_renames[0].from, "a/mod.py");
    }

    #[test]
    fn test_matching_is_deterministic() {
        let files_a: Vec<_> = (0..40).map(|i| file(&format!("pkg/m{}.py", i), 0.1, 100 + i, 3.0)).collect();
        let files_b: Vec<_> = (20..60).map(|i| file(&format!("lib/m{}.py", i), 0.1, 100 + i, 3.0)).collect();
        let a = snapshot(1, 0, 7.0, files_a, vec![]);
        let b = snapshot(2, 1, 7.0, files_b, vec![]);

        let matcher = EntityMatcher::new(0.85);
        let first = matcher.match_files(&a.files, &b.files);
        for _ in 0..5 {
            assert_eq!(matcher.match_files(&a.files, &b.files), first);
        }
    }

    #[test]
    fn test_match_findings_by_derived_id() {
        let a = snapshot(1, 0, 7.0, vec![], vec![
            finding("a.py", "God File", Severity::High),
            finding("b.py", "God File", Severity::Low),
        ]);
        let b = snapshot(2, 1, 7.0, vec![], vec![
            finding("a.py", "God File", Severity::Critical),
            finding("c.py", "God File", Severity::Low),
        ]);

        let result = EntityMatcher::new(0.85).match_findings(&a.findings, &b.findings);
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.matched[0].0.path, "a.py");
        assert_eq!(result.only_base[0].path, "b.py");
        assert_eq!(result.only_target[0].path, "c.py");
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}

//! Language and library statistics extraction
//!
//! Each supported language is an [`Extractor`] variant: it tokenizes lines,
//! finds the libraries a file imports and decides which of them a given
//! line uses. [`extract`] runs the variants over a commit's diffs and folds
//! the per-file counts into one [`StatRecord`] per language and library.
//!
//! Per-file work runs in parallel; counts are merged by summation into
//! ordered maps, so the result does not depend on scheduling.

pub mod model;
pub mod python;
pub mod registry;

pub use model::LabelModel;
pub use python::PythonExtractor;
pub use registry::ExtractorRegistry;

use crate::models::{ContentSnapshot, FileDiff, StatKind, StatRecord};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Per-language tokenizer, import scanner and line classifier.
///
/// Implementations must be pure and safe to call from several threads.
pub trait Extractor: Send + Sync {
    /// Language identifier used in `Language` stat records
    fn language(&self) -> &str;

    /// File extensions (without the dot) routed to this variant
    fn extensions(&self) -> &[&str];

    /// Split a line into significant tokens
    fn tokenize(&self, line: &str) -> Vec<String> {
        split_tokens(line)
    }

    /// Libraries imported anywhere in `content`
    fn extract_imports(&self, content: &[String]) -> BTreeSet<String>;

    /// Subset of `file_libraries` used on a line with these tokens
    fn classify_line(&self, tokens: &[String], file_libraries: &BTreeSet<String>) -> BTreeSet<String>;
}

/// Split on whitespace and punctuation; drop tokens that are part of a
/// string literal.
pub fn split_tokens(line: &str) -> Vec<String> {
    line.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '"' || c == '\''))
        .filter(|t| !t.is_empty() && !t.contains('"') && !t.contains('\''))
        .map(str::to_string)
        .collect()
}

/// Counts contributed by one file
#[derive(Debug, Default)]
struct FileTally {
    language: Option<String>,
    added: usize,
    deleted: usize,
    before: BTreeMap<String, usize>,
    after: BTreeMap<String, usize>,
}

/// Count, per library, the lines of `content` classified as using it.
///
/// Every library in `libraries` gets an entry, even when no line uses it.
fn count_library_lines(
    extractor: &dyn Extractor,
    content: &ContentSnapshot,
    libraries: &BTreeSet<String>,
) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = libraries.iter().map(|l| (l.clone(), 0)).collect();
    if libraries.is_empty() {
        return counts;
    }
    for line in content.lines() {
        let tokens = extractor.tokenize(line);
        if tokens.is_empty() {
            continue;
        }
        for library in extractor.classify_line(&tokens, libraries) {
            // A line only counts toward libraries the file imports.
            if let Some(count) = counts.get_mut(&library) {
                *count += 1;
            }
        }
    }
    counts
}

fn tally_file(registry: &ExtractorRegistry, diff: &FileDiff) -> FileTally {
    let Some(extractor) = registry.extractor_for_path(&diff.path) else {
        return FileTally::default();
    };
    let extractor = extractor.as_ref();

    let before_libs = diff.before.imports_with(|c| extractor.extract_imports(c));
    let after_libs = diff.after.imports_with(|c| extractor.extract_imports(c));

    FileTally {
        language: Some(extractor.language().to_string()),
        added: diff.added_count(),
        deleted: diff.deleted_count(),
        before: count_library_lines(extractor, &diff.before, before_libs),
        after: count_library_lines(extractor, &diff.after, after_libs),
    }
}

/// Assign each diff its language from the registry; unknown extensions get `None`.
pub fn assign_languages(registry: &ExtractorRegistry, diffs: &mut [FileDiff]) {
    for diff in diffs.iter_mut() {
        diff.language = registry
            .extractor_for_path(&diff.path)
            .map(|e| e.language().to_string());
    }
}

/// Compute one commit's language and library statistics.
///
/// `Library` records take `lines_added` from the before-side line counts and
/// `lines_deleted` from the after-side counts. `Language` records count the
/// changed lines of each side in the usual direction.
pub fn extract(registry: &ExtractorRegistry, diffs: &mut [FileDiff]) -> Vec<StatRecord> {
    assign_languages(registry, diffs);

    let tallies: Vec<FileTally> = diffs
        .par_iter()
        .map(|diff| tally_file(registry, diff))
        .collect();

    let mut libraries: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    let mut languages: BTreeMap<String, (usize, usize)> = BTreeMap::new();

    for tally in tallies {
        let Some(language) = tally.language else {
            continue;
        };
        let entry = languages.entry(language).or_default();
        entry.0 += tally.added;
        entry.1 += tally.deleted;

        for (library, count) in tally.before {
            libraries.entry(library).or_default().0 += count;
        }
        for (library, count) in tally.after {
            libraries.entry(library).or_default().1 += count;
        }
    }

    let language_stats = languages
        .into_iter()
        .map(|(tech, (lines_added, lines_deleted))| StatRecord {
            kind: StatKind::Language,
            tech,
            lines_added,
            lines_deleted,
        });
    let library_stats = libraries
        .into_iter()
        .map(|(tech, (before, after))| StatRecord {
            kind: StatKind::Library,
            tech,
            lines_added: before,
            lines_deleted: after,
        });

    language_stats.chain(library_stats).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeKind, LineRange};
    use std::sync::Arc;

    /// Rule-based variant: a line uses a library when it names it.
    struct KeywordExtractor;

    impl Extractor for KeywordExtractor {
        fn language(&self) -> &str {
            "kw"
        }

        fn extensions(&self) -> &[&str] {
            &["kw"]
        }

        fn extract_imports(&self, content: &[String]) -> BTreeSet<String> {
            content
                .iter()
                .filter_map(|l| l.strip_prefix("use "))
                .map(|l| l.trim().to_string())
                .collect()
        }

        fn classify_line(&self, tokens: &[String], file_libraries: &BTreeSet<String>) -> BTreeSet<String> {
            if tokens.first().map(String::as_str) == Some("use") {
                return BTreeSet::new();
            }
            tokens
                .iter()
                .filter(|t| file_libraries.contains(*t))
                .cloned()
                .collect()
        }
    }

    fn registry() -> ExtractorRegistry {
        let mut registry = ExtractorRegistry::new();
        registry.register(Arc::new(KeywordExtractor));
        registry
    }

    fn snapshot(lines: &[&str], ranges: Vec<LineRange>) -> ContentSnapshot {
        ContentSnapshot::new(lines.iter().map(|s| s.to_string()).collect(), ranges)
    }

    fn diff(path: &str, kind: ChangeKind, before: ContentSnapshot, after: ContentSnapshot) -> FileDiff {
        FileDiff {
            path: path.into(),
            old_path: None,
            kind,
            language: None,
            before,
            after,
        }
    }

    fn find<'a>(stats: &'a [StatRecord], kind: StatKind, tech: &str) -> Option<&'a StatRecord> {
        stats.iter().find(|s| s.kind == kind && s.tech == tech)
    }

    #[test]
    fn test_split_tokens() {
        assert_eq!(split_tokens("r = requests.get(url)"), vec!["r", "requests", "get", "url"]);
        assert_eq!(split_tokens("x = \"a b\""), vec!["x"]);
        assert!(split_tokens("  ;;  ").is_empty());
    }

    #[test]
    fn test_libraries_sum_across_files() {
        let after = || snapshot(&["use json", "json a", "json b"], vec![LineRange::new(0, 3)]);
        let mut diffs = vec![
            diff("a.kw", ChangeKind::Add, ContentSnapshot::empty(), after()),
            diff("b.kw", ChangeKind::Add, ContentSnapshot::empty(), after()),
        ];
        let stats = extract(&registry(), &mut diffs);

        let libs: Vec<_> = stats.iter().filter(|s| s.kind == StatKind::Library).collect();
        assert_eq!(libs.len(), 1);
        assert_eq!(libs[0].tech, "json");
        assert_eq!(libs[0].lines_added, 0);
        assert_eq!(libs[0].lines_deleted, 4);

        let lang = find(&stats, StatKind::Language, "kw").expect("language record");
        assert_eq!((lang.lines_added, lang.lines_deleted), (6, 0));
    }

    #[test]
    fn test_one_sided_library_gets_zero_on_other_side() {
        let mut diffs = vec![diff(
            "a.kw",
            ChangeKind::Modify,
            snapshot(&["use os", "os x"], vec![LineRange::new(0, 2)]),
            snapshot(&["use re", "re y"], vec![LineRange::new(0, 2)]),
        )];
        let stats = extract(&registry(), &mut diffs);
        let os = find(&stats, StatKind::Library, "os").expect("os");
        assert_eq!((os.lines_added, os.lines_deleted), (1, 0));
        let re = find(&stats, StatKind::Library, "re").expect("re");
        assert_eq!((re.lines_added, re.lines_deleted), (0, 1));
    }

    #[test]
    fn test_unknown_extension_is_excluded() {
        let mut diffs = vec![diff(
            "notes.txt",
            ChangeKind::Add,
            ContentSnapshot::empty(),
            snapshot(&["use json", "json"], vec![LineRange::new(0, 2)]),
        )];
        let stats = extract(&registry(), &mut diffs);
        assert!(stats.is_empty());
        assert_eq!(diffs[0].language, None);
    }

    #[test]
    fn test_extraction_is_repeatable() {
        let make = || {
            vec![
                diff("a.kw", ChangeKind::Add, ContentSnapshot::empty(), snapshot(&["use a", "a"], vec![LineRange::new(0, 2)])),
                diff("b.kw", ChangeKind::Add, ContentSnapshot::empty(), snapshot(&["use b", "b a"], vec![LineRange::new(1, 2)])),
            ]
        };
        let first = extract(&registry(), &mut make());
        let mut reversed = make();
        reversed.reverse();
        let second = extract(&registry(), &mut reversed);
        assert_eq!(first, second);
    }

    #[test]
    fn test_library_records_never_appear_without_imports() {
        let mut diffs = vec![diff(
            "a.kw",
            ChangeKind::Add,
            ContentSnapshot::empty(),
            snapshot(&["json everywhere"], vec![LineRange::new(0, 1)]),
        )];
        let stats = extract(&registry(), &mut diffs);
        assert!(stats.iter().all(|s| s.kind == StatKind::Language));
    }
}

//! The staged replacement pipeline.
//!
//! A file's content flows through an ordered list of [`Stage`]s that share a
//! [`ProcessContext`]. The default pipeline validates the input, detects
//! every occurrence for reporting, applies the substitutions and finally
//! checks the output for accidental data loss. The engine never touches the
//! filesystem; callers decide what to do with the returned [`Transform`].
//!
//! All matching is literal and byte-oriented. Case-insensitive mode folds
//! ASCII letters only, which keeps byte offsets identical between the folded
//! and the original text.

use crate::config::EngineOptions;
use crate::errors::Error;
use crate::mapping::{Rule, RuleTable};
use memchr::memmem::Finder;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One matched instance of a rule inside a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub from: String,
    pub to: String,
    /// 1-based line number.
    pub line: usize,
    /// 1-based byte column within the line.
    pub column: usize,
    #[serde(default)]
    pub line_text: String,
    #[serde(default)]
    pub byte_offset: u64,
    /// Whole-file content after substitution, shared by every occurrence of
    /// the same file. Only set when the apply stage ran.
    #[serde(skip)]
    pub new_text: Option<Arc<str>>,
}

/// The per-file result of running the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub occurrences: Vec<Occurrence>,
    pub modified: bool,
    pub original_size: u64,
    pub new_size: u64,
}

/// Mutable state threaded through the pipeline stages.
pub struct ProcessContext<'a> {
    pub options: EngineOptions,
    pub path: &'a Path,
    pub content: Cow<'a, [u8]>,
    pub rules: &'a RuleTable,
    pub outcome: FileOutcome,
    /// Setting an error short-circuits the remaining stages.
    pub error: Option<Error>,
    halted: bool,
}

impl ProcessContext<'_> {
    /// Ends the pipeline early without an error.
    pub fn halt(&mut self) {
        self.halted = true;
    }
}

/// A single pipeline step.
pub type Stage = fn(&mut ProcessContext<'_>);

/// What the pipeline produced for one file.
#[derive(Debug)]
pub struct Transform<'a> {
    pub outcome: FileOutcome,
    /// The substituted content when the file was modified and the apply stage
    /// ran, otherwise the original bytes.
    pub content: Cow<'a, [u8]>,
    pub error: Option<Error>,
}

/// Orchestrates replacement through an ordered list of stages.
#[derive(Clone)]
pub struct Engine {
    options: EngineOptions,
    stages: Vec<Stage>,
}

impl Engine {
    /// Creates an engine with the standard pipeline.
    pub fn new(options: EngineOptions) -> Self {
        let mut engine = Self {
            options,
            stages: Vec::new(),
        };
        engine.use_stage(validate_input);
        engine.use_stage(detect_occurrences);
        engine.use_stage(apply_substitutions);
        engine.use_stage(validate_output);
        engine
    }

    /// Appends a stage to the end of the pipeline.
    pub fn use_stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Runs every stage over `content`.
    pub fn process<'a>(&self, path: &'a Path, content: &'a [u8], rules: &'a RuleTable) -> Transform<'a> {
        let mut ctx = ProcessContext {
            options: self.options,
            path,
            content: Cow::Borrowed(content),
            rules,
            outcome: FileOutcome {
                path: path.to_path_buf(),
                original_size: content.len() as u64,
                new_size: content.len() as u64,
                ..FileOutcome::default()
            },
            error: None,
            halted: false,
        };

        for stage in &self.stages {
            stage(&mut ctx);
            if ctx.error.is_some() {
                ctx.outcome.modified = false;
                break;
            }
            if ctx.halted {
                break;
            }
        }

        Transform {
            outcome: ctx.outcome,
            content: ctx.content,
            error: ctx.error,
        }
    }
}

fn validate_input(ctx: &mut ProcessContext<'_>) {
    if ctx.content.is_empty() || ctx.rules.is_empty() {
        ctx.outcome.modified = false;
        ctx.halt();
    }
}

fn detect_occurrences(ctx: &mut ProcessContext<'_>) {
    let case_sensitive = ctx.options.case_sensitive;
    let finders: Vec<(&Rule, Finder<'static>)> = ctx
        .rules
        .sorted()
        .iter()
        .filter(|rule| !rule.from.is_empty())
        .map(|rule| (rule, Finder::new(&fold(rule.from.as_bytes(), case_sensitive)).into_owned()))
        .collect();

    let mut occurrences = Vec::new();
    let mut byte_offset = 0u64;

    for (idx, raw_line) in ctx.content.split(|&b| b == b'\n').enumerate() {
        let line = raw_line.strip_suffix(b"\r").unwrap_or(raw_line);
        let haystack = fold(line, case_sensitive);

        for (rule, finder) in &finders {
            for pos in finder.find_iter(&haystack) {
                occurrences.push(Occurrence {
                    from: rule.from.clone(),
                    to: rule.to.clone(),
                    line: idx + 1,
                    column: pos + 1,
                    line_text: String::from_utf8_lossy(line).into_owned(),
                    byte_offset: byte_offset + pos as u64,
                    new_text: None,
                });
            }
        }

        byte_offset += raw_line.len() as u64 + 1;
    }

    log::debug!("{}: {} occurrences", ctx.path.display(), occurrences.len());
    ctx.outcome.modified = !occurrences.is_empty();
    ctx.outcome.occurrences = occurrences;
}

fn apply_substitutions(ctx: &mut ProcessContext<'_>) {
    if !ctx.outcome.modified || ctx.options.dry_run {
        return;
    }

    let updated = substitute_rules(&ctx.content, ctx.rules, ctx.options.case_sensitive).into_owned();
    let shared: Arc<str> = Arc::from(String::from_utf8_lossy(&updated));
    for occurrence in &mut ctx.outcome.occurrences {
        occurrence.new_text = Some(Arc::clone(&shared));
    }

    ctx.outcome.new_size = updated.len() as u64;
    ctx.content = Cow::Owned(updated);
}

fn validate_output(ctx: &mut ProcessContext<'_>) {
    if ctx.outcome.modified
        && !ctx.options.dry_run
        && ctx.content.is_empty()
        && ctx.outcome.original_size > 0
    {
        log::warn!(
            "{}: substitution emptied the file, leaving it unmodified",
            ctx.path.display()
        );
        ctx.outcome.modified = false;
    }
}

/// Applies every rule of the table, longest pattern first, to `content`.
///
/// Each rule is a global replace-all over the result of the previous rule.
/// This is the only substitution routine; both the preview and the on-disk
/// write go through it.
pub fn substitute_rules<'a>(content: &'a [u8], rules: &RuleTable, case_sensitive: bool) -> Cow<'a, [u8]> {
    let mut current = Cow::Borrowed(content);
    for rule in rules.sorted() {
        if let Some(next) = replace_all(&current, rule.from.as_bytes(), rule.to.as_bytes(), case_sensitive) {
            current = Cow::Owned(next);
        }
    }
    current
}

/// Replaces every non-overlapping occurrence of `from` in `content` with `to`.
///
/// Returns `None` when nothing matched. Matching runs over the input only and
/// the scan resumes after each matched region, so text introduced by `to` is
/// never matched again.
pub fn replace_all(content: &[u8], from: &[u8], to: &[u8], case_sensitive: bool) -> Option<Vec<u8>> {
    if from.is_empty() {
        return None;
    }

    let haystack = fold(content, case_sensitive);
    let needle = fold(from, case_sensitive);
    let finder = Finder::new(&needle);

    let mut out: Option<Vec<u8>> = None;
    let mut last = 0;
    for idx in finder.find_iter(&haystack) {
        let buf = out.get_or_insert_with(|| Vec::with_capacity(content.len()));
        buf.extend_from_slice(&content[last..idx]);
        buf.extend_from_slice(to);
        last = idx + from.len();
    }

    let mut buf = out?;
    buf.extend_from_slice(&content[last..]);
    Some(buf)
}

/// ASCII-lowercases `bytes` unless matching is case-sensitive.
fn fold(bytes: &[u8], case_sensitive: bool) -> Cow<'_, [u8]> {
    if case_sensitive {
        Cow::Borrowed(bytes)
    } else {
        Cow::Owned(bytes.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, &str)]) -> RuleTable {
        RuleTable::new(pairs.iter().map(|(f, t)| Rule::new(*f, *t)).collect())
    }

    fn sensitive() -> Engine {
        Engine::new(EngineOptions {
            case_sensitive: true,
            dry_run: false,
        })
    }

    fn insensitive() -> Engine {
        Engine::new(EngineOptions {
            case_sensitive: false,
            dry_run: false,
        })
    }

    #[test]
    fn detects_and_applies_repeated_pattern() {
        let rules = table(&[("foo", "bar")]);
        let t = sensitive().process(Path::new("a.txt"), b"foo foo foo", &rules);

        let columns: Vec<usize> = t.outcome.occurrences.iter().map(|o| o.column).collect();
        assert_eq!(columns, vec![1, 5, 9]);
        assert!(t.outcome.modified);
        assert_eq!(t.content.as_ref(), b"bar bar bar");
        assert_eq!(t.outcome.new_size, 11);
        let new_text = t.outcome.occurrences[0].new_text.as_deref();
        assert_eq!(new_text, Some("bar bar bar"));
        assert!(Arc::ptr_eq(
            t.outcome.occurrences[0].new_text.as_ref().unwrap(),
            t.outcome.occurrences[2].new_text.as_ref().unwrap()
        ));
    }

    #[test]
    fn longer_rules_win() {
        let rules = table(&[("a", "Z"), ("ab", "XY")]);
        let t = sensitive().process(Path::new("a.txt"), b"ab a", &rules);
        assert_eq!(t.content.as_ref(), b"XY Z");
    }

    #[test]
    fn occurrences_are_grouped_by_line_then_rule() {
        let rules = table(&[("b", "2"), ("aa", "1")]);
        let content = b"b aa b\naa";
        let t = sensitive().process(Path::new("a.txt"), content, &rules);

        let seen: Vec<(&str, usize, usize, u64)> = t
            .outcome
            .occurrences
            .iter()
            .map(|o| (o.from.as_str(), o.line, o.column, o.byte_offset))
            .collect();
        assert_eq!(
            seen,
            vec![("aa", 1, 3, 2), ("b", 1, 1, 0), ("b", 1, 6, 5), ("aa", 2, 1, 7)]
        );
        assert_eq!(t.outcome.occurrences[3].line_text, "aa");
    }

    #[test]
    fn crlf_lines_keep_true_byte_offsets() {
        let rules = table(&[("x", "y")]);
        let t = sensitive().process(Path::new("a.txt"), b"ab\r\nx", &rules);
        let occ = &t.outcome.occurrences[0];
        assert_eq!((occ.line, occ.column, occ.byte_offset), (2, 1, 4));
        assert_eq!(occ.line_text, "x");
    }

    #[test]
    fn case_insensitive_matching_preserves_surroundings() {
        let rules = table(&[("hello", "bye")]);
        let t = insensitive().process(Path::new("a.txt"), b"Hello HELLO hello!", &rules);
        assert_eq!(t.outcome.occurrences.len(), 3);
        assert_eq!(t.content.as_ref(), b"bye bye bye!");

        let t = sensitive().process(Path::new("a.txt"), b"Hello HELLO hello!", &rules);
        assert_eq!(t.outcome.occurrences.len(), 1);
        assert_eq!(t.content.as_ref(), b"Hello HELLO bye!");
    }

    #[test]
    fn replacement_text_is_never_rematched() {
        assert_eq!(replace_all(b"aaaa", b"aa", b"aaa", false).unwrap(), b"aaaaaa");
        assert_eq!(replace_all(b"AaAa", b"aa", b"aaa", false).unwrap(), b"aaaaaa");
        assert_eq!(replace_all(b"x", b"x", b"xx", true).unwrap(), b"xx");
        assert_eq!(replace_all(b"abc", b"z", b"y", true), None);
        assert_eq!(replace_all(b"abc", b"", b"y", true), None);
    }

    #[test]
    fn empty_inputs_are_not_modified() {
        let rules = table(&[("a", "b")]);
        let t = sensitive().process(Path::new("a.txt"), b"", &rules);
        assert!(!t.outcome.modified);
        assert!(t.error.is_none());

        let empty = RuleTable::default();
        let t = sensitive().process(Path::new("a.txt"), b"aaa", &empty);
        assert!(!t.outcome.modified);
        assert!(t.outcome.occurrences.is_empty());
    }

    #[test]
    fn dry_run_detects_without_applying() {
        let engine = Engine::new(EngineOptions {
            case_sensitive: true,
            dry_run: true,
        });
        let rules = table(&[("foo", "bar")]);
        let t = engine.process(Path::new("a.txt"), b"foo", &rules);
        assert!(t.outcome.modified);
        assert_eq!(t.content.as_ref(), b"foo");
        assert!(t.outcome.occurrences[0].new_text.is_none());
    }

    #[test]
    fn emptied_output_is_demoted() {
        let rules = table(&[("gone", "")]);
        let t = sensitive().process(Path::new("a.txt"), b"gone", &rules);
        assert!(!t.outcome.modified);
        assert_eq!(t.outcome.occurrences.len(), 1);
    }

    #[test]
    fn stage_error_short_circuits() {
        fn fail(ctx: &mut ProcessContext<'_>) {
            ctx.error = Some(Error::replacement(ctx.path, "refused"));
        }
        let mut engine = Engine::new(EngineOptions {
            case_sensitive: true,
            dry_run: false,
        });
        engine.stages.insert(2, fail);
        let rules = table(&[("foo", "bar")]);
        let t = engine.process(Path::new("a.txt"), b"foo", &rules);
        assert!(!t.outcome.modified);
        assert!(t.error.is_some());
        assert_eq!(t.content.as_ref(), b"foo");
    }

    #[test]
    fn detection_agrees_with_substitution() {
        let rules = table(&[("cat", "dog"), ("at", "AT"), ("c", "k")]);
        let samples: [&[u8]; 5] = [b"cat", b"the hat", b"xyz", b"catalog\nact", b"\n\n"];
        for sample in samples {
            let t = sensitive().process(Path::new("a.txt"), sample, &rules);
            let changed = substitute_rules(sample, &rules, true).as_ref() != sample;
            assert_eq!(t.outcome.modified, changed, "sample {:?}", String::from_utf8_lossy(sample));
        }
    }

    #[test]
    fn non_utf8_content_is_handled_bytewise() {
        let rules = table(&[("ab", "cd")]);
        let content = [0xff, b'a', b'b', 0xfe];
        let t = sensitive().process(Path::new("bin"), &content, &rules);
        assert_eq!(t.content.as_ref(), &[0xff, b'c', b'd', 0xfe]);
        assert_eq!(t.outcome.occurrences[0].column, 2);
    }
}

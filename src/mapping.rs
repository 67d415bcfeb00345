use crate::config::MappingFormat;
use crate::errors::{file_error, Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A single literal substitution: every `from` becomes `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "old")]
    pub from: String,
    #[serde(rename = "new", default)]
    pub to: String,
}

impl Rule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// An immutable set of rules plus a view ordered for matching.
///
/// The sorted view puts longer `from` patterns first so that a short rule
/// never consumes text a longer, more specific rule was meant to match.
/// Equal lengths keep their original relative order.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
    sorted: Vec<Rule>,
}

impl RuleTable {
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut sorted = rules.clone();
        // `sort_by_key` is stable.
        sorted.sort_by_key(|r| std::cmp::Reverse(r.from.len()));
        Self { rules, sorted }
    }

    /// Rules in the order they were given.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules ordered by descending `from` length.
    pub fn sorted(&self) -> &[Rule] {
        &self.sorted
    }

    pub fn size(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Loads a rule table from a mapping file in the given format.
pub fn load_rule_table(path: &Path, format: MappingFormat) -> Result<RuleTable> {
    let content = fs::read_to_string(path).map_err(|e| file_error(path, e))?;
    let rules = match format {
        MappingFormat::Csv => parse_csv_rules(&content, path)?,
        MappingFormat::Json => {
            let raw: Vec<Rule> = serde_json::from_str(&content)
                .map_err(|e| Error::parsing(path, "failed to parse JSON").with_source(e))?;
            clean_rules(raw, path)?
        }
        MappingFormat::Yaml => {
            let raw: Vec<Rule> = serde_yaml::from_str(&content)
                .map_err(|e| Error::parsing(path, "failed to parse YAML").with_source(e))?;
            clean_rules(raw, path)?
        }
    };

    log::debug!("Loaded {} rules from {}", rules.len(), path.display());
    Ok(RuleTable::new(rules))
}

/// Trims rule text and drops rules with an empty pattern.
fn clean_rules(raw: Vec<Rule>, path: &Path) -> Result<Vec<Rule>> {
    if raw.is_empty() {
        return Err(Error::parsing(path, "no mappings found"));
    }
    let rules: Vec<Rule> = raw
        .into_iter()
        .map(|r| Rule::new(r.from.trim(), r.to.trim()))
        .filter(|r| !r.from.is_empty())
        .collect();
    if rules.is_empty() {
        return Err(Error::parsing(path, "no valid mappings found"));
    }
    Ok(rules)
}

/// Blanks out lines that are empty or start with `#` once trimmed.
///
/// The csv reader only honours a comment marker in the first column and
/// treats a whitespace-only line as a record. Blanked lines are skipped by
/// the reader while record positions still match the source lines.
pub(crate) fn strip_csv_noise(content: &str) -> String {
    content
        .split('\n')
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') { "" } else { line }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_csv_rules(content: &str, path: &Path) -> Result<Vec<Rule>> {
    let content = strip_csv_noise(content);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let records = reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::parsing(path, "failed to parse CSV").with_source(e))?;

    // Blank lines never reach us; the csv reader skips them.
    if records.is_empty() {
        return Err(Error::parsing(path, "CSV file contains no data"));
    }

    let start = usize::from(is_header_row(&records[0]));
    let mut rules = Vec::new();
    for (i, record) in records.iter().enumerate().skip(start) {
        if record.len() < 2 {
            let row = record.position().map_or(i as u64 + 1, |p| p.line());
            return Err(Error::parsing(
                path,
                format!("invalid CSV row {row}: expected 2 columns"),
            ));
        }
        if record[0].is_empty() {
            continue;
        }
        rules.push(Rule::new(&record[0], &record[1]));
    }

    if rules.is_empty() {
        return Err(Error::parsing(path, "no valid mappings found in CSV"));
    }
    Ok(rules)
}

fn is_header_row(row: &csv::StringRecord) -> bool {
    if row.len() < 2 {
        return false;
    }
    let is = |idx: usize, names: &[&str]| names.iter().any(|n| row[idx].eq_ignore_ascii_case(n));
    is(0, &["old", "source"]) || is(1, &["new", "destination"])
}

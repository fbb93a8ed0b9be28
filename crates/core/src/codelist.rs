//! Codelist grouping and code-literal extraction.
//!
//! Steps of a generated definition are clustered into clinical-condition
//! groups by the hyphen-delimited token prefixes their names share. Each
//! group becomes one `code,system` CSV under the published repository's
//! `source/` directory, built from the code literals found in the steps'
//! implementation sources.
//!
//! Extraction is pluggable per implementation language through
//! [`CodeExtractor`]; [`ArrayLiteralExtractor`] handles the
//! `codes = [...]` family of literals emitted by the generator templates.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Header line of every generated codelist CSV.
pub const CODELIST_HEADER: &str = "code,system";

/// Suffix tag for exclusion code lists.
const EXCLUDE_TAG: &str = "exclude";

static TIME_WINDOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d*-to-\d*-days-after-[A-Za-z0-9]*").expect("valid regex")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A single clinical code and the coding system it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRecord {
    pub code: String,
    pub system: String,
}

impl CodeRecord {
    /// Render as one CSV row.
    pub fn csv_row(&self) -> String {
        format!("{},{}", self.code, self.system)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodelistError {
    #[error("Malformed code list literal: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Recovers structured code records from a step's implementation source.
pub trait CodeExtractor: Send + Sync {
    /// Returns `Ok(None)` when the source carries no recognised literal.
    fn extract(&self, source: &str) -> Result<Option<Vec<CodeRecord>>, CodelistError>;
}

// ---------------------------------------------------------------------------
// Array literal extractor
// ---------------------------------------------------------------------------

/// Extracts `codes = [...]`, `codes_exclude = [...]` and `codes_after = [...]`
/// literals, in that order of preference, parsing the bracket body as a
/// JSON array of `{code, system}` objects.
pub struct ArrayLiteralExtractor {
    patterns: Vec<Regex>,
}

impl ArrayLiteralExtractor {
    /// Build an extractor for the given literal variable names.
    pub fn for_variables(variables: &[&str]) -> Self {
        let patterns = variables
            .iter()
            .map(|v| {
                Regex::new(&format!(r"{} = \[(.*)\]", regex::escape(v))).expect("valid regex")
            })
            .collect();
        Self { patterns }
    }
}

impl Default for ArrayLiteralExtractor {
    fn default() -> Self {
        Self::for_variables(&["codes", "codes_exclude", "codes_after"])
    }
}

/// Raw literal entry; generated sources sometimes carry numeric codes.
#[derive(Deserialize)]
struct RawCode {
    code: serde_json::Value,
    system: serde_json::Value,
}

fn value_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

impl CodeExtractor for ArrayLiteralExtractor {
    fn extract(&self, source: &str) -> Result<Option<Vec<CodeRecord>>, CodelistError> {
        let Some(body) = self
            .patterns
            .iter()
            .find_map(|p| p.captures(source).and_then(|c| c.get(1)))
        else {
            return Ok(None);
        };

        let raw: Vec<RawCode> = serde_json::from_str(&format!("[{}]", body.as_str()))?;
        Ok(Some(
            raw.into_iter()
                .map(|r| CodeRecord {
                    code: value_text(r.code),
                    system: value_text(r.system),
                })
                .collect(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Code extractors keyed by implementation language.
pub struct ExtractorRegistry {
    by_language: HashMap<String, Arc<dyn CodeExtractor>>,
    fallback: Arc<dyn CodeExtractor>,
}

impl ExtractorRegistry {
    /// A registry that uses `fallback` for every unregistered language.
    pub fn new(fallback: Arc<dyn CodeExtractor>) -> Self {
        Self {
            by_language: HashMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, language: &str, extractor: Arc<dyn CodeExtractor>) {
        self.by_language.insert(language.to_string(), extractor);
    }

    /// The extractor for `language`, or the fallback.
    pub fn for_language(&self, language: Option<&str>) -> &dyn CodeExtractor {
        language
            .and_then(|l| self.by_language.get(l))
            .unwrap_or(&self.fallback)
            .as_ref()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let literal: Arc<dyn CodeExtractor> = Arc::new(ArrayLiteralExtractor::default());
        let mut registry = Self::new(Arc::clone(&literal));
        registry.register("python", Arc::clone(&literal));
        registry.register("js", literal);
        registry
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// A step as seen by the grouper.
#[derive(Debug, Clone, Copy)]
pub struct CodelistStep<'a> {
    pub name: &'a str,
    pub language: Option<&'a str>,
    /// Implementation source text, when the step has one.
    pub source: Option<&'a str>,
}

/// Longest shared hyphen-delimited token prefix of two step names.
///
/// Trailing empty tokens (from `---` separators) are dropped.
pub fn shared_prefix(a: &str, b: &str) -> String {
    let mut tokens: Vec<&str> = a
        .split('-')
        .zip(b.split('-'))
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect();
    while tokens.last().is_some_and(|t| t.is_empty()) {
        tokens.pop();
    }
    tokens.join("-")
}

/// Whether `prefix` is a whole-token prefix of `name`.
fn is_token_prefix(prefix: &str, name: &str) -> bool {
    name == prefix
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('-'))
}

/// Distinct non-empty shared prefixes over every pair of distinct steps,
/// in first-seen order.
pub fn condition_identifiers(names: &[&str]) -> Vec<String> {
    let mut conditions: Vec<String> = Vec::new();
    for (i, a) in names.iter().enumerate() {
        for (j, b) in names.iter().enumerate() {
            if i == j {
                continue;
            }
            let prefix = shared_prefix(a, b);
            if !prefix.is_empty() && !conditions.contains(&prefix) {
                conditions.push(prefix);
            }
        }
    }
    conditions
}

fn longest<'c>(candidates: impl Iterator<Item = &'c String>) -> Option<&'c String> {
    candidates.max_by_key(|c| c.len())
}

/// The condition group a step name belongs to, including its
/// `-exclude` and time-window sub-group tags.
pub fn group_id(name: &str, conditions: &[String]) -> String {
    let head = name.split("---").next().unwrap_or(name);

    let base = longest(conditions.iter().filter(|c| is_token_prefix(c, name)))
        .or_else(|| {
            longest(
                conditions
                    .iter()
                    .filter(|c| is_token_prefix(c, head) || head.ends_with(c.as_str())),
            )
        })
        .or_else(|| conditions.iter().find(|c| c.contains(head)))
        .map(String::as_str)
        .unwrap_or(head);

    let mut group = base.to_string();
    if name.contains(EXCLUDE_TAG) && !group.contains(EXCLUDE_TAG) {
        group.push('-');
        group.push_str(EXCLUDE_TAG);
    }
    if let Some(window) = TIME_WINDOW.find(name) {
        if !group.contains(window.as_str()) {
            group.push('-');
            group.push_str(window.as_str());
        }
    }
    group
}

/// Group the steps of a definition and build one CSV per group.
///
/// The first and last steps (connector and final output) are excluded.
/// Steps without a source, or whose source carries no recognised literal,
/// contribute no rows.
pub fn build_codelists(
    steps: &[CodelistStep<'_>],
    registry: &ExtractorRegistry,
) -> BTreeMap<String, String> {
    if steps.len() < 3 {
        return BTreeMap::new();
    }
    let inner = &steps[1..steps.len() - 1];
    let names: Vec<&str> = inner.iter().map(|s| s.name).collect();
    let conditions = condition_identifiers(&names);

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for step in inner {
        let rows = grouped.entry(group_id(step.name, &conditions)).or_default();
        let Some(source) = step.source else {
            continue;
        };
        match registry.for_language(step.language).extract(source) {
            Ok(Some(records)) => rows.extend(records.iter().map(CodeRecord::csv_row)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(step = step.name, error = %e, "Skipping unparseable code list");
            }
        }
    }

    grouped
        .into_iter()
        .map(|(group, rows)| {
            let mut csv = String::from(CODELIST_HEADER);
            csv.push('\n');
            csv.push_str(&rows.join("\n"));
            (group, csv)
        })
        .collect()
}

//! Workflow descriptor normalization and cross-reference rewriting.
//!
//! Nested-workflow detection compares a parent's nested step descriptor
//! with a sibling's top-level descriptor. Both are YAML documents whose
//! only expected difference is the identifier of the terminal output, so
//! they are compared after that identifier is erased.

use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Mapping, Value};

static OUTPUT_ID_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"outputs:\s*\w*:\s*id:\s*\w*").expect("valid regex"));

const TERMINAL_CASES_OUTPUT: &str = "outputs:\n  cases:\n    id: cases";
const TERMINAL_COMPOSED_OUTPUT: &str = "outputs:\n  output:\n    id: output";

/// A descriptor reduced to the form used for equality checks.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedDescriptor {
    /// Parsed YAML with output identifiers erased.
    Structural(Value),
    /// Text with newlines removed and the first output identifier run stripped.
    Textual(String),
}

/// Normalize a descriptor, preferring the structural form.
pub fn normalize(descriptor: &str) -> NormalizedDescriptor {
    match serde_yaml::from_str::<Value>(descriptor) {
        Ok(value) => NormalizedDescriptor::Structural(erase_output_ids(value)),
        Err(e) => {
            tracing::debug!(error = %e, "Descriptor is not valid YAML, using textual form");
            NormalizedDescriptor::Textual(normalize_text(descriptor))
        }
    }
}

/// Textual normalization used when a descriptor cannot be parsed.
pub fn normalize_text(descriptor: &str) -> String {
    let flat = descriptor.replace('\n', "");
    OUTPUT_ID_RUN.replace(&flat, "").into_owned()
}

/// Whether two descriptors are equal once output identifiers are erased.
///
/// When either side fails to parse, both sides are compared textually.
pub fn descriptors_match(a: &str, b: &str) -> bool {
    match (normalize(a), normalize(b)) {
        (NormalizedDescriptor::Structural(x), NormalizedDescriptor::Structural(y)) => x == y,
        _ => normalize_text(a) == normalize_text(b),
    }
}

fn erase_output_ids(value: Value) -> Value {
    let Value::Mapping(mut root) = value else {
        return value;
    };
    let outputs_key = Value::String("outputs".to_string());
    match root.remove(&outputs_key) {
        Some(Value::Mapping(outputs)) => {
            let mut renamed = Mapping::new();
            for (idx, (_, mut output)) in outputs.into_iter().enumerate() {
                if let Value::Mapping(fields) = &mut output {
                    fields.remove("id");
                }
                renamed.insert(Value::String(format!("output{idx}")), output);
            }
            root.insert(outputs_key, Value::Mapping(renamed));
        }
        Some(other) => {
            root.insert(outputs_key, other);
        }
        None => {}
    }
    Value::Mapping(root)
}

// ---------------------------------------------------------------------------
// Rewrites applied when a nested workflow is detected
// ---------------------------------------------------------------------------

/// Point a parent's reference to a nested step at the child's repository
/// subdirectory.
///
/// Only the first `<step_name>.cwl` occurrence is replaced.
pub fn rewrite_parent_descriptor(
    descriptor: &str,
    step_name: &str,
    child_repository: &str,
    child_name: &str,
) -> String {
    descriptor.replacen(
        &format!("{step_name}.cwl"),
        &format!("{child_repository}/{child_name}.cwl"),
        1,
    )
}

/// Point the implementation-unit inputs of the nested step at the child's
/// repository subdirectory.
///
/// `step_number` is the 1-based index of the nested step in the parent's
/// rendered step list.
pub fn rewrite_parent_inputs(inputs: &str, step_number: usize, child_repository: &str) -> String {
    let pattern = format!(r"inputModule{step_number}(-[0-9]*)?:\n  class: File\n  path: ");
    let Ok(re) = Regex::new(&pattern) else {
        return inputs.to_string();
    };
    re.replace_all(inputs, |caps: &regex::Captures<'_>| {
        format!("{}{child_repository}/", &caps[0])
    })
    .into_owned()
}

/// Re-route a child's terminal `cases` output so it composes into the
/// parent's output.
pub fn reroute_terminal_output(descriptor: &str) -> String {
    descriptor.replacen(TERMINAL_CASES_OUTPUT, TERMINAL_COMPOSED_OUTPUT, 1)
}

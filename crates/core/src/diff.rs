//! Change detection between an incoming definition and its persisted form.
//!
//! Detection runs in two phases so that implementation files are only read
//! when the structure already matches:
//!
//! 1. [`compare_structure`] compares step counts, per-step fields, and
//!    implementation metadata, returning either a [`ChangeReason`] or the
//!    list of [`ContentCheck`]s still to perform.
//! 2. The caller reads the stored bytes for each check and passes them to
//!    [`ContentCheck::compare`].

use serde::Serialize;

use crate::definition::{GeneratedStep, StoredStep};

/// Which per-step field differed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepField {
    Name,
    Doc,
    Type,
    InputDoc,
    OutputDoc,
    OutputExtension,
}

impl StepField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Doc => "doc",
            Self::Type => "type",
            Self::InputDoc => "input_doc",
            Self::OutputDoc => "output_doc",
            Self::OutputExtension => "output_extension",
        }
    }
}

impl std::fmt::Display for StepField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first mismatch found between incoming and stored definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeReason {
    StepCount { stored: usize, incoming: usize },
    StepField { position: i32, field: StepField },
    MissingImplementation { step: String, file_name: String },
    LanguageChanged { step: String, file_name: String },
    ContentChanged { step: String, file_name: String },
}

impl std::fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepCount { stored, incoming } => {
                write!(f, "step count changed from {stored} to {incoming}")
            }
            Self::StepField { position, field } => {
                write!(f, "step at position {position}: {field} changed")
            }
            Self::MissingImplementation { step, file_name } => {
                write!(f, "step {step}: implementation {file_name} is new")
            }
            Self::LanguageChanged { step, file_name } => {
                write!(f, "step {step}: language of {file_name} changed")
            }
            Self::ContentChanged { step, file_name } => {
                write!(f, "step {step}: content of {file_name} changed")
            }
        }
    }
}

/// Outcome of comparing an incoming definition with its stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionDiff {
    Unchanged,
    Changed(ChangeReason),
}

impl DefinitionDiff {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed(_))
    }
}

/// A stored implementation whose bytes must be compared with the incoming
/// source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentCheck<'a> {
    pub step: &'a str,
    pub language: &'a str,
    pub file_name: &'a str,
    pub incoming: &'a str,
}

impl ContentCheck<'_> {
    /// Compare stored bytes with the incoming source.
    pub fn compare(&self, stored: &[u8]) -> Option<ChangeReason> {
        (stored != self.incoming.as_bytes()).then(|| ChangeReason::ContentChanged {
            step: self.step.to_string(),
            file_name: self.file_name.to_string(),
        })
    }
}

/// Result of the structural phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralDiff<'a> {
    Changed(ChangeReason),
    /// Structure matches; these implementation contents remain to be compared.
    NeedsContentCheck(Vec<ContentCheck<'a>>),
}

/// Compare step structure and implementation metadata.
///
/// Both sequences are compared in position order. Incoming implementation
/// entries without a file extension are template placeholders and are
/// ignored.
pub fn compare_structure<'a>(
    incoming: &'a [GeneratedStep],
    stored: &'a [StoredStep],
) -> StructuralDiff<'a> {
    if incoming.len() != stored.len() {
        return StructuralDiff::Changed(ChangeReason::StepCount {
            stored: stored.len(),
            incoming: incoming.len(),
        });
    }

    let mut incoming_sorted: Vec<&GeneratedStep> = incoming.iter().collect();
    incoming_sorted.sort_by_key(|s| s.position);
    let mut stored_sorted: Vec<&StoredStep> = stored.iter().collect();
    stored_sorted.sort_by_key(|s| s.position);

    let mut checks = Vec::new();
    for (new, old) in incoming_sorted.into_iter().zip(stored_sorted) {
        if let Some(field) = differing_field(new, old) {
            return StructuralDiff::Changed(ChangeReason::StepField {
                position: new.position,
                field,
            });
        }

        for implementation in new.implementations.iter().filter(|i| i.is_unit()) {
            let Some(existing) = old
                .implementations
                .iter()
                .find(|e| e.file_name == implementation.file_name)
            else {
                return StructuralDiff::Changed(ChangeReason::MissingImplementation {
                    step: new.step_name.clone(),
                    file_name: implementation.file_name.clone(),
                });
            };
            if existing.language != implementation.language {
                return StructuralDiff::Changed(ChangeReason::LanguageChanged {
                    step: new.step_name.clone(),
                    file_name: implementation.file_name.clone(),
                });
            }
            checks.push(ContentCheck {
                step: &new.step_name,
                language: &existing.language,
                file_name: &existing.file_name,
                incoming: implementation.implementation_template.as_deref().unwrap_or(""),
            });
        }
    }
    StructuralDiff::NeedsContentCheck(checks)
}

fn differing_field(new: &GeneratedStep, old: &StoredStep) -> Option<StepField> {
    if new.step_name != old.name {
        Some(StepField::Name)
    } else if new.step_doc != old.doc {
        Some(StepField::Doc)
    } else if new.step_type != old.step_type {
        Some(StepField::Type)
    } else if new.input_doc != old.input_doc {
        Some(StepField::InputDoc)
    } else if new.output_doc != old.output_doc {
        Some(StepField::OutputDoc)
    } else if new.output_extension != old.output_extension {
        Some(StepField::OutputExtension)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::definition::{GeneratedImplementation, StepType, StoredImplementation};

    fn incoming(name: &str, position: i32, source: &str) -> GeneratedStep {
        GeneratedStep {
            step_name: name.to_string(),
            step_doc: "doc".to_string(),
            step_type: StepType::Logic,
            position,
            input_doc: "in".to_string(),
            output_doc: "out".to_string(),
            output_extension: "csv".to_string(),
            implementations: vec![
                GeneratedImplementation {
                    file_name: format!("{name}.py"),
                    language: "python".to_string(),
                    implementation_template: Some(source.to_string()),
                },
                GeneratedImplementation {
                    file_name: "placeholder".to_string(),
                    language: "js".to_string(),
                    implementation_template: None,
                },
            ],
        }
    }

    fn stored(name: &str, position: i32) -> StoredStep {
        StoredStep {
            name: name.to_string(),
            doc: "doc".to_string(),
            step_type: StepType::Logic,
            position,
            input_doc: "in".to_string(),
            output_doc: "out".to_string(),
            output_extension: "csv".to_string(),
            implementations: vec![StoredImplementation {
                file_name: format!("{name}.py"),
                language: "python".to_string(),
            }],
        }
    }

    #[test]
    fn step_count_difference_is_a_change() {
        let new = vec![incoming("a", 1, "x")];
        let old = vec![stored("a", 1), stored("b", 2)];
        assert_matches!(
            compare_structure(&new, &old),
            StructuralDiff::Changed(ChangeReason::StepCount { stored: 2, incoming: 1 })
        );
    }

    #[test]
    fn compares_in_position_order() {
        let new = vec![incoming("b", 2, "x"), incoming("a", 1, "y")];
        let old = vec![stored("a", 1), stored("b", 2)];
        let StructuralDiff::NeedsContentCheck(checks) = compare_structure(&new, &old) else {
            panic!("expected content checks");
        };
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].step, "a");
        assert_eq!(checks[0].incoming, "y");
        assert_eq!(checks[1].file_name, "b.py");
    }

    #[test]
    fn each_field_is_compared() {
        let old = vec![stored("a", 1)];
        let cases: Vec<(fn(&mut GeneratedStep), StepField)> = vec![
            (|s| s.step_name = "z".into(), StepField::Name),
            (|s| s.step_doc = "other".into(), StepField::Doc),
            (|s| s.step_type = StepType::Boolean, StepField::Type),
            (|s| s.input_doc = "other".into(), StepField::InputDoc),
            (|s| s.output_doc = "other".into(), StepField::OutputDoc),
            (|s| s.output_extension = "txt".into(), StepField::OutputExtension),
        ];
        for (mutate, expected) in cases {
            let mut step = incoming("a", 1, "x");
            mutate(&mut step);
            let new = vec![step];
            assert_eq!(
                compare_structure(&new, &old),
                StructuralDiff::Changed(ChangeReason::StepField {
                    position: 1,
                    field: expected
                })
            );
        }
    }

    #[test]
    fn unknown_implementation_file_is_a_change() {
        let mut step = incoming("a", 1, "x");
        step.implementations[0].file_name = "renamed.py".into();
        let new = vec![step];
        let old = vec![stored("a", 1)];
        assert_matches!(
            compare_structure(&new, &old),
            StructuralDiff::Changed(ChangeReason::MissingImplementation { .. })
        );
    }

    #[test]
    fn language_difference_is_a_change() {
        let mut step = incoming("a", 1, "x");
        step.implementations[0].language = "js".into();
        let new = vec![step];
        let old = vec![stored("a", 1)];
        assert_matches!(
            compare_structure(&new, &old),
            StructuralDiff::Changed(ChangeReason::LanguageChanged { .. })
        );
    }

    #[test]
    fn placeholders_are_ignored() {
        let new = vec![incoming("a", 1, "x")];
        let old = vec![stored("a", 1)];
        let StructuralDiff::NeedsContentCheck(checks) = compare_structure(&new, &old) else {
            panic!("expected content checks");
        };
        assert_eq!(checks.len(), 1);
    }

    #[test]
    fn content_comparison_is_byte_exact() {
        let check = ContentCheck {
            step: "a",
            language: "python",
            file_name: "a.py",
            incoming: "codes = []\n",
        };
        assert_eq!(check.compare(b"codes = []\n"), None);
        assert_matches!(
            check.compare(b"codes = []"),
            Some(ChangeReason::ContentChanged { .. })
        );
    }

    #[test]
    fn reason_display_is_readable() {
        let reason = ChangeReason::StepField {
            position: 3,
            field: StepField::OutputExtension,
        };
        assert_eq!(reason.to_string(), "step at position 3: output_extension changed");
    }
}

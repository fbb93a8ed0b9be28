//! Reading a batch of definitions one element at a time.
//!
//! A batch file is a JSON array of definitions, or a single definition.
//! Each element is decoded on its own so a malformed definition fails by
//! itself instead of taking the rest of the batch with it.

use phenoflow_core::definition::GeneratedDefinition;
use serde_json::Value;

/// A batch element that could not be decoded as a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedDefinition {
    /// The element's `name` when it has one, else its position.
    pub name: String,
    pub error: String,
}

/// Decoded batch elements, in file order.
#[derive(Debug, Default)]
pub struct DefinitionBatch {
    pub entries: Vec<Result<GeneratedDefinition, MalformedDefinition>>,
}

impl DefinitionBatch {
    pub fn from_json(value: Value) -> Self {
        let elements = match value {
            Value::Array(elements) => elements,
            single => vec![single],
        };
        let entries = elements
            .into_iter()
            .enumerate()
            .map(|(index, element)| {
                let name = element
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("definition #{}", index + 1));
                serde_json::from_value(element).map_err(|e| MalformedDefinition {
                    name,
                    error: e.to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn malformed(&self) -> impl Iterator<Item = &MalformedDefinition> {
        self.entries.iter().filter_map(|e| e.as_ref().err())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn valid(name: &str) -> Value {
        json!({
            "id": uuid::Uuid::new_v4(),
            "name": name,
            "about": format!("{name} phenotype"),
            "userName": "alice",
            "steps": [{"stepName": "read-disc", "stepType": "load", "position": 1}]
        })
    }

    #[test]
    fn elements_are_decoded_independently() {
        let mut missing_author = valid("Asthma");
        missing_author.as_object_mut().unwrap().remove("userName");
        let mut bad_type = valid("Copd");
        bad_type["steps"][0]["stepType"] = json!("transform");

        let batch = DefinitionBatch::from_json(json!([
            valid("Diabetes"),
            missing_author,
            bad_type,
            json!(42)
        ]));

        assert_eq!(batch.len(), 4);
        assert_eq!(batch.entries[0].as_ref().unwrap().name, "Diabetes");
        let malformed: Vec<&str> = batch.malformed().map(|m| m.name.as_str()).collect();
        assert_eq!(malformed, vec!["Asthma", "Copd", "definition #4"]);
        assert!(batch.malformed().next().unwrap().error.contains("userName"));
    }

    #[test]
    fn single_object_is_a_batch_of_one() {
        let batch = DefinitionBatch::from_json(valid("Diabetes"));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.malformed().count(), 0);
    }
}

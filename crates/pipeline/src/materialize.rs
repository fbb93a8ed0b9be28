//! Renders a workflow into the file tree that gets published.
//!
//! Layout of `<output>/<workflowId>/`:
//!
//! ```text
//! <name>.cwl              rendered workflow descriptor
//! <name>-inputs.yml       rendered inputs descriptor
//! <step>.cwl              one per rendered step
//! <language>/<fileName>   implementation units, copied from uploads
//! README.md, LICENSE.md   from templates
//! replaceMe.csv           placeholder input, load-type entries only
//! source/<group>.csv      extracted code lists
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use chrono::Datelike;
use phenoflow_core::codelist::{build_codelists, CodelistStep, ExtractorRegistry};
use phenoflow_core::definition::{StepType, StoredStep};
use phenoflow_core::types::WorkflowId;

use crate::error::{PipelineError, StorageError};
use crate::generator::{implementation_units, RenderedWorkflow};
use crate::storage::ImplementationStorage;

const README_LOAD: &str = include_str!("../templates/README-load.md");
const README_EXTERNAL: &str = include_str!("../templates/README-external.md");
const README_SUB: &str = include_str!("../templates/README-sub.md");
const LICENSE: &str = include_str!("../templates/LICENSE.md");
const PLACEHOLDER_INPUT: &str = include_str!("../templates/replaceMe.csv");

/// Everything needed to render one workflow.
#[derive(Debug, Clone, Copy)]
pub struct MaterializeRequest<'a> {
    pub workflow_id: WorkflowId,
    pub name: &'a str,
    pub about: &'a str,
    pub author: &'a str,
    /// Stored steps in position order.
    pub steps: &'a [StoredStep],
    pub rendered: &'a RenderedWorkflow,
}

/// Result of a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub dir: PathBuf,
    pub files: usize,
    /// Files that could not be written and were skipped.
    pub failures: usize,
}

pub struct Materializer {
    storage: ImplementationStorage,
    extractors: ExtractorRegistry,
}

impl Materializer {
    pub fn new(storage: ImplementationStorage, extractors: ExtractorRegistry) -> Self {
        Self {
            storage,
            extractors,
        }
    }

    /// Render a workflow into its output directory, replacing any earlier
    /// render.
    ///
    /// A file that cannot be written is logged and skipped; only failing to
    /// prepare the directory itself is an error.
    pub async fn materialize(
        &self,
        request: MaterializeRequest<'_>,
    ) -> Result<Materialized, PipelineError> {
        let dir = self.storage.output_dir_for(&request.workflow_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io { path: dir, source: e }.into()),
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(StorageError::io(&dir))?;

        let mut tree = TreeWriter::new(&dir);
        let rendered = request.rendered;
        let units = implementation_units(rendered, request.steps);

        tree.write(&format!("{}.cwl", request.name), rendered.workflow.as_bytes())
            .await;
        tree.write(
            &format!("{}-inputs.yml", request.name),
            rendered.workflow_inputs.as_bytes(),
        )
        .await;
        for step in &rendered.steps {
            tree.write(&format!("{}.cwl", step.name), step.content.as_bytes())
                .await;
        }

        let mut sources: HashMap<&str, String> = HashMap::new();
        for step in request.steps {
            let (Some(unit), Some(language)) = (step.unit(), units.get(&step.name)) else {
                continue;
            };
            match self
                .storage
                .read(&request.workflow_id, &unit.language, &unit.file_name)
                .await
            {
                Ok(bytes) => {
                    let target = format!("{language}/{}", unit.file_name.replace('/', ""));
                    tree.write(&target, &bytes).await;
                    sources.insert(step.name.as_str(), String::from_utf8_lossy(&bytes).into_owned());
                }
                Err(e) => {
                    tracing::warn!(step = %step.name, error = %e, "Implementation unit not copied");
                    tree.failures += 1;
                }
            }
        }

        let entry = request.steps.first();
        if entry.is_some_and(|s| s.step_type == StepType::Load) {
            tree.write("replaceMe.csv", PLACEHOLDER_INPUT.as_bytes()).await;
        }

        let connector_path = entry.and_then(|step| {
            let unit = step.unit()?;
            let language = units.get(&step.name)?;
            Some(format!("{language}/{}", unit.file_name.replace('/', "")))
        });
        let readme = readme(
            entry.map(|s| s.step_type),
            request.name,
            request.about,
            request.author,
            connector_path.as_deref(),
        );
        tree.write("README.md", readme.as_bytes()).await;

        let license = LICENSE.replace("[year]", &chrono::Utc::now().year().to_string());
        tree.write("LICENSE.md", license.as_bytes()).await;

        let codelist_steps: Vec<CodelistStep<'_>> = request
            .steps
            .iter()
            .map(|step| CodelistStep {
                name: &step.name,
                language: units.get(&step.name).map(String::as_str),
                source: sources.get(step.name.as_str()).map(String::as_str),
            })
            .collect();
        for (group, csv) in build_codelists(&codelist_steps, &self.extractors) {
            tree.write(&format!("source/{group}.csv"), csv.as_bytes()).await;
        }

        tracing::info!(
            workflow_id = %request.workflow_id,
            files = tree.files,
            failures = tree.failures,
            "Workflow materialized",
        );
        let (files, failures) = (tree.files, tree.failures);
        Ok(Materialized {
            dir,
            files,
            failures,
        })
    }
}

/// Fill in the README template chosen by the entry step's type.
fn readme(
    entry_type: Option<StepType>,
    name: &str,
    about: &str,
    author: &str,
    connector_path: Option<&str>,
) -> String {
    let template = match entry_type {
        Some(StepType::Load) => README_LOAD,
        Some(StepType::External) => README_EXTERNAL,
        _ => README_SUB,
    };
    let mut text = template
        .replace("[id]", name)
        .replace("[about]", about)
        .replace("[author]", author);
    if entry_type == Some(StepType::External) {
        text = text.replace("[connectorPath]", connector_path.unwrap_or_default());
    }
    text
}

/// Writes files under a root, counting rather than propagating failures.
struct TreeWriter<'a> {
    root: &'a Path,
    files: usize,
    failures: usize,
}

impl<'a> TreeWriter<'a> {
    fn new(root: &'a Path) -> Self {
        Self {
            root,
            files: 0,
            failures: 0,
        }
    }

    async fn write(&mut self, relative: &str, content: &[u8]) {
        if !Path::new(relative)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            tracing::warn!(path = relative, "Refusing to write outside the workflow tree");
            self.failures += 1;
            return;
        }
        let path = self.root.join(relative);
        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content).await
        }
        .await;
        match result {
            Ok(()) => self.files += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write file");
                self.failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use phenoflow_core::definition::StoredImplementation;

    use super::*;
    use crate::generator::RenderedStep;

    fn stored(name: &str, step_type: StepType, position: i32, file_name: &str) -> StoredStep {
        StoredStep {
            name: name.to_string(),
            doc: "doc".to_string(),
            step_type,
            position,
            input_doc: "in".to_string(),
            output_doc: "out".to_string(),
            output_extension: "csv".to_string(),
            implementations: vec![StoredImplementation {
                file_name: file_name.to_string(),
                language: "python".to_string(),
            }],
        }
    }

    fn rendered(steps: &[StoredStep]) -> RenderedWorkflow {
        RenderedWorkflow {
            workflow: "class: Workflow\n".to_string(),
            workflow_inputs: "inputModule1: {}\n".to_string(),
            steps: steps
                .iter()
                .map(|s| RenderedStep {
                    name: s.name.clone(),
                    content: format!("id: {}\n", s.name),
                    step_type: Some(s.step_type.as_str().to_string()),
                    file_name: s.unit().map(|u| u.file_name.clone()),
                    language: Some("python".to_string()),
                })
                .collect(),
        }
    }

    async fn setup(
        entry_type: StepType,
    ) -> (tempfile::TempDir, ImplementationStorage, WorkflowId, Vec<StoredStep>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = ImplementationStorage::new(dir.path().join("uploads"), dir.path().join("output"));
        let id = uuid::Uuid::new_v4();
        let steps = vec![
            stored("read-disc", entry_type, 1, "read-disc.py"),
            stored("diabetes-check", StepType::Logic, 2, "diabetes-check.py"),
            stored("diabetes-check-exclude", StepType::Logic, 3, "diabetes-check-exclude.py"),
            stored("output-cases", StepType::Output, 4, "output-cases.py"),
        ];
        let sources = [
            ("read-disc.py", "print('read')"),
            ("diabetes-check.py", r#"codes = [{"code": "E11", "system": "ICD10"}]"#),
            ("diabetes-check-exclude.py", r#"codes_exclude = [{"code": "O24", "system": "ICD10"}]"#),
            ("output-cases.py", "print('out')"),
        ];
        for (file, source) in sources {
            storage.write(&id, "python", file, source.as_bytes()).await.unwrap();
        }
        (dir, storage, id, steps)
    }

    #[tokio::test]
    async fn renders_full_tree_for_load_entry() {
        let (_dir, storage, id, steps) = setup(StepType::Load).await;
        let rendered = rendered(&steps);
        let materializer = Materializer::new(storage, ExtractorRegistry::default());

        let out = materializer
            .materialize(MaterializeRequest {
                workflow_id: id,
                name: "Diabetes",
                about: "Diabetes phenotype",
                author: "alice",
                steps: &steps,
                rendered: &rendered,
            })
            .await
            .unwrap();

        assert_eq!(out.failures, 0);
        for file in [
            "Diabetes.cwl",
            "Diabetes-inputs.yml",
            "read-disc.cwl",
            "output-cases.cwl",
            "python/diabetes-check.py",
            "replaceMe.csv",
            "LICENSE.md",
        ] {
            assert!(out.dir.join(file).is_file(), "missing {file}");
        }
        let readme = std::fs::read_to_string(out.dir.join("README.md")).unwrap();
        assert!(readme.starts_with("# Diabetes"));
        assert!(readme.contains("Author: alice"));
        let license = std::fs::read_to_string(out.dir.join("LICENSE.md")).unwrap();
        assert!(!license.contains("[year]"));

        let include = std::fs::read_to_string(out.dir.join("source/diabetes-check.csv")).unwrap();
        assert_eq!(include, "code,system\nE11,ICD10");
        let exclude =
            std::fs::read_to_string(out.dir.join("source/diabetes-check-exclude.csv")).unwrap();
        assert_eq!(exclude, "code,system\nO24,ICD10");
    }

    #[tokio::test]
    async fn external_entry_links_connector_and_skips_placeholder() {
        let (_dir, storage, id, steps) = setup(StepType::External).await;
        let rendered = rendered(&steps);
        let materializer = Materializer::new(storage, ExtractorRegistry::default());

        let out = materializer
            .materialize(MaterializeRequest {
                workflow_id: id,
                name: "Diabetes",
                about: "Diabetes phenotype",
                author: "alice",
                steps: &steps,
                rendered: &rendered,
            })
            .await
            .unwrap();

        assert!(!out.dir.join("replaceMe.csv").exists());
        let readme = std::fs::read_to_string(out.dir.join("README.md")).unwrap();
        assert!(readme.contains("python/read-disc.py"));
    }

    #[tokio::test]
    async fn missing_unit_is_skipped_not_fatal() {
        let (_dir, storage, id, steps) = setup(StepType::Load).await;
        std::fs::remove_file(storage.implementation_path(&id, "python", "diabetes-check.py")).unwrap();
        let rendered = rendered(&steps);
        let materializer = Materializer::new(storage, ExtractorRegistry::default());

        let out = materializer
            .materialize(MaterializeRequest {
                workflow_id: id,
                name: "Diabetes",
                about: "Diabetes phenotype",
                author: "alice",
                steps: &steps,
                rendered: &rendered,
            })
            .await
            .unwrap();
        assert_eq!(out.failures, 1);
        assert!(out.dir.join("Diabetes.cwl").is_file());
    }

    #[tokio::test]
    async fn rendered_names_cannot_escape_the_tree() {
        let (dir, storage, id, steps) = setup(StepType::Load).await;
        let mut rendered = rendered(&steps);
        rendered.steps[1].name = "../../escaped".to_string();
        rendered.steps[2].language = Some("../lang".to_string());
        let materializer = Materializer::new(storage, ExtractorRegistry::default());

        let out = materializer
            .materialize(MaterializeRequest {
                workflow_id: id,
                name: "Diabetes",
                about: "Diabetes phenotype",
                author: "alice",
                steps: &steps,
                rendered: &rendered,
            })
            .await
            .unwrap();

        assert_eq!(out.failures, 2);
        assert!(!dir.path().join("escaped.cwl").exists());
        assert!(!dir.path().join("output/lang").exists());
        assert!(out.dir.join("Diabetes.cwl").is_file());
    }

    #[test]
    fn nested_readme_for_other_entries() {
        let text = readme(Some(StepType::Logic), "Cough", "Cough phenotype", "bob", None);
        assert!(text.contains("nested component"));
        assert!(text.contains("# Cough"));
    }
}

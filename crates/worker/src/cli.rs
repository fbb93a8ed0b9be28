use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use phenoflow_core::types::WorkflowId;
use phenoflow_pipeline::{ConnectorSpec, DefinitionBatch};

use crate::services::Services;

#[derive(Debug, Parser)]
#[command(name = "phenoflow-worker", about = "Import and publish phenotype workflows")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import a batch of generated definitions and publish what changed.
    Import {
        /// JSON file holding one definition or an array of them.
        file: PathBuf,
        /// Create workflows and repositories as restricted.
        #[arg(long)]
        restricted: bool,
    },
    /// Add a data-source connector variant to existing workflows.
    AddConnector {
        #[arg(required = true)]
        ids: Vec<WorkflowId>,
        /// JSON file describing the connector step.
        #[arg(long)]
        connector: PathBuf,
        /// Id for the new workflow; only valid with a single existing id.
        #[arg(long)]
        id: Option<WorkflowId>,
    },
    /// Remove a workflow together with its parent/child family.
    Remove { id: WorkflowId },
    /// Remove families whose repositories were only partially published.
    Cleanup,
    /// Delete every managed repository of the organisation.
    ClearRepos,
}

/// Read a definitions file holding one definition or a list. Only a file
/// that is not JSON at all is an error; malformed elements are kept for the
/// batch report.
pub fn read_definitions(path: &Path) -> anyhow::Result<DefinitionBatch> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing definitions in {}", path.display()))?;
    Ok(DefinitionBatch::from_json(value))
}

pub fn read_connector(path: &Path) -> anyhow::Result<ConnectorSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing connector in {}", path.display()))
}

/// Run one command to completion.
pub async fn run(command: Command, services: &Services) -> anyhow::Result<()> {
    match command {
        Command::Import { file, restricted } => {
            let batch = read_definitions(&file)?;
            tracing::info!(count = batch.len(), restricted, "Importing definitions");
            let report = services.importer.import_decoded(&batch, restricted).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                anyhow::bail!("batch import failed");
            }
        }
        Command::AddConnector { ids, connector, id } => {
            if id.is_some() && ids.len() > 1 {
                anyhow::bail!("--id can only be used with a single existing workflow");
            }
            let connector = read_connector(&connector)?;
            for existing in ids {
                let published = services
                    .importer
                    .add_connector(existing, &connector, id)
                    .await
                    .with_context(|| format!("adding connector to {existing}"))?;
                println!("{}", serde_json::to_string_pretty(&published)?);
            }
        }
        Command::Remove { id } => {
            let repos = services.reaper.remove_workflows(id).await?;
            tracing::info!(workflow_id = %id, repos = repos.len(), "Workflow family removed");
        }
        Command::Cleanup => {
            let repos = services.reaper.remove_partial_imports().await?;
            for repo in &repos {
                println!("{repo}");
            }
        }
        Command::ClearRepos => {
            let deleted = services.reaper.clear_all_repositories().await?;
            println!("{deleted}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_import() {
        let cli = Cli::try_parse_from(["phenoflow-worker", "import", "batch.json", "--restricted"])
            .unwrap();
        match cli.command {
            Command::Import { file, restricted } => {
                assert_eq!(file, PathBuf::from("batch.json"));
                assert!(restricted);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn add_connector_requires_ids_and_connector() {
        let id = uuid::Uuid::new_v4().to_string();
        assert!(Cli::try_parse_from(["phenoflow-worker", "add-connector", "--connector", "c.json"]).is_err());
        assert!(Cli::try_parse_from(["phenoflow-worker", "add-connector", id.as_str()]).is_err());
        let cli = Cli::try_parse_from([
            "phenoflow-worker",
            "add-connector",
            id.as_str(),
            "--connector",
            "c.json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::AddConnector { ref ids, .. } if ids.len() == 1));
    }

    #[test]
    fn remove_rejects_malformed_ids() {
        assert!(Cli::try_parse_from(["phenoflow-worker", "remove", "not-an-id"]).is_err());
        assert!(Cli::try_parse_from(["phenoflow-worker", "clear-repos"]).is_ok());
    }

    const DEFINITION: &str = r#"{
        "id": "6f1c1d3e-4b5a-4c1e-9e57-0d3c2b1a0f00",
        "name": "Diabetes",
        "about": "Diabetes phenotype",
        "userName": "alice",
        "steps": [{"stepName": "read-disc", "stepType": "load", "position": 1}]
    }"#;

    #[test]
    fn reads_single_and_batch_files() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("single.json");
        std::fs::write(&single, DEFINITION).unwrap();
        assert_eq!(read_definitions(&single).unwrap().len(), 1);

        let batch = dir.path().join("batch.json");
        std::fs::write(&batch, format!("[{DEFINITION}, {DEFINITION}]")).unwrap();
        assert_eq!(read_definitions(&batch).unwrap().len(), 2);
    }

    #[test]
    fn one_bad_element_does_not_reject_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        let no_author = DEFINITION.replace(r#""userName": "alice","#, "");
        std::fs::write(&path, format!("[{DEFINITION}, {no_author}]")).unwrap();

        let batch = read_definitions(&path).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.entries[0].is_ok());
        assert_eq!(batch.malformed().count(), 1);

        std::fs::write(&path, "not json").unwrap();
        assert!(read_definitions(&path).is_err());
    }

    #[test]
    fn connector_type_defaults_to_external() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connector.json");
        std::fs::write(
            &path,
            r#"{"dataSource": "GP Records", "language": "python", "fileName": "gp.py", "implementationTemplate": "print(1)"}"#,
        )
        .unwrap();
        let connector = read_connector(&path).unwrap();
        assert_eq!(connector.step_name(), "read-potential-cases-gp-records");
        assert!(connector.validate().is_ok());
    }
}

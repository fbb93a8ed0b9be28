//! Repository for `steps` and their input, output, and implementation rows.

use std::collections::HashMap;

use phenoflow_core::definition::{StepType, StoredImplementation, StoredStep};
use phenoflow_core::types::{DbId, WorkflowId};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::step::{CreateStep, ImplementationRow, StepRow};

/// Column list for joined step queries.
const STEP_COLUMNS: &str = "s.id, s.workflow_id, s.name, s.doc, s.step_type, s.position, \
    i.doc AS input_doc, o.doc AS output_doc, o.extension AS output_extension, s.created_at";

/// Provides persistence for workflow steps.
pub struct StepRepo;

impl StepRepo {
    /// Load a workflow's steps in position order, with their implementations.
    pub async fn list_for_workflow(
        pool: &PgPool,
        workflow_id: WorkflowId,
    ) -> Result<Vec<StoredStep>, sqlx::Error> {
        let query = format!(
            "SELECT {STEP_COLUMNS}
             FROM steps s
             LEFT JOIN step_inputs i ON i.step_id = s.id
             LEFT JOIN step_outputs o ON o.step_id = s.id
             WHERE s.workflow_id = $1
             ORDER BY s.position, s.id"
        );
        let rows = sqlx::query_as::<_, StepRow>(&query)
            .bind(workflow_id)
            .fetch_all(pool)
            .await?;

        let step_ids: Vec<DbId> = rows.iter().map(|r| r.id).collect();
        let implementations = sqlx::query_as::<_, ImplementationRow>(
            "SELECT id, step_id, file_name, language FROM implementations
             WHERE step_id = ANY($1)
             ORDER BY id",
        )
        .bind(&step_ids)
        .fetch_all(pool)
        .await?;

        let mut by_step: HashMap<DbId, Vec<StoredImplementation>> = HashMap::new();
        for row in implementations {
            by_step.entry(row.step_id).or_default().push(StoredImplementation {
                file_name: row.file_name,
                language: row.language,
            });
        }

        rows.into_iter()
            .map(|row| {
                let step_type = StepType::from_name(&row.step_type)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                Ok(StoredStep {
                    implementations: by_step.remove(&row.id).unwrap_or_default(),
                    name: row.name,
                    doc: row.doc,
                    step_type,
                    position: row.position,
                    input_doc: row.input_doc.unwrap_or_default(),
                    output_doc: row.output_doc.unwrap_or_default(),
                    output_extension: row.output_extension.unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Whether a workflow has a step with the given name.
    pub async fn has_step(
        pool: &PgPool,
        workflow_id: WorkflowId,
        name: &str,
    ) -> Result<bool, sqlx::Error> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM steps WHERE workflow_id = $1 AND name = $2)",
        )
        .bind(workflow_id)
        .bind(name)
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    /// Replace every step of a workflow in one transaction.
    ///
    /// The workflow's `updated_at` is bumped and its completeness flag reset.
    pub async fn replace_for_workflow(
        pool: &PgPool,
        workflow_id: WorkflowId,
        steps: &[CreateStep],
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM steps WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;
        Self::insert_steps(&mut tx, workflow_id, steps).await?;
        sqlx::query("UPDATE workflows SET complete = false, updated_at = now() WHERE id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete every step of a workflow. Returns the number of steps removed.
    pub async fn delete_for_workflow(
        pool: &PgPool,
        workflow_id: WorkflowId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM steps WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub(crate) async fn insert_steps(
        tx: &mut Transaction<'_, Postgres>,
        workflow_id: WorkflowId,
        steps: &[CreateStep],
    ) -> Result<(), sqlx::Error> {
        for step in steps {
            let step_id: DbId = sqlx::query_scalar(
                "INSERT INTO steps (workflow_id, name, doc, step_type, position)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING id",
            )
            .bind(workflow_id)
            .bind(&step.name)
            .bind(&step.doc)
            .bind(step.step_type.as_str())
            .bind(step.position)
            .fetch_one(&mut **tx)
            .await?;

            sqlx::query("INSERT INTO step_inputs (step_id, doc) VALUES ($1, $2)")
                .bind(step_id)
                .bind(&step.input_doc)
                .execute(&mut **tx)
                .await?;

            sqlx::query("INSERT INTO step_outputs (step_id, doc, extension) VALUES ($1, $2, $3)")
                .bind(step_id)
                .bind(&step.output_doc)
                .bind(&step.output_extension)
                .execute(&mut **tx)
                .await?;

            for implementation in &step.implementations {
                sqlx::query(
                    "INSERT INTO implementations (step_id, file_name, language)
                     VALUES ($1, $2, $3)",
                )
                .bind(step_id)
                .bind(&implementation.file_name)
                .bind(&implementation.language)
                .execute(&mut **tx)
                .await?;
            }
        }
        Ok(())
    }
}

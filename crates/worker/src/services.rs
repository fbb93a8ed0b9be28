use std::sync::Arc;

use phenoflow_core::codelist::ExtractorRegistry;
use phenoflow_github::publish::PublisherSettings;
use phenoflow_github::{GitHost, HostKind, MemoryGitHost, Publisher};
use phenoflow_pipeline::generator::GeneratorClient;
use phenoflow_pipeline::lock::IdentityLocks;
use phenoflow_pipeline::materialize::Materializer;
use phenoflow_pipeline::publication::PublicationService;
use phenoflow_pipeline::storage::ImplementationStorage;
use phenoflow_pipeline::store::{DefinitionStore, PgDefinitionStore};
use phenoflow_pipeline::{Importer, PipelineConfig, Reaper};

/// Everything a command needs, built once from configuration.
pub struct Services {
    pub importer: Importer,
    pub reaper: Reaper,
}

impl Services {
    /// Connect to the database (running pending migrations) and the git
    /// host, and assemble the pipeline.
    pub async fn connect(config: &PipelineConfig) -> anyhow::Result<Self> {
        let pool = phenoflow_db::create_pool(&config.database_url).await?;
        phenoflow_db::health_check(&pool).await?;
        phenoflow_db::run_migrations(&pool).await?;
        tracing::info!("Database ready");

        let store: Arc<dyn DefinitionStore> = Arc::new(PgDefinitionStore::new(pool));
        Ok(Self::assemble(config, store, git_host(config)?))
    }

    /// Assemble the pipeline around a store and git host.
    pub fn assemble(
        config: &PipelineConfig,
        store: Arc<dyn DefinitionStore>,
        host: Arc<dyn GitHost>,
    ) -> Self {
        let storage = ImplementationStorage::new(&config.uploads_dir, &config.output_dir);
        let github = &config.github;

        let publisher = Publisher::new(
            Arc::clone(&host),
            PublisherSettings {
                organisation: github.organisation.clone(),
                homepage: github.homepage.clone(),
                release_webhook: github.zenodo_webhook.clone(),
            },
        );
        let publication = PublicationService::new(
            Arc::new(GeneratorClient::new(&config.generator_url)),
            Materializer::new(storage.clone(), ExtractorRegistry::default()),
            publisher,
            github.repository_prefix.clone(),
        );
        let importer = Importer::new(
            Arc::clone(&store),
            storage.clone(),
            Arc::new(IdentityLocks::new()),
            publication,
        );
        let reaper = Reaper::new(
            store,
            storage,
            host,
            github.organisation.clone(),
            github.expected_branch_count,
        );
        Self { importer, reaper }
    }
}

fn git_host(config: &PipelineConfig) -> anyhow::Result<Arc<dyn GitHost>> {
    let github = &config.github;
    if config.dry_run {
        tracing::warn!("Dry run: publishing into an in-memory git host");
        return Ok(Arc::new(MemoryGitHost::new()));
    }
    let host = phenoflow_github::connect(&github.base_url, &github.token, github.rate_limit_retries)?;
    tracing::info!(
        base_url = %github.base_url,
        organisation = %github.organisation,
        kind = ?HostKind::for_base_url(&github.base_url),
        "Git host connected"
    );
    Ok(host)
}

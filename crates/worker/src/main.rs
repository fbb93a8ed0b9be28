use clap::Parser;
use phenoflow_pipeline::PipelineConfig;
use phenoflow_worker::cli::{run, Cli};
use phenoflow_worker::services::Services;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "phenoflow_worker=debug,phenoflow_pipeline=debug,phenoflow_github=info".into()
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;
    let services = Services::connect(&config).await?;

    run(cli.command, &services).await
}

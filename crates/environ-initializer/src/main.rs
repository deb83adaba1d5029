mod logging;

use anyhow::Result;
use clap::Parser;
use environ_initializer::app::ApplicationBuilder;
use environ_initializer::config::Cli;
use environ_initializer::config::InitializerConfig;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init(cli.log_dir.as_deref())?;

    tracing::info!("Starting environ initializer {}", &**version::VERSION);

    let config = InitializerConfig::from(cli);
    tracing::info!(
        annotation = %config.trigger_annotation,
        configmap = %format!("{}/{}", config.configmap_namespace, config.configmap_name),
        resources = ?config.resources,
        patch_strategy = %config.patch_strategy,
        "Loaded configuration"
    );

    let app = ApplicationBuilder::new(config).build().await?;
    app.run().await?;

    Ok(())
}

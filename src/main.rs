use anyhow::Context;
use libris_app::App;
use libris_kernel::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().with_context(|| "failed to load Libris settings")?;
    libris_telemetry::init(&settings.telemetry)?;

    tracing::info!(
        env = ?settings.environment,
        database = ?settings.database.backend,
        cache = ?settings.cache.backend,
        "libris-app starting"
    );

    App::build(settings).await?.serve(false).await
}

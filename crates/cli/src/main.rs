use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use libris_app::App;
use libris_kernel::settings::{CacheBackend, DatabaseBackend, Settings};

/// Book catalog service with a read-through cache.
#[derive(Debug, Parser)]
#[command(name = "libris", version, about)]
struct Cli {
    /// Override `database.backend`
    #[arg(long, global = true, value_enum)]
    database: Option<DatabaseArg>,

    /// Override `cache.backend`
    #[arg(long, global = true, value_enum)]
    cache: Option<CacheArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server until SIGINT/SIGTERM
    Serve {
        /// Insert sample books when the catalog is empty
        #[arg(long)]
        seed: bool,
    },
    /// Apply pending database migrations
    Migrate,
    /// Insert sample books when the catalog is empty
    Seed,
    /// Drop every cache entry
    FlushCache,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DatabaseArg {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CacheArg {
    Redis,
    Memory,
    Disabled,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(database) = self.database {
            settings.database.backend = match database {
                DatabaseArg::Postgres => DatabaseBackend::Postgres,
                DatabaseArg::Memory => DatabaseBackend::Memory,
            };
        }
        if let Some(cache) = self.cache {
            settings.cache.backend = match cache {
                CacheArg::Redis => CacheBackend::Redis,
                CacheArg::Memory => CacheBackend::Memory,
                CacheArg::Disabled => CacheBackend::Disabled,
            };
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load().with_context(|| "failed to load Libris settings")?;
    cli.apply(&mut settings);
    libris_telemetry::init(&settings.telemetry)?;

    tracing::info!(
        env = ?settings.environment,
        command = ?cli.command,
        "libris starting"
    );

    let app = App::build(settings).await?;

    match cli.command {
        Command::Serve { seed } => return app.serve(seed).await,
        Command::Migrate => {
            let applied = app.migrate().await?;
            println!("applied {applied} migration(s)");
        }
        Command::Seed => {
            app.migrate().await?;
            let created = app.seed().await?;
            println!("seeded {created} book(s)");
        }
        Command::FlushCache => {
            if app.flush_cache().await? {
                println!("cache flushed");
            } else {
                println!("cache disabled; nothing to flush");
            }
        }
    }

    app.shutdown().await
}

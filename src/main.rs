use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use memvault::config::RuntimeConfig;
use memvault::index::{Database, DatabaseOptions, SearchEngine};
use memvault::notes::NoteRepository;
use memvault::server::serve_stdio;
use memvault::session::SessionStore;
use memvault::tools::{build_registry, ToolContext};
use memvault::vault::{
    BacklinkOptions, BacklinkSync, OrganizerOptions, ParaOrganizer, VaultWatcher, WatcherOptions,
};

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("memvault={level},info")));

    // stdout carries the protocol stream; logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Arc::new(RuntimeConfig::from_env()?);
    init_tracing(&config.log_level);
    tracing::info!(vault = %config.vault_path.display(), index = %config.index_path.display(), "starting");

    let organizer_opts = OrganizerOptions::default();
    for category in memvault::notes::Category::ALL {
        let dir = config
            .vault_path
            .join(organizer_opts.layout.dir_for(category));
        memvault::io_atomic::ensure_dir(&dir)?;
    }

    let db = Database::open(&config.index_path, &DatabaseOptions::default())?;
    let engine = SearchEngine::new(Arc::new(db));
    let repo = Arc::new(NoteRepository::new(&config.vault_path));
    let organizer = ParaOrganizer::new(Arc::clone(&repo), organizer_opts);
    let backlinks = BacklinkSync::new(Arc::clone(&repo), engine.clone(), BacklinkOptions::default());

    let cancel = CancellationToken::new();
    let (watcher, events) = VaultWatcher::start(&config.vault_path, WatcherOptions::default())?;
    let pump = backlinks.spawn_event_pump(events, cancel.clone());
    let flusher = tokio::spawn(Arc::clone(&backlinks).run(cancel.clone()));

    let registry = Arc::new(build_registry(ToolContext {
        repo,
        engine,
        organizer,
        backlinks,
        sessions: Arc::new(SessionStore::new()),
        config: Arc::clone(&config),
    }));

    let served = serve_stdio(registry).await;

    // Shutdown order: stop the watcher, drain pending backlink work,
    // then let the database close on drop.
    watcher.stop();
    cancel.cancel();
    let _ = pump.await;
    let _ = flusher.await;
    served?;

    tracing::info!("shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        init_tracing("error");
        tracing::error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

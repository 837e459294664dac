//! Cookie arena game server.

use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Cookie Arena Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = server::Config::load()?;
    info!("Loaded configuration");
    info!("  World: {}x{}", config.world.width, config.world.height);
    info!(
        "  Tick rate: {}..{} fps",
        config.simulation.min_fps, config.simulation.max_fps
    );
    info!("  Food target: {}", config.food.min_count);

    let game = server::Game::new(config);
    game.start();

    // The transport front end is a separate concern; keep the core alive
    // and report liveness until the process is stopped.
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        info!(
            "alive: sessions={} food={}",
            game.session_count(),
            game.food_count()
        );
    }
}

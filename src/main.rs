use color_eyre::{eyre::eyre, Result};
use nightsense::codec::keys::KeyMaterial;
use nightsense::codec::ReadingCodec;
use nightsense::config::TelemetryConfig;
use nightsense::mqtt::SensorSimulator;
use nightsense::storage::SensorStore;
use nightsense::supervisor::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = TelemetryConfig::load().await;
    info!("Starting nightsense telemetry core");

    let store = SensorStore::open(&config.storage.database_path)
        .map_err(|e| eyre!("Failed to open sensor store: {}", e))?;

    let codec = if config.encryption.enabled {
        let keys = KeyMaterial::load(&config.encryption.key_dir).map_err(|e| {
            eyre!(
                "Failed to load key material from {}: {}",
                config.encryption.key_dir.display(),
                e
            )
        })?;
        ReadingCodec::sealed(keys)
    } else {
        ReadingCodec::plaintext()
    };

    if config.simulator.seed_readings > 0 {
        seed_store(&config, &store).await?;
    }

    let token = CancellationToken::new();
    let supervisor = Supervisor::start(config, store, codec, token.clone()).await;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutdown requested");
    token.cancel();
    supervisor.wait().await;
    info!("All services drained, exiting");

    Ok(())
}

/// Fills an empty database with synthetic history so the stack has data to
/// serve right after the first start.
async fn seed_store(config: &TelemetryConfig, store: &SensorStore) -> Result<()> {
    let simulator = SensorSimulator::new(&config.simulator);
    let count = config.simulator.seed_readings;
    let seed_store = store.clone();
    let inserted =
        tokio::task::spawn_blocking(move || seed_store.seed_random(count, || simulator.sample()))
            .await
            .map_err(|e| eyre!("Seeding task failed: {}", e))?
            .map_err(|e| eyre!("Failed to seed readings: {}", e))?;
    info!("Seeded {} synthetic readings", inserted);
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

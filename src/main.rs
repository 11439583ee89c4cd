use std::{sync::Arc, time::Duration};

use promptwave::{
    audio::{AudioClock, InstantClock, OutputDriver, open_sink},
    common::types::AnyResult,
    configs::Config,
    decoder::Pcm16Decoder,
    playback::{self, EngineHandle},
    protocol::default_deck,
    server::AppState,
    session::LiveMusicConnector,
    transport,
};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, trace};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    promptwave::common::logger::init(&config);

    if config.session.resolve_api_key().is_none() {
        error!(
            "No API key configured. Set `session.api_key` or ${}; play requests will fail.",
            config.session.api_key_env
        );
    }

    let clock: Arc<dyn AudioClock> = Arc::new(InstantClock::new());
    let deck = default_deck();

    let engine = playback::spawn(
        config.playback.clone(),
        Arc::new(LiveMusicConnector::new(config.session.clone())),
        Arc::new(Pcm16Decoder::new()),
        clock.clone(),
        deck.clone(),
    );

    let shutdown = CancellationToken::new();

    let sink = open_sink(&config.output)?;
    let driver = OutputDriver::new(engine.graph(), clock, sink, &config.output);
    let driver_task = tokio::spawn(driver.run(shutdown.child_token()));
    tokio::spawn(meter(engine.clone(), shutdown.child_token()));

    let address = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState {
        engine: engine.clone(),
        config,
        deck,
    });

    let app = transport::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Promptwave listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    if let Err(e) = engine.shutdown().await {
        error!("Failed to shut down engine: {}", e);
    }
    shutdown.cancel();
    if let Err(e) = driver_task.await {
        error!("Output driver panicked: {}", e);
    }

    Ok(())
}

/// Logs the output peak once a second.
async fn meter(engine: EngineHandle, cancel: CancellationToken) {
    let tap = engine.add_meter_tap();
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut peak = 0.0f32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            block = tap.recv_async() => match block {
                Ok(block) => {
                    peak = block.iter().fold(peak, |acc, s| acc.max(s.abs()));
                }
                Err(_) => break,
            },
            _ = interval.tick() => {
                trace!("Output peak {:.3} ({:?})", peak, engine.state());
                peak = 0.0;
            }
        }
    }
}

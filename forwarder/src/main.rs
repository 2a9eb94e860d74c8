mod capture;
mod convert;
mod forwarder;
mod mjpeg;
mod publish;
mod rate;
#[cfg(test)]
mod test_log;

use forwarder::StreamForwarder;
use mjpeg_relay_common::config::Config;
use publish::{KafkaSink, LatestFramePublisher, Publisher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const EXIT_CONFIG: i32 = 1;
const EXIT_OPEN_FAILED: i32 = 2;
const EXIT_PUBLISHER: i32 = 3;

/// Bound on delivering the last pending frame at shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(EXIT_CONFIG);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        url = config.stream.url,
        fps = config.stream.fps,
        brokers = config.publish.brokers,
        topic = config.publish.topic,
        "starting mjpeg-relay"
    );

    let sink = match KafkaSink::new(&config.publish) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create Kafka producer");
            std::process::exit(EXIT_PUBLISHER);
        }
    };
    let mut publisher = LatestFramePublisher::spawn(sink);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown_tx.send_replace(true);
    });

    let code = relay(&config, &mut publisher, shutdown_rx).await;
    if tokio::time::timeout(CLOSE_TIMEOUT, publisher.close()).await.is_err() {
        warn!("timed out delivering last frame");
    }
    std::process::exit(code);
}

/// Open the stream and forward frames until shutdown. Returns the process
/// exit code. The capture handle is released before this returns.
async fn relay<P: Publisher>(
    config: &Config,
    publisher: &mut P,
    shutdown: watch::Receiver<bool>,
) -> i32 {
    let mut capture = match mjpeg::open(&config.stream).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, url = config.stream.url, "failed to open MJPEG stream");
            return EXIT_OPEN_FAILED;
        }
    };

    let summary = StreamForwarder::new(config.stream.fps, config.publish.frame_id.clone())
        .run(&mut capture, publisher, &shutdown)
        .await;

    info!(
        published = summary.published,
        read_failures = summary.read_failures,
        "mjpeg-relay stopped"
    );
    0
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the relay runs until killed
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

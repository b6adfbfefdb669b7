//! Ingest supervisor daemon
//!
//! Wires the components together: registry client, pull supervisor,
//! authorization gate, status reconciler, change-feed sync, health
//! sampler, and the HTTP surface. Shuts down on SIGTERM/ctrl-c by
//! draining every running pull and releasing the change subscription.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use streamhub_ingest::registry::ChangeFeed;
use streamhub_ingest::{
    AuthGate, HealthSampler, IngestConfig, PullSupervisor, RestRegistry, SourceSync,
    StatusReconciler, StreamRegistry, SurfaceState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("streamhub_ingest=info".parse()?),
        )
        .init();

    let config = Arc::new(IngestConfig::from_env());
    let registry: Arc<dyn StreamRegistry> = Arc::new(RestRegistry::new(&config)?);

    let supervisor = PullSupervisor::new(Arc::clone(&registry), Arc::clone(&config));
    let state = Arc::new(SurfaceState {
        gate: AuthGate::new(
            supervisor.active_pulls(),
            Arc::clone(&registry),
            Arc::clone(&config),
        ),
        reconciler: StatusReconciler::new(
            Arc::clone(&registry),
            supervisor.active_pulls(),
            Arc::clone(&config),
        ),
        registry: Arc::clone(&registry),
        config: Arc::clone(&config),
    });

    info!(
        rtmp = %config.public_rtmp_url(),
        hls = %format!("http://{}:{}/{}", config.http_host, config.http_port, config.app),
        "starting ingest supervisor"
    );

    let sync = SourceSync::new(Arc::clone(&supervisor), Arc::clone(&registry));
    if let Err(e) = sync.bootstrap().await {
        // the change feed still delivers sources added later
        warn!(error = %e, "initial source load failed");
    }

    let (events, feed) = ChangeFeed::new(&config).spawn();
    let sampler = HealthSampler::new(Arc::clone(&registry), config.health_interval);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));

    tokio::select! {
        result = streamhub_ingest::run_surface(state, addr) => {
            // losing the surface (or failing to bind it) is fatal
            result?;
        }
        _ = sync.run(events) => {}
        _ = sampler.run() => {}
        _ = shutdown_signal() => {
            info!("shutting down");
        }
    }

    supervisor.shutdown().await;
    feed.close();

    Ok(())
}

/// Resolve on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = term.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

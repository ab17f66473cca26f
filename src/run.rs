//! Process runner: loads the configuration, starts stats collection, launches
//! every service and waits for the listen loops to finish.

use crate::config::Config;
use crate::error::StatsError;
use crate::event::{self, EventSender};
use crate::route::{RouteCompiler, RouteDefaults};
use crate::server::Endpoint;
use crate::service::{launch, LaunchContext};
use crate::shutdown::Shutdown;
use crate::stats::{Collector, FS_DRIVER};
use crate::template::TemplateEngine;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long the collector may take to drain queued events after the
/// endpoints stop.
const STATS_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Options of the `run` command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_file: PathBuf,
    pub collect_stats: bool,
    pub stats_destination: String,
    pub stats_driver: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("golem.yaml"),
            collect_stats: false,
            stats_destination: "./stats.log".to_string(),
            stats_driver: FS_DRIVER.to_string(),
        }
    }
}

/// Load the configuration and serve it until `shutdown` fires.
pub async fn run(opts: RunOptions, shutdown: Shutdown) -> Result<()> {
    info!(path = %opts.config_file.display(), "Loading configuration file");
    let config = Config::from_file(&opts.config_file)?;
    serve(config, &opts, shutdown).await
}

/// Serve an already loaded configuration until `shutdown` fires.
pub async fn serve(config: Config, opts: &RunOptions, shutdown: Shutdown) -> Result<()> {
    // The collector stops on its own signal so it can drain after the
    // endpoints have shut down
    let stats_shutdown = Shutdown::new();
    let (events, collector) = if opts.collect_stats {
        match start_stats(&config, opts, &stats_shutdown).await {
            Ok((tx, handle)) => (tx, Some(handle)),
            Err(e) => {
                error!(
                    driver = %opts.stats_driver,
                    destination = %opts.stats_destination,
                    error = %e,
                    "Stats collection disabled"
                );
                (EventSender::disabled(), None)
            }
        }
    } else {
        (EventSender::disabled(), None)
    };

    let engine = Arc::new(TemplateEngine::new());
    let ctx = LaunchContext {
        shutdown: shutdown.subscribe(),
        compiler: RouteCompiler::new(
            RouteDefaults::from(&config.settings),
            Arc::new(config.vars.clone()),
        ),
        events: events.clone(),
        engine: Arc::clone(&engine),
    };

    let mut default_endpoint = config.port.as_ref().map(|port| {
        info!(port = %port, "Initialize new default endpoint");
        Endpoint::new(port.clone(), events.clone(), Arc::clone(&engine))
    });

    let mut listeners: Vec<_> = config
        .services
        .iter()
        .filter_map(|service| launch(&ctx, default_endpoint.as_mut(), service))
        .collect();

    // Started last so every service has registered its routes
    if let Some(endpoint) = default_endpoint {
        listeners.push(tokio::spawn(endpoint.listen(shutdown.subscribe())));
    }

    // Only the collector may hold a receiver once the endpoints stop
    drop(ctx);
    drop(events);

    if listeners.is_empty() {
        warn!("No endpoint to serve");
    }
    for listener in listeners {
        match listener.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Endpoint failed"),
            Err(e) => error!(error = %e, "Endpoint task panicked"),
        }
    }

    shutdown.trigger();
    if let Some(mut collector) = collector {
        // Every sender is gone now, so the collector exits once the queue is
        // empty
        let finished = match tokio::time::timeout(STATS_DRAIN_TIMEOUT, &mut collector).await {
            Ok(finished) => finished,
            Err(_) => {
                warn!("Stats collector did not drain in time, cancelling");
                stats_shutdown.trigger();
                collector.await
            }
        };
        match finished {
            Ok(Ok(persisted)) => info!(persisted, "Stats collector finished"),
            Ok(Err(e)) => error!(error = %e, "Stats collector failed"),
            Err(e) => error!(error = %e, "Stats collector task panicked"),
        }
    }

    Ok(())
}

/// Open the stats sink and spawn the collector. The sink is opened before
/// any endpoint starts so a bad driver or destination is reported up front.
async fn start_stats(
    config: &Config,
    opts: &RunOptions,
    stats_shutdown: &Shutdown,
) -> Result<(EventSender, JoinHandle<Result<u64, StatsError>>), StatsError> {
    let collector = Collector::new(&opts.stats_driver, &opts.stats_destination)?;
    let sink = collector.open_sink().await?;
    let (tx, rx) = event::channel(config.settings.stats_buffer, config.settings.stats_overflow);
    let signal = stats_shutdown.subscribe();
    let handle = tokio::spawn(async move { collector.collect_into(sink, signal, rx).await });
    Ok((tx, handle))
}

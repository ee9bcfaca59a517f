use crate::broker::AmqpBroker;
use crate::conf::AmqpwayConfig;
use crate::pool::ConnectionPool;
use crate::proxy::PublishGateway;
use anyhow::{Context, Result};
use pingora::prelude::*;
use pingora::server::Server;
use pingora::server::configuration::ServerConf;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on pool teardown once a shutdown signal arrives.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Run the proxy with the given configuration. Blocks until the process exits.
pub fn run(config: AmqpwayConfig) -> Result<()> {
    use tokio::runtime::Builder;

    // Control-plane runtime (pool worker + shutdown only)
    let control_rt = Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("failed to build control-plane Tokio runtime")?;

    let broker = Arc::new(AmqpBroker::new(config.broker.dsn.clone()));
    let pool = {
        // The pool spawns its delayed-close worker on the current runtime.
        let _guard = control_rt.enter();
        ConnectionPool::new(config.pool.clone(), broker)
    };

    tracing::info!(
        listen = %config.server.listen,
        max_connections = config.pool.max_connections,
        max_channels_per_connection = config.pool.max_channels_per_connection,
        "starting amqpway"
    );

    // Build Pingora server (Pingora owns its own runtimes)
    let server = build_gateway_server(&config, pool.clone())?;

    // Drain the pool before exiting
    let handle = control_rt.handle().clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested, closing connection pool");
        let pool = pool.clone();
        let closed = handle.block_on(async move {
            tokio::time::timeout(SHUTDOWN_TIMEOUT, pool.close_all()).await
        });
        if closed.is_err() {
            tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "connection pool did not close in time");
        }
        std::process::exit(0);
    })?;

    // IMPORTANT:
    // - control_rt must stay in scope so its worker thread lives
    // - run_forever blocks the main thread as intended
    server.run_forever();
}

/// Build the Pingora server serving the publish gateway on `server.listen`.
pub fn build_gateway_server(config: &AmqpwayConfig, pool: Arc<ConnectionPool>) -> Result<Server> {
    let mut server = if let Some(threads) = config.server.threads {
        tracing::debug!(
            threads,
            "Creating Pingora server with overridden worker threads"
        );
        let mut conf = ServerConf::new()
            .ok_or_else(|| anyhow::anyhow!("could not construct pingora server configuration"))?;
        conf.threads = threads;
        Server::new_with_opt_and_conf(None, conf)
    } else {
        // "None" is required here to truly tell Pingora to use its default settings.
        Server::new(None)?
    };

    server.bootstrap();

    let gateway = PublishGateway::new(pool);

    let mut svc = http_proxy_service(&server.configuration, gateway);
    svc.add_tcp(&config.server.listen);

    server.add_service(svc);

    Ok(server)
}

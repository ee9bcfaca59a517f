use crate::conf::{AmqpwayConfig, PoolConfig};
use std::net::SocketAddr;
use url::Url;

/// Check every setting and report all problems at once.
pub fn validate_config(config: &AmqpwayConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    validate_dsn(&config.broker.dsn, &mut errors);
    validate_listen(&config.server.listen, &mut errors);
    if config.server.threads == Some(0) {
        errors.push("server.threads must be greater than 0".to_string());
    }
    validate_pool(&config.pool, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_dsn(dsn: &str, errors: &mut Vec<String>) {
    let dsn = dsn.trim();
    if dsn.is_empty() {
        errors.push("broker.dsn is required".to_string());
        return;
    }

    match Url::parse(dsn) {
        Ok(url) if matches!(url.scheme(), "amqp" | "amqps") => {}
        Ok(url) => errors.push(format!(
            "broker.dsn has unsupported scheme '{}' (expected amqp or amqps)",
            url.scheme()
        )),
        Err(e) => errors.push(format!("broker.dsn is not a valid URL: {e}")),
    }
}

fn validate_listen(listen: &str, errors: &mut Vec<String>) {
    if listen.trim().is_empty() {
        errors.push("server.listen is required".to_string());
    } else if listen.parse::<SocketAddr>().is_err() {
        errors.push(format!("invalid address: {listen}"));
    }
}

fn validate_pool(pool: &PoolConfig, errors: &mut Vec<String>) {
    let limits = [
        ("max_channels_per_connection", pool.max_channels_per_connection),
        ("max_idle_channels", pool.max_idle_channels),
        ("max_connections", pool.max_connections),
        ("min_connections", pool.min_connections),
    ];
    for (name, value) in limits {
        if value == 0 {
            errors.push(format!("pool.{name} must be greater than 0"));
        }
    }

    if pool.min_connections > pool.max_connections {
        errors.push(format!(
            "pool.min_connections ({}) exceeds pool.max_connections ({})",
            pool.min_connections, pool.max_connections
        ));
    }

    if pool.acquire_timeout_ms == Some(0) {
        errors.push("pool.acquire_timeout_ms must be greater than 0".to_string());
    }
    if pool.max_waiters == Some(0) {
        errors.push("pool.max_waiters must be greater than 0".to_string());
    }
    if pool.confirm_timeout_ms == Some(0) {
        errors.push("pool.confirm_timeout_ms must be greater than 0".to_string());
    }
}

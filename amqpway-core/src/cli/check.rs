use crate::cli::ConfigArgs;
use crate::conf::ConfigError;
use owo_colors::OwoColorize;

/// Validate the configuration, print a summary and exit non-zero on failure.
pub fn check(args: &ConfigArgs) -> anyhow::Result<()> {
    match args.load() {
        Ok(cfg) => {
            println!("✔ Config loaded successfully");
            println!("✔ broker {}", redact_dsn(&cfg.broker.dsn));
            println!("✔ listening on {}", cfg.server.listen);
            println!(
                "✔ {} to {} connections, {} sessions each",
                cfg.pool.min_connections,
                cfg.pool.max_connections,
                cfg.pool.max_channels_per_connection
            );
            println!("✔ {} idle sessions cached", cfg.pool.max_idle_channels);
            Ok(())
        }
        Err(err) => {
            print_config_error(&err);
            std::process::exit(1);
        }
    }
}

fn print_config_error(err: &ConfigError) {
    match err {
        ConfigError::Validation { errors } => {
            eprintln!(
                "configuration validation failed ({} errors)\n",
                errors.len()
            );
            for e in errors {
                eprintln!("  {}: {}", "error".red().bold(), e);
            }
        }
        other => eprintln!("{}: {}", "error".red().bold(), other),
    }

    if let Some(hint) = err.hint() {
        eprintln!();
        eprintln!("{}", hint);
    }
}

/// Hide the password in a DSN before printing it.
pub(crate) fn redact_dsn(dsn: &str) -> String {
    match url::Url::parse(dsn) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("****"));
            url.to_string()
        }
        Ok(url) => url.to_string(),
        Err(_) => dsn.to_string(),
    }
}

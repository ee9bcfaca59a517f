use crate::conf::AmqpwayConfig;

/// Settings given on the command line. Each one that is set replaces the
/// value from the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub dsn: Option<String>,
    pub listen: Option<String>,
    pub max_channels_per_connection: Option<usize>,
    pub max_idle_channels: Option<usize>,
    pub max_connections: Option<usize>,
    pub min_connections: Option<usize>,
    pub debug: bool,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut AmqpwayConfig) {
        if let Some(dsn) = &self.dsn {
            config.broker.dsn = dsn.clone();
        }
        if let Some(listen) = &self.listen {
            config.server.listen = listen.clone();
        }
        if let Some(n) = self.max_channels_per_connection {
            config.pool.max_channels_per_connection = n;
        }
        if let Some(n) = self.max_idle_channels {
            config.pool.max_idle_channels = n;
        }
        if let Some(n) = self.max_connections {
            config.pool.max_connections = n;
        }
        if let Some(n) = self.min_connections {
            config.pool.min_connections = n;
        }
        // A flag can only switch debug on.
        if self.debug {
            config.debug = true;
        }
    }
}

use aggregator_worker::config::PipelineConfig;
use envconfig::Envconfig;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3300")]
    pub port: u16,

    #[envconfig(default = "dedup_store.db")]
    pub database_path: String,

    #[envconfig(default = "5")]
    pub max_db_connections: u32,

    #[envconfig(default = "5000000")]
    pub max_body_size: usize,

    #[envconfig(default = "100")]
    pub concurrency_limit: usize,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(nested = true)]
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        // IPv6 hosts need brackets to be followed by a port.
        match self.host.contains(':') {
            true => format!("[{}]:{}", self.host, self.port),
            false => format!("{}:{}", self.host, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.bind(), "[::]:3300");
        assert_eq!(config.database_path, "dedup_store.db");
        assert!(config.export_prometheus);
        assert_eq!(config.pipeline.worker_count.get(), 5);
    }

    #[test]
    fn test_ipv4_bind_and_nested_overrides() {
        let env = HashMap::from([
            ("BIND_HOST".to_owned(), "127.0.0.1".to_owned()),
            ("BIND_PORT".to_owned(), "8080".to_owned()),
            ("QUEUE_CAPACITY".to_owned(), "64".to_owned()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.bind(), "127.0.0.1:8080");
        assert_eq!(config.pipeline.queue_capacity.get(), 64);
    }
}

use crate::harness::{CapturedEvent, init_test_tracing};
use amqpway_core::broker::MemoryBroker;
use amqpway_core::conf::{ConfigOverrides, load_config};
use amqpway_core::pool::ConnectionPool;
use amqpway_core::server::build_gateway_server;
use reqwest::blocking::{Client, RequestBuilder};
use std::net::TcpStream;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

/// Handle to a running amqpway test server backed by an in-memory broker.
pub struct TestServer {
    base_url: String,
    client: Client,
    broker: MemoryBroker,
    pool: Arc<ConnectionPool>,
    runtime: Runtime,
}

impl TestServer {
    /// Start amqpway using a TOML fixture from `fixtures/config`.
    ///
    /// The listen address is replaced with a free port, so servers can run
    /// in parallel.
    pub fn start(fixture: &str) -> Self {
        // Initialize tracing (this must happen first).
        init_test_tracing(events());

        let listen_port = free_port();

        let fixture_path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join("config")
            .join(format!("{fixture}.toml"));

        assert!(
            fixture_path.exists(),
            "fixture config does not exist: {:?}",
            fixture_path
        );

        let overrides = ConfigOverrides {
            listen: Some(format!("127.0.0.1:{listen_port}")),
            ..Default::default()
        };
        let cfg = load_config(Some(&fixture_path), &overrides)
            .expect("failed to load fixture config");

        // The pool's delayed-close worker lives on this runtime.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("failed to build test runtime");

        let broker = MemoryBroker::new();
        let pool = {
            let _guard = runtime.enter();
            ConnectionPool::new(cfg.pool.clone(), Arc::new(broker.clone()))
        };

        let server =
            build_gateway_server(&cfg, pool.clone()).expect("failed to build amqpway server");

        // Run server in background thread
        thread::spawn(move || {
            server.run_forever();
        });

        let base_url = format!("http://127.0.0.1:{listen_port}");

        // Wait for server to accept connections
        wait_for_server(&base_url);

        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build client");

        Self {
            base_url,
            client,
            broker,
            pool,
            runtime,
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.client.put(self.url(path))
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path))
    }

    /// POST `body` to `/confirm_send` for the given exchange and routing key.
    pub fn confirm_send(&self, exchange: &str, routing_key: &str, body: &str) -> RequestBuilder {
        self.post(&format!(
            "/confirm_send?exchange={exchange}&routingKey={routing_key}"
        ))
        .body(body.to_string())
    }

    /// The broker behind the pool. Use it to inject faults.
    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn close_pool(&self) {
        self.runtime.block_on(self.pool.close_all());
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Events captured from the proxy's own tracing targets, across all servers
/// in this test binary.
pub fn captured_events() -> Vec<CapturedEvent> {
    events().lock().unwrap().clone()
}

/// Poll until the server responds (or panic).
fn wait_for_server(listen_addr: &str) {
    let addr = listen_addr.strip_prefix("http://").unwrap_or(listen_addr);

    let deadline = Instant::now() + Duration::from_secs(2);

    loop {
        match TcpStream::connect(addr) {
            Ok(_) => return,
            Err(_) => {
                if Instant::now() > deadline {
                    panic!("server failed to start at {}", listen_addr);
                }
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

static EVENTS: OnceLock<Arc<Mutex<Vec<CapturedEvent>>>> = OnceLock::new();

fn events() -> Arc<Mutex<Vec<CapturedEvent>>> {
    EVENTS
        .get_or_init(|| Arc::new(Mutex::new(Vec::new())))
        .clone()
}

/// Allocate a free port on localhost.
/// This is required to avoid port collisions when running tests in parallel.
fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

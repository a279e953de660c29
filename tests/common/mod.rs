//! Shared utilities for integration testing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use device_console::config::{ConfigStore, DeviceConfig};
use device_console::http::handlers::register_management_endpoints;
use device_console::http::ManagementServer;
use device_console::lifecycle::restart::SystemRestart;

/// Restart primitive that records invocations instead of rebooting.
#[derive(Default)]
pub struct RecordingRestart {
    calls: Mutex<Vec<Duration>>,
}

impl RecordingRestart {
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl SystemRestart for RecordingRestart {
    fn restart(&self, delay: Duration) {
        self.calls.lock().unwrap().push(delay);
    }
}

/// Bind a management server on an ephemeral port, register the management
/// endpoints, and run it in the background.
///
/// Returns the base URL and the recording restart primitive.
pub async fn spawn_server(
    config: DeviceConfig,
    store: ConfigStore,
) -> (String, Arc<RecordingRestart>) {
    let restarter = Arc::new(RecordingRestart::default());

    let mut server = ManagementServer::bind(
        config,
        store,
        restarter.clone() as Arc<dyn SystemRestart>,
        None,
    )
    .await
    .expect("bind failed")
    .expect("server disabled");

    let ctx = server.context();
    register_management_endpoints(server.registry(), ctx.config.as_ref());

    let addr = server.local_addr().expect("no local addr");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    (format!("http://{addr}"), restarter)
}

/// Test configuration bound to an ephemeral local port.
pub fn test_config(dir: &std::path::Path) -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.http.listen_addr = Some("127.0.0.1:0".to_string());
    config.http.upload_dir = dir.join("uploads").display().to_string();
    config
}

/// A client that does not reuse connections, matching the server's
/// connection-close response profile.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

//! HTTP server command: `coderef-scan serve`.

use anyhow::Result;

use coderef_scan::config::ScanConfig;
use coderef_scan::registry::JobRegistry;
use coderef_scan::server::start_server;

pub async fn cmd_serve(
    mut config: ScanConfig,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.server.dev |= dev;

    let registry = JobRegistry::new(config.eviction_policy());
    start_server(config, registry).await
}

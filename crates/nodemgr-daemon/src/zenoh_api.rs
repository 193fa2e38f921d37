//! Zenoh transport for the daemon API
//!
//! Declares queryables on the machine-scoped and legacy key expressions and
//! forwards each query to the [`ApiHandler`]. Replies are JSON, see
//! [`crate::api`] for the route table.
//!
//! | Key Expression | Description |
//! |----------------|-------------|
//! | `nodemgr/{machine_id}/daemon/api/<route>` | Machine-scoped route |
//! | `nodemgr/daemon/api/<route>` | Legacy unscoped route |

use crate::api::ApiHandler;
use std::sync::Arc;
use tokio::sync::watch;
use zenoh::bytes::ZBytes;
use zenoh::Session;

/// Default router endpoint when neither configuration nor environment names one
pub const DEFAULT_ZENOH_ENDPOINT: &str = "tcp/127.0.0.1:7447";

/// Key expressions for API endpoints
pub mod api_keys {
    /// Base prefix for all API endpoints (legacy)
    pub const API_PREFIX_LEGACY: &str = "nodemgr/daemon/api";

    /// Wildcard for all API endpoints (legacy)
    pub const API_WILDCARD_LEGACY: &str = "nodemgr/daemon/api/**";

    /// Base prefix for API with machine_id
    pub fn api_prefix(machine_id: &str) -> String {
        format!("nodemgr/{}/daemon/api", machine_id)
    }

    /// Wildcard for all API endpoints with machine_id
    pub fn api_wildcard(machine_id: &str) -> String {
        format!("nodemgr/{}/daemon/api/**", machine_id)
    }

    /// Full key for one route with machine_id
    pub fn route_key(machine_id: &str, route: &str) -> String {
        format!("{}/{}", api_prefix(machine_id), route)
    }

    /// Route part of a key expression, if it carries one of the API prefixes
    pub fn route_of<'a>(key_expr: &'a str, machine_id: &str) -> Option<&'a str> {
        let scoped = api_prefix(machine_id);
        key_expr
            .strip_prefix(scoped.as_str())
            .or_else(|| key_expr.strip_prefix(API_PREFIX_LEGACY))
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .map(|rest| rest.trim_start_matches('/'))
    }
}

/// Create a Zenoh session with optional endpoint configuration
///
/// Endpoint resolution order:
/// 1. Explicit `endpoint` parameter (if Some)
/// 2. `NODEMGR_ZENOH_ENDPOINT` environment variable
/// 3. Default: `tcp/127.0.0.1:7447`
pub async fn create_session(endpoint: Option<&str>) -> Result<Arc<Session>, zenoh::Error> {
    let mut config = zenoh::Config::default();

    config.insert_json5("mode", "\"peer\"").ok();

    let env_endpoint = std::env::var("NODEMGR_ZENOH_ENDPOINT").ok();
    let ep = endpoint
        .or(env_endpoint.as_deref())
        .unwrap_or(DEFAULT_ZENOH_ENDPOINT);

    log::info!("Connecting to Zenoh router at: {}", ep);

    config
        .insert_json5("connect/endpoints", &format!("[\"{}\"]", ep))
        .ok();

    // Only talk to the configured router
    config
        .insert_json5("scouting/multicast/enabled", "false")
        .ok();
    config.insert_json5("scouting/gossip/enabled", "false").ok();

    let session = zenoh::open(config).await?;

    Ok(Arc::new(session))
}

/// Zenoh API service for the daemon
pub struct ZenohApiService {
    session: Arc<Session>,
    handler: ApiHandler,
    machine_id: String,
}

impl ZenohApiService {
    pub fn new(session: Arc<Session>, handler: ApiHandler, machine_id: String) -> Self {
        log::info!("Zenoh API service using machine_id: {}", machine_id);
        Self {
            session,
            handler,
            machine_id,
        }
    }

    /// Serve queries until `shutdown` fires.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) -> Result<(), zenoh::Error> {
        log::info!("Starting Zenoh API service...");

        let queryable_legacy = self
            .session
            .declare_queryable(api_keys::API_WILDCARD_LEGACY)
            .complete(true)
            .await?;

        log::info!(
            "Declared queryable on {} (legacy)",
            api_keys::API_WILDCARD_LEGACY
        );

        let scoped_wildcard = api_keys::api_wildcard(&self.machine_id);
        let queryable_scoped = self
            .session
            .declare_queryable(&scoped_wildcard)
            .complete(true)
            .await?;

        log::info!("Declared queryable on {} (machine-scoped)", scoped_wildcard);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    log::info!("Zenoh API service shutting down...");
                    break;
                }

                query = queryable_legacy.recv_async() => {
                    match query {
                        Ok(query) => self.spawn_query(query),
                        Err(e) => log::warn!("Query receive error (legacy): {}", e),
                    }
                }

                query = queryable_scoped.recv_async() => {
                    match query {
                        Ok(query) => self.spawn_query(query),
                        Err(e) => log::warn!("Query receive error (machine-scoped): {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    /// Queries are served concurrently; ordering is only kept inside the loader.
    fn spawn_query(&self, query: zenoh::query::Query) {
        let handler = self.handler.clone();
        let machine_id = self.machine_id.clone();
        tokio::spawn(async move {
            handle_query(&handler, &machine_id, query).await;
        });
    }
}

async fn handle_query(handler: &ApiHandler, machine_id: &str, query: zenoh::query::Query) {
    let key_expr = query.key_expr().as_str().to_string();
    log::debug!("API query received on: {}", key_expr);

    let route = api_keys::route_of(&key_expr, machine_id).unwrap_or_else(|| {
        log::warn!("Query path doesn't match expected prefix: {}", key_expr);
        key_expr.as_str()
    });

    let payload = query.payload().map(|p| p.to_bytes().into_owned());
    let response = handler.handle(route, payload.as_deref()).await;

    match query
        .reply(query.key_expr(), ZBytes::from(response))
        .await
    {
        Ok(_) => log::debug!("Reply sent for {}", key_expr),
        Err(e) => log::error!("Failed to send reply for {}: {}", key_expr, e),
    }
}

/// Create and run the Zenoh API server
pub async fn run_zenoh_api_server(
    session: Arc<Session>,
    handler: ApiHandler,
    machine_id: String,
    shutdown: watch::Receiver<()>,
) -> Result<(), zenoh::Error> {
    let service = ZenohApiService::new(session, handler, machine_id);
    service.run(shutdown).await
}

#[cfg(test)]
mod tests {
    use super::api_keys::*;

    #[test]
    fn test_route_keys() {
        assert_eq!(api_prefix("robot1"), "nodemgr/robot1/daemon/api");
        assert_eq!(api_wildcard("robot1"), "nodemgr/robot1/daemon/api/**");
        assert_eq!(
            route_key("robot1", "launch/load"),
            "nodemgr/robot1/daemon/api/launch/load"
        );
    }

    #[test]
    fn test_route_of() {
        assert_eq!(
            route_of("nodemgr/robot1/daemon/api/files/list", "robot1"),
            Some("files/list")
        );
        assert_eq!(
            route_of("nodemgr/daemon/api/launch/loaded", "robot1"),
            Some("launch/loaded")
        );
        assert_eq!(route_of("nodemgr/robot2/daemon/api/health", "robot1"), None);
        assert_eq!(route_of("nodemgr/daemon/apix/health", "robot1"), None);
    }
}

//! Client Registry
//!
//! The web server keeps one `AuthClient` per browser, keyed by an opaque id
//! stored in a cookie. The registry is a bounded cache: clients idle for
//! longer than the configured TTL, or pushed out once `max_clients` is
//! reached, are torn down when the cache evicts them.

use std::sync::Arc;

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;

pub use kernel::id::ClientId;

use crate::application::client::AuthClient;
use crate::application::config::AuthConfig;
use crate::domain::gateway::{AuthGateway, GatewayFactory};

/// Client for the request, and whether it was created just now
pub struct ResolvedClient<G>
where
    G: AuthGateway + Send + Sync + 'static,
{
    pub id: ClientId,
    pub client: Arc<AuthClient<G>>,
    pub created: bool,
}

/// Per-browser auth clients
pub struct ClientRegistry<F>
where
    F: GatewayFactory,
{
    factory: F,
    config: Arc<AuthConfig>,
    clients: Cache<ClientId, Arc<AuthClient<F::Gateway>>>,
}

impl<F> ClientRegistry<F>
where
    F: GatewayFactory,
{
    pub fn new(factory: F, config: Arc<AuthConfig>) -> Self {
        let clients = Cache::builder()
            .max_capacity(config.max_clients)
            .time_to_idle(config.client_idle_ttl)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(
                |id: Arc<ClientId>, client: Arc<AuthClient<F::Gateway>>, cause: RemovalCause| {
                    if cause.was_evicted() {
                        tracing::debug!(client_id = %id, ?cause, "Auth client evicted");
                        client.teardown();
                    }
                },
            )
            .build();

        Self {
            factory,
            config,
            clients,
        }
    }

    pub fn config(&self) -> &Arc<AuthConfig> {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Client for the cookie `raw_id`, creating one when unknown
    ///
    /// A new client hydrates from `persisted_refresh`, the refresh token
    /// kept from an earlier visit. Must be called inside a tokio runtime.
    pub fn get_or_create(
        &self,
        raw_id: Option<&str>,
        persisted_refresh: Option<String>,
    ) -> ResolvedClient<F::Gateway> {
        if let Some(id) = raw_id.and_then(|raw| raw.parse::<ClientId>().ok())
            && let Some(client) = self.clients.get(&id)
        {
            return ResolvedClient {
                id,
                client,
                created: false,
            };
        }

        let id = ClientId::new();
        let restoring = persisted_refresh.is_some();
        let client = AuthClient::start(self.factory.create(), self.config.clone(), persisted_refresh);
        self.clients.insert(id, client.clone());

        tracing::debug!(client_id = %id, restoring, "Auth client created");

        ResolvedClient {
            id,
            client,
            created: true,
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<AuthClient<F::Gateway>>> {
        self.clients.get(id)
    }

    /// Tear down and forget a client
    pub fn remove(&self, id: &ClientId) -> bool {
        match self.clients.remove(id) {
            Some(client) => {
                client.teardown();
                true
            }
            None => false,
        }
    }

    /// Apply pending expirations and capacity evictions now
    pub fn run_pending_tasks(&self) {
        self.clients.run_pending_tasks();
    }

    pub fn len(&self) -> u64 {
        self.run_pending_tasks();
        self.clients.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

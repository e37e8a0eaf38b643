//! Application state

use std::sync::Arc;

use crate::auth::{SessionAuthority, TokenService};
use crate::config::Config;
use crate::orders::OrderBook;
use crate::quota::QuotaEnforcer;
use crate::store::{CredentialStore, Ledger, StoreError, Stores};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Instance name
    pub instance_id: Arc<str>,
    /// Token issue/validate/revoke
    pub sessions: SessionAuthority,
    /// Per-route quota tiers
    pub quota: QuotaEnforcer,
    /// Shared counters and revocation markers
    pub ledger: Arc<dyn Ledger>,
    /// Registered identities
    pub credentials: Arc<dyn CredentialStore>,
    /// Orders, shared with every instance on the same stores
    pub orders: OrderBook,
}

impl AppState {
    /// Build state with stores chosen from the configuration
    pub async fn new(config: &Config) -> Result<Self, StoreError> {
        let stores = match &config.database_url {
            Some(url) => {
                let stores = Stores::postgres(url).await?;
                tracing::info!("Connected to PostgreSQL, stores are shared");
                stores
            }
            None => {
                tracing::warn!(
                    "DATABASE_URL not set, using in-memory stores. \
                     State is not shared with other instances."
                );
                Stores::in_memory()
            }
        };

        Ok(Self::with_stores(config, stores))
    }

    /// Build state over existing stores
    ///
    /// Instances built over clones of the same [`Stores`] share sessions,
    /// quota and orders.
    pub fn with_stores(config: &Config, stores: Stores) -> Self {
        let sessions = SessionAuthority::new(
            TokenService::new(config.token.clone()),
            stores.credentials.clone(),
            stores.ledger.clone(),
        );
        let quota = QuotaEnforcer::new(config.quota.clone(), stores.ledger.clone());

        Self {
            instance_id: Arc::from(config.instance_id.as_str()),
            sessions,
            quota,
            ledger: stores.ledger,
            credentials: stores.credentials,
            orders: OrderBook::new(stores.orders),
        }
    }
}

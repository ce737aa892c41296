//! `EngineContext`: one explicit struct bundling every shared service,
//! replacing the global statics an earlier design leaned on. Everything
//! downstream -- the scheduler, the reconciler, the HTTP surface -- takes
//! this by `Arc` instead of reaching for ambient state.

use std::sync::Arc;

use crate::broker::paper::{PaperBrokerAdapter, PaperBrokerConfig};
use crate::broker::signed::{CredentialResolver, EnvCredentialResolver};
use crate::broker::BrokerClient;
use crate::cache::CacheClient;
use crate::config::Config;
use crate::coordinator::ExecutionCoordinator;
use crate::error::EngineResult;
use crate::event_bus::EventBus;
use crate::registry::StrategyRegistry;
use crate::settings::SettingsService;
use crate::store::gateway::StoreGateway;
use crate::subscription::SubscriptionService;

pub struct EngineContext {
    pub config: Config,
    pub cache: CacheClient,
    pub store: Arc<StoreGateway>,
    pub registry: Arc<StrategyRegistry>,
    pub settings: Arc<SettingsService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub events: Arc<EventBus>,
    pub broker: Arc<dyn BrokerClient>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub coordinator: Arc<ExecutionCoordinator>,
}

impl EngineContext {
    /// Wires every service from `config`, runs the registry's init-time
    /// rebuild against the durable store, and returns a context ready for
    /// the scheduler or the HTTP surface to run against.
    pub async fn build(config: Config) -> EngineResult<Arc<Self>> {
        let cache = CacheClient::connect(&config.redis_url()).await?;
        let store = Arc::new(StoreGateway::open(&config.database_url)?);
        let events = Arc::new(EventBus::default());

        let registry = Arc::new(StrategyRegistry::new(cache.clone(), Arc::clone(&store)));
        registry.init(&config.strategies_dir).await?;

        let settings = Arc::new(SettingsService::new(cache.clone(), Arc::clone(&store)));
        let subscriptions = Arc::new(SubscriptionService::new(
            Arc::clone(&store),
            cache.clone(),
            Arc::clone(&registry),
            Arc::clone(&settings),
            Arc::clone(&events),
            config.strategies_dir.clone(),
        ));

        let broker: Arc<dyn BrokerClient> = Arc::new(PaperBrokerAdapter::new(PaperBrokerConfig::from_env()));
        let credentials: Arc<dyn CredentialResolver> = Arc::new(EnvCredentialResolver);

        let coordinator = Arc::new(ExecutionCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&settings),
            Arc::clone(&registry),
            Arc::clone(&subscriptions),
            Arc::clone(&events),
            Arc::clone(&broker),
            Arc::clone(&credentials),
            config.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            cache,
            store,
            registry,
            settings,
            subscriptions,
            events,
            broker,
            credentials,
            coordinator,
        }))
    }
}

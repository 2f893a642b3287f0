use std::sync::Arc;

use stacks_infra::cache::{InMemoryListingCache, ListingCache};
use stacks_infra::circulation::CirculationService;
use stacks_infra::hooks::HookRunner;
use stacks_infra::jobs::{
    CirculationJobHandler, InMemoryJobStore, JobExecutor, JobExecutorConfig, JobExecutorHandle,
    JobStore,
};
use stacks_infra::monitor::StockMonitor;
use stacks_infra::notifier::{Contacts, LogNotifier, Notifier};
use stacks_infra::reader::CatalogReader;
use stacks_infra::store::{InMemoryLibraryStore, LibraryStore};
use stacks_infra::watcher::MilestoneWatcher;

#[cfg(feature = "redis")]
use stacks_infra::{cache::RedisListingCache, jobs::PostgresJobStore, store::PostgresLibraryStore};

/// All wired infrastructure handles, threaded explicitly — no ambient
/// globals anywhere.
pub struct AppServices {
    store: Arc<dyn LibraryStore>,
    jobs: Arc<dyn JobStore>,
    cache: Arc<dyn ListingCache>,
    notifier: Arc<dyn Notifier>,
    contacts: Contacts,
    circulation: CirculationService,
    reader: CatalogReader,
    hooks: HookRunner,
    watcher: MilestoneWatcher,
}

impl AppServices {
    /// Wire every component over the given backends.
    pub fn with_parts(
        store: Arc<dyn LibraryStore>,
        jobs: Arc<dyn JobStore>,
        cache: Arc<dyn ListingCache>,
        notifier: Arc<dyn Notifier>,
        contacts: Contacts,
    ) -> Self {
        let monitor = StockMonitor::new(
            store.clone(),
            jobs.clone(),
            notifier.clone(),
            contacts.clone(),
        );
        let watcher = MilestoneWatcher::new(store.clone(), notifier.clone(), contacts.clone());
        let hooks = HookRunner::new(monitor, watcher.clone(), jobs.clone());
        let circulation = CirculationService::new(store.clone());
        let reader = CatalogReader::new(store.clone(), cache.clone());

        Self {
            store,
            jobs,
            cache,
            notifier,
            contacts,
            circulation,
            reader,
            hooks,
            watcher,
        }
    }

    /// Self-contained wiring for dev and tests.
    pub fn in_memory() -> Self {
        Self::with_parts(
            Arc::new(InMemoryLibraryStore::new()),
            InMemoryJobStore::arc(),
            Arc::new(InMemoryListingCache::new()),
            Arc::new(LogNotifier),
            Contacts::default(),
        )
    }

    /// Persistent wiring: Postgres record + job stores, Redis listing cache.
    #[cfg(feature = "redis")]
    pub async fn persistent(database_url: &str, redis_url: &str) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        let store = PostgresLibraryStore::new(pool.clone());
        store.migrate().await?;
        let jobs = PostgresJobStore::new(pool);
        jobs.migrate().await?;
        let cache = RedisListingCache::new(redis_url)?;

        Ok(Self::with_parts(
            Arc::new(store),
            Arc::new(jobs),
            Arc::new(cache),
            Arc::new(LogNotifier),
            Contacts::default(),
        ))
    }

    /// Spawn the deferred-job worker for this service set.
    pub fn spawn_job_executor(&self) -> JobExecutorHandle {
        let handler = CirculationJobHandler::new(
            self.store.clone(),
            self.notifier.clone(),
            self.contacts.clone(),
        );
        JobExecutor::new(self.jobs.clone(), Arc::new(handler))
            .spawn(JobExecutorConfig::default().with_name("circulation-jobs"))
    }

    pub fn store(&self) -> &Arc<dyn LibraryStore> {
        &self.store
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn cache(&self) -> &Arc<dyn ListingCache> {
        &self.cache
    }

    pub fn circulation(&self) -> &CirculationService {
        &self.circulation
    }

    pub fn reader(&self) -> &CatalogReader {
        &self.reader
    }

    pub fn hooks(&self) -> &HookRunner {
        &self.hooks
    }

    pub fn watcher(&self) -> &MilestoneWatcher {
        &self.watcher
    }
}

/// Pick the backend from the environment: persistent when `DATABASE_URL` and
/// `REDIS_URL` are both set (and the `redis` feature is compiled in),
/// in-memory otherwise.
pub async fn build_services() -> anyhow::Result<AppServices> {
    #[cfg(feature = "redis")]
    {
        let database_url = std::env::var("DATABASE_URL");
        let redis_url = std::env::var("REDIS_URL");
        if let (Ok(database_url), Ok(redis_url)) = (database_url, redis_url) {
            tracing::info!("using persistent backends (postgres + redis)");
            return AppServices::persistent(&database_url, &redis_url).await;
        }
    }

    tracing::info!("using in-memory backends");
    Ok(AppServices::in_memory())
}

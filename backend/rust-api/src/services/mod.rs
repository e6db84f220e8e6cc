use std::sync::Arc;

use crate::config::Config;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

use self::session_registry::SessionRegistry;
use self::submission_sink::{GradedMongoSink, SubmissionSink};

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub redis: ConnectionManager,
    pub registry: Arc<SessionRegistry>,
    pub sink: Arc<dyn SubmissionSink>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        // Create ConnectionManager with longer timeout
        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        // Test connection
        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let sink: Arc<dyn SubmissionSink> =
            Arc::new(GradedMongoSink::new(mongo.clone(), redis.clone()));

        Ok(Self {
            config,
            mongo,
            redis,
            registry: Arc::new(SessionRegistry::new()),
            sink,
        })
    }
}

pub mod attempt_service;
pub mod exam_engine;
pub mod exam_loader;
pub mod session_registry;
pub mod submission_sink;
pub mod timer_worker;

//! Composition root: parse args, load config, wire every store into its
//! service, hand the service bundle to the scheduler and the gateway,
//! then wait on ctrl_c or an internal shutdown signal before unwinding
//! both cleanly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use coach_core::{
    Channel, ChannelAdapter, Clock, CoachConfig, HealthRecordReader, HealthRecordWriter,
    LedgerStore, LlmClient, MemoryManager, ReminderSettingsStore, ShortTermBuffer, SystemClock,
    UserProfileStore,
};
use coach_gateway::{GatewayServer, LoggingChannelAdapter};
use coach_memory::{
    CoachMemoryManager, EmbeddingModel, MemoryManagerConfig, SqliteHealthRecordStore,
    SqliteLedgerStore, SqliteLongTermStore, SqliteReminderSettingsStore, SqliteUserProfileStore,
};
use coach_reasoning::message_generator::MessageGeneratorConfig;
use coach_reasoning::providers::http::HttpLlmClient;
use coach_reasoning::{
    LlmSummarizer, MockLlmClient, PatternEventDetector, PooledLlmClient, RetryConfig,
    RuleDecisionEngine, SqliteEngagementTracker, TemplateMessageGenerator,
};
use coach_scheduler::{EventBus, SchedulerDeps, SchedulerService, SqliteNotificationQueueStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "coach_cli", about = "Intelligent notification & memory core")]
struct Args {
    /// Path to a TOML config file; falls back to built-in defaults if unreadable.
    #[arg(long, default_value = "coach.toml")]
    config: String,

    /// Overrides `database_url` from the config file.
    #[arg(long, env = "COACH_DATABASE_URL")]
    db: Option<String>,

    /// Overrides the gateway bind host.
    #[arg(long)]
    host: Option<String>,

    /// Overrides the gateway bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Number of concurrent scheduler workers.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit structured JSON logs instead of the compact human format.
    #[arg(long)]
    log_json: bool,

    /// Additionally write daily-rolling logs to this directory.
    #[arg(long)]
    log_dir: Option<String>,
}

fn init_tracing(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "coach_cli.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(non_blocking).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry
            .with(stderr_layer.json())
            .with(file_layer.map(|layer| layer.json()))
            .init();
    } else {
        registry.with(stderr_layer).with(file_layer).init();
    }

    guard
}

fn build_llm_client(config: &coach_core::LlmConfig) -> Arc<dyn LlmClient> {
    let base: Arc<dyn LlmClient> = match config.provider.as_str() {
        "mock" => Arc::new(MockLlmClient::new(config.model.clone())),
        "openai" | "deepseek" | "http" => {
            match HttpLlmClient::new(config.model.clone(), config.base_url.clone(), config.fallback_timeout_ms) {
                Ok(client) => Arc::new(client),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to build http llm client, falling back to mock");
                    Arc::new(MockLlmClient::new(config.model.clone()))
                }
            }
        }
        other => {
            tracing::warn!(provider = other, "unknown llm provider, falling back to mock");
            Arc::new(MockLlmClient::new(config.model.clone()))
        }
    };

    Arc::new(PooledLlmClient::new(
        base,
        config.max_concurrent_requests,
        Duration::from_millis(config.fallback_timeout_ms),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let _tracing_guard = init_tracing(&args);

    let mut config = CoachConfig::load_or_default(&args.config);
    if let Some(db) = &args.db {
        config.database_url = db.clone();
    }
    if let Some(host) = &args.host {
        config.gateway.host = host.clone();
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    tracing::info!(database_url = %config.database_url, "starting coach_cli");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedgerStore::new(&config.database_url).await?);
    let profiles: Arc<dyn UserProfileStore> = Arc::new(SqliteUserProfileStore::new(&config.database_url).await?);
    let records_store = Arc::new(SqliteHealthRecordStore::new(&config.database_url).await?);
    let records_reader: Arc<dyn HealthRecordReader> = records_store.clone();
    let records_writer: Arc<dyn HealthRecordWriter> = records_store;
    let reminders: Arc<dyn ReminderSettingsStore> =
        Arc::new(SqliteReminderSettingsStore::new(&config.database_url).await?);
    let queue = Arc::new(SqliteNotificationQueueStore::new(&config.database_url).await?);
    let engagement: Arc<dyn coach_core::EngagementTracker> = Arc::new(
        SqliteEngagementTracker::new(&config.database_url, config.decision.daily_caps_by_level.clone()).await?,
    );

    let short_term: Arc<dyn ShortTermBuffer> = Arc::new(coach_memory::InMemoryShortTermBuffer::new(
        config.memory.checkin_cap,
        config.memory.dialogue_cap,
    ));

    let long_term = match SqliteLongTermStore::new(&config.database_url).await {
        Ok(store) => Some(Arc::new(store) as Arc<dyn coach_core::LongTermStore>),
        Err(err) => {
            tracing::warn!(error = %err, "long-term vector store unavailable, degrading to short-term-only recall");
            None
        }
    };

    let embedder = match EmbeddingModel::new() {
        Ok(model) => Some(model),
        Err(err) => {
            tracing::warn!(error = %err, "embedding model unavailable, long-term writes will carry empty vectors");
            None
        }
    };

    let llm = build_llm_client(&config.llm);
    let retry_config = RetryConfig::from_notification_config(&config.notification);

    let summarizer = Arc::new(LlmSummarizer::new(llm.clone(), retry_config));
    let memory: Arc<dyn MemoryManager> = Arc::new(CoachMemoryManager::new(
        short_term.clone(),
        long_term,
        profiles.clone(),
        summarizer,
        embedder,
        MemoryManagerConfig {
            summary_trigger_dialogue_count: config.memory.summary_trigger_dialogue_count,
            retention_days_checkin: config.memory.retention_days_checkin,
            retention_days_dialogue_summary: config.memory.retention_days_dialogue_summary,
            context_budget_chars: config.memory.context_budget_chars,
        },
    ));

    let event_detector: Arc<dyn coach_core::EventDetector> = Arc::new(PatternEventDetector::new(
        short_term,
        Some(llm.clone()),
        config.notification.context_event_ttl_hours.clone(),
    ));

    let decision: Arc<dyn coach_core::DecisionEngine> = Arc::new(RuleDecisionEngine::new(
        profiles.clone(),
        engagement.clone(),
        event_detector.clone(),
        Some(llm.clone()),
        config.decision.daily_caps_by_level.clone(),
        config.decision.min_interval_same_type_seconds,
        config.decision.send_threshold,
        config.decision.defer_threshold,
    ));

    let message_generator: Arc<dyn coach_core::MessageGenerator> = Arc::new(TemplateMessageGenerator::new(
        memory.clone(),
        profiles.clone(),
        event_detector,
        llm,
        retry_config,
        MessageGeneratorConfig::default(),
    ));

    let achievements: Arc<dyn coach_core::AchievementEvaluator> = Arc::new(
        coach_scheduler::StaticAchievementEvaluator::new(records_reader.clone(), ledger.clone(), profiles.clone()),
    );

    let bus = EventBus::new();

    let mut channel_adapters: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
    for channel in [Channel::Chat, Channel::Push, Channel::Email, Channel::Sms] {
        channel_adapters.insert(channel, Arc::new(LoggingChannelAdapter::new(channel)));
    }

    let scheduler_deps = SchedulerDeps {
        clock: clock.clone(),
        decision,
        message_generator,
        engagement,
        profiles: profiles.clone(),
        queue,
        reminders: reminders.clone(),
        achievements,
        ledger,
        records: records_reader,
        points: config.points.clone(),
        bus: bus.clone(),
        channel_adapters,
        retry_config,
        worker_count: args.workers,
    };

    let scheduler = SchedulerService::new(scheduler_deps);
    let shutdown = CancellationToken::new();

    let gateway = GatewayServer::new(
        clock,
        bus,
        profiles,
        reminders,
        memory,
        records_writer,
        shutdown.clone(),
        &config.gateway.host,
        config.gateway.port,
    );
    let gateway_handle = gateway.start();

    let scheduler_shutdown = shutdown.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl_c received, shutting down");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
    let _ = scheduler_handle.await;
    gateway_handle.abort();

    tracing::info!("coach_cli exited cleanly");
    Ok(())
}

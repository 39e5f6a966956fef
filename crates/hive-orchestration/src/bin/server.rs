//! Server binary: builds the component tree in the canonical order and
//! serves the admin push channel until a termination signal arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use hive_orchestration::lifecycle::{run_until_signal, InstanceLifecycle};
use hive_orchestration::proposals::{
    AcceptingRunner, LlmFixer, ProposalEngine, ProposalValidator, Sandbox,
};
use hive_orchestration::realtime::{realtime_router, ConnectionManager, RealtimeState};
use hive_orchestration::registry::WorkerRegistry;
use hive_orchestration::supervisor::Supervisor;
use hive_shared::board::KnowledgeBoard;
use hive_shared::config::LlmProviderKind;
use hive_shared::llm::{LlmClient, ScriptedBackend};
use hive_shared::messaging::{BusClient, MessagingProvider};
use hive_shared::resilience::{CircuitBreaker, CircuitBreakerConfig};
use hive_shared::security::SecurityPipeline;
use hive_shared::HiveConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hive_shared=info,hive_orchestration=info".into()),
        )
        .json()
        .init();

    // Config
    let config = HiveConfig::load().context("configuration load failed")?;

    // Bus
    let (provider, degraded) = MessagingProvider::from_config(&config.bus).await;
    let breaker = Arc::new(CircuitBreaker::new("bus", CircuitBreakerConfig::default()));
    let bus = BusClient::with_circuit_breaker(Arc::new(provider), degraded, breaker);

    // Board
    let board = Arc::new(KnowledgeBoard::new(config.board.default_ttl_hours));

    // Security pipeline
    let security = Arc::new(SecurityPipeline::new(config.security.clone()));

    // LLM provider slot. Transport adapters for the hosted providers plug
    // in here; the scripted backend keeps the slot live without network
    // credentials.
    let llm = build_llm(&config);

    // Registry + wiring pass
    let registry = Arc::new(WorkerRegistry::new());
    registry.initialize(
        hive_worker::workers::WorkerContext {
            bus: Some(bus.clone()),
            board: Some(board.clone()),
            llm: llm.clone(),
        },
    );

    // Proposal engine
    let fixer: Arc<dyn hive_orchestration::proposals::Fixer> = match &llm {
        Some(client) => Arc::new(LlmFixer::new(client.clone())),
        None => {
            anyhow::bail!("proposal auto-fix requires an llm provider");
        }
    };
    let proposals = Arc::new(ProposalEngine::new(
        ProposalValidator::with_default_manifest(),
        Sandbox::new(&config.proposals.sandbox_root),
        Arc::new(AcceptingRunner),
        fixer,
        config.proposals.max_fix_attempts,
    ));

    // Push channel
    let push = Arc::new(ConnectionManager::new(
        config.realtime.max_connections_per_topic,
    ));

    // Supervisor
    let bind_addr = config.realtime.bind_addr.clone();
    let heartbeat = Duration::from_secs(config.realtime.heartbeat_interval_s);
    let poll_floor = Duration::from_secs(config.realtime.poll_interval_floor_s);
    let sweep_interval = config.board.sweep_interval_s;

    let supervisor = Supervisor::new(
        config,
        bus.clone(),
        board.clone(),
        security.clone(),
        registry,
        proposals,
        push.clone(),
        llm,
    );

    // Instance lifecycle: recover, register, heartbeat.
    let lifecycle = InstanceLifecycle::new(bus.clone());
    lifecycle.startup_recovery().await.ok();
    tokio::spawn(lifecycle.clone().run_heartbeat());

    // Board sweeper + idle security-context purge.
    if sweep_interval > 0 {
        let board = board.clone();
        let security = security.clone();
        let maintenance_lifecycle = lifecycle.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(sweep_interval));
            loop {
                tick.tick().await;
                if maintenance_lifecycle.is_shutting_down() {
                    break;
                }
                board.sweep_expired();
                security.cleanup_idle_contexts();
            }
        });
    }

    // Admin server
    let state = RealtimeState::new(push, supervisor.clone(), heartbeat, poll_floor);
    let router =
        realtime_router(state).layer(tower_http::trace::TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind failed on {bind_addr}"))?;
    info!(addr = %bind_addr, "admin server listening");

    let shutdown_lifecycle = lifecycle.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            run_until_signal(shutdown_lifecycle).await;
        })
        .await
        .context("server error")?;

    Ok(())
}

/// Resolve the configured provider slot. Hosted transports are deployment
/// adapters; without one the scripted backend answers deterministically.
fn build_llm(config: &HiveConfig) -> Option<LlmClient> {
    let backend = Arc::new(ScriptedBackend::new(
        Vec::new(),
        "The provider transport for this deployment is not configured.",
    ));
    match config.llm.default_provider {
        LlmProviderKind::Gemini
        | LlmProviderKind::Openai
        | LlmProviderKind::Anthropic
        | LlmProviderKind::Grok => Some(LlmClient::new(backend, &config.llm)),
    }
}

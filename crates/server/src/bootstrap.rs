//! AppState construction and the serve loop.
//!
//! [`ServerBuilder`] is where an embedding application injects its
//! providers, tools, playbook, hooks, and metrics sink. Everything is
//! wired and sealed before the listener binds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use llmrtc_domain::config::{Config, ConfigSeverity};
use llmrtc_observe::{HookDispatcher, Hooks, MetricsSink, NoopMetrics};
use llmrtc_orchestrator::Orchestrator;
use llmrtc_playbook::{IntentClassifier, Playbook, PlaybookEngine};
use llmrtc_providers::{LlmProvider, SttProvider, TtsProvider, VisionProvider};
use llmrtc_sessions::SessionStore;
use llmrtc_tools::{ToolExecutor, ToolRegistry};
use llmrtc_vad::{EnergyScorer, VadScorer};

use crate::state::AppState;
use crate::turn_slot::TurnSlotMap;
use crate::ws;

/// How often detached sessions are checked against their grace window.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

pub struct ServerBuilder {
    config: Arc<Config>,
    llm: Option<Arc<dyn LlmProvider>>,
    stt: Option<Arc<dyn SttProvider>>,
    tts: Option<Arc<dyn TtsProvider>>,
    vision: Option<Arc<dyn VisionProvider>>,
    scorer: Arc<dyn VadScorer>,
    registry: Arc<ToolRegistry>,
    playbook: Option<Playbook>,
    intent: Option<Arc<dyn IntentClassifier>>,
    hooks: HookDispatcher,
    metrics: Arc<dyn MetricsSink>,
}

impl ServerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            llm: None,
            stt: None,
            tts: None,
            vision: None,
            scorer: Arc::new(EnergyScorer::default()),
            registry: Arc::new(ToolRegistry::new()),
            playbook: None,
            intent: None,
            hooks: HookDispatcher::new(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn llm(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(provider);
        self
    }

    pub fn stt(mut self, provider: Arc<dyn SttProvider>) -> Self {
        self.stt = Some(provider);
        self
    }

    pub fn tts(mut self, provider: Arc<dyn TtsProvider>) -> Self {
        self.tts = Some(provider);
        self
    }

    pub fn vision(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.vision = Some(provider);
        self
    }

    /// Replace the development energy heuristic with a real detector.
    pub fn vad_scorer(mut self, scorer: Arc<dyn VadScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// The tool registry to register tools on before `build` seals it.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn playbook(mut self, playbook: Playbook) -> Self {
        self.playbook = Some(playbook);
        self
    }

    pub fn intent_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.intent = Some(classifier);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn Hooks>) -> Self {
        self.hooks.register(hook);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validate config, wire every subsystem, seal the registry, and
    /// return the ready-to-serve [`AppState`].
    pub fn build(self) -> anyhow::Result<AppState> {
        // ── Config validation ────────────────────────────────────────
        let issues = self.config.validate();
        for issue in &issues {
            match issue.severity {
                ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
                ConfigSeverity::Error => tracing::error!("config: {issue}"),
            }
        }
        if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
            anyhow::bail!(
                "config validation failed with {} error(s)",
                issues
                    .iter()
                    .filter(|i| i.severity == ConfigSeverity::Error)
                    .count()
            );
        }

        // ── Providers ────────────────────────────────────────────────
        let llm = self.llm.context("an LLM provider is required")?;
        let stt = self.stt.context("an STT provider is required")?;
        let tts = self.tts.context("a TTS provider is required")?;

        let mut orchestrator = Orchestrator::new(llm, stt, tts, self.config.turn.clone())
            .with_hooks(self.hooks.clone())
            .with_metrics(self.metrics.clone());
        if let Some(vision) = self.vision {
            orchestrator = orchestrator.with_vision(vision);
        }
        let orchestrator = Arc::new(orchestrator);

        // ── Tools & playbook ─────────────────────────────────────────
        let executor = Arc::new(ToolExecutor::new(
            self.registry.clone(),
            self.config.tools.clone(),
        ));
        let playbook = match self.playbook {
            Some(playbook) => {
                let mut engine =
                    PlaybookEngine::new(playbook, orchestrator.clone(), executor.clone())
                        .context("validating playbook")?;
                if let Some(classifier) = self.intent {
                    engine = engine.with_intent_classifier(classifier);
                }
                Some(Arc::new(engine))
            }
            None => None,
        };

        // No registrations past this point.
        self.registry.seal();

        Ok(AppState {
            config: self.config,
            sessions: Arc::new(SessionStore::new()),
            registry: self.registry,
            orchestrator,
            playbook,
            scorer: self.scorer,
            hooks: self.hooks,
            metrics: self.metrics,
            turn_slots: Arc::new(TurnSlotMap::new()),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router & serve loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/rtc/ws", get(ws::rtc_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Bind and serve until ctrl-c. Spawns the session sweeper.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.server.bind.clone();

    // Session sweeper: expire detached sessions past their grace window.
    let sweeper_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let expired = sweeper_state.sessions.expire_stale(Utc::now());
            if !expired.is_empty() {
                sweeper_state.turn_slots.prune_idle();
                sweeper_state.metrics.gauge(
                    llmrtc_observe::names::CONNECTIONS_ACTIVE,
                    sweeper_state.sessions.len() as f64,
                    &[],
                );
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "llmrtc server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("serving")?;
    Ok(())
}

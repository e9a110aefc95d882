use crate::types::*;
use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use buddy_core::time::{lookback_window, today};
use buddy_core::{
    assess_attention, BuddyConfig, HeartEvent, LinkageResolver, SubjectLink, SummaryStore,
};
use buddy_memory::{
    CaregiverFeed, ClaimOutcome, CouponView, FeedMessage, LedgerStatus, RedeemOutcome,
    RewardLedger, SqliteStore,
};
use buddy_reasoning::{
    CompanionResponder, DailySummarizer, EmotionClassifier, IngestReply, IngestionPipeline,
    LlmClient, SummaryOutcome, TracingSpeechSink,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

/// Shared state for the gateway routes.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<IngestionPipeline>,
    classifier: EmotionClassifier,
    summarizer: Arc<DailySummarizer>,
    ledger: Arc<RewardLedger>,
    store: SqliteStore,
    config: Arc<BuddyConfig>,
    /// Number of open realtime sockets.
    active_ws: Arc<AtomicUsize>,
}

impl AppState {
    /// Wire the pipeline, summarizer and ledger over one store and one
    /// engine client.
    pub fn new(config: BuddyConfig, store: SqliteStore, client: Arc<dyn LlmClient>) -> Self {
        let log = Arc::new(store.clone());
        let classifier = EmotionClassifier::new(
            client.clone(),
            Duration::from_millis(config.pipeline.classifier_timeout_ms),
        );
        let responder = CompanionResponder::new(client.clone(), &config.llm, &config.pipeline);
        let pipeline = IngestionPipeline::new(log.clone(), classifier.clone(), responder)
            .with_speech(Arc::new(TracingSpeechSink));
        let summarizer = DailySummarizer::new(
            client,
            log,
            config.summary.clone(),
            config.pipeline.companion_name.clone(),
        )
        .with_max_tokens(config.llm.max_tokens);
        let ledger = RewardLedger::new(store.clone(), config.rewards.clone());

        Self {
            pipeline: Arc::new(pipeline),
            classifier,
            summarizer: Arc::new(summarizer),
            ledger: Arc::new(ledger),
            store,
            config: Arc::new(config),
            active_ws: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn active_connections(&self) -> usize {
        self.active_ws.load(Ordering::Relaxed)
    }

    fn today(&self) -> chrono::NaiveDate {
        today(self.store.utc_offset_minutes())
    }

    async fn linked(&self, caregiver_id: &str) -> Result<SubjectLink, ApiError> {
        self.store
            .linked_subject(caregiver_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("caregiver {} has no linked subject", caregiver_id)))
    }
}

/// HTTP + WebSocket surface over the pipeline, the store and the ledger.
///
/// - `POST /chat`: ingest one subject message
/// - `GET /caregivers/:id/realtime`: caregiver feed over WebSocket
/// - `GET /health`: health check
pub struct GatewayServer {
    state: AppState,
    host: String,
    port: u16,
}

impl GatewayServer {
    pub fn new(state: AppState, host: &str, port: u16) -> Self {
        Self {
            state,
            host: host.to_string(),
            port,
        }
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/chat", post(handle_chat))
            .route("/classify", post(handle_classify))
            .route("/summaries", post(handle_summarize))
            .route("/hearts", post(handle_heart))
            .route("/missions", post(handle_mission))
            .route("/subjects/:id/missions/today", get(handle_missions_today))
            .route("/activity", post(handle_activity))
            .route("/links", post(handle_link))
            .route("/caregivers/:id/logs/refresh", post(handle_refresh))
            .route("/caregivers/:id/summaries", get(handle_summaries))
            .route("/caregivers/:id/attention", get(handle_attention))
            .route("/caregivers/:id/rewards", get(handle_rewards))
            .route("/caregivers/:id/rewards/claim", post(handle_claim))
            .route("/caregivers/:id/coupons", get(handle_coupons))
            .route("/caregivers/:id/coupons/:coupon_id/redeem", post(handle_redeem))
            .route("/caregivers/:id/realtime", get(realtime_upgrade))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve until the listener fails.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Gateway failed to bind {}", addr))?;
        tracing::info!("Gateway listening on {}", addr);
        axum::serve(listener, Self::router(self.state))
            .await
            .context("Gateway server error")
    }
}

// ============================================================================
// Route handlers
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

/// POST /chat
async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<IngestReply>, ApiError> {
    let reply = state.pipeline.ingest(&req.subject_user_id, &req.text).await?;
    Ok(Json(reply))
}

/// POST /classify
async fn handle_classify(
    State(state): State<AppState>,
    Json(req): Json<ClassifyRequest>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text is empty".to_string()));
    }
    Ok(Json(ClassifyResponse {
        label: state.classifier.classify(text).await,
    }))
}

/// POST /summaries: summarize one day from stored utterances and cache it.
async fn handle_summarize(
    State(state): State<AppState>,
    Json(req): Json<SummaryRequest>,
) -> Result<Json<SummaryOutcome>, ApiError> {
    let utterances = state
        .store
        .utterances_for_day(&req.subject_user_id, req.date, state.store.utc_offset_minutes())
        .await?;
    let name = req.subject_name.as_deref().unwrap_or(DEFAULT_SUBJECT_NAME);
    let outcome = state
        .summarizer
        .summarize_day(&req.subject_user_id, name, req.date, &utterances)
        .await?;
    Ok(Json(outcome))
}

async fn handle_heart(
    State(state): State<AppState>,
    Json(req): Json<HeartRequest>,
) -> Result<Json<HeartEvent>, ApiError> {
    if req.from_user_id.is_empty() || req.to_user_id.is_empty() {
        return Err(ApiError::BadRequest("fromUserId and toUserId are required".to_string()));
    }
    let row = state.store.record_heart(&req.from_user_id, &req.to_user_id).await?;
    Ok(Json(row))
}

async fn handle_mission(
    State(state): State<AppState>,
    Json(req): Json<MissionRequest>,
) -> Result<Json<MissionResponse>, ApiError> {
    let response = match state
        .store
        .record_mission(&req.subject_user_id, req.mission_type)
        .await?
    {
        Some(row) => MissionResponse::Completed(row),
        None => MissionResponse::AlreadyCompleted {
            already_completed: true,
        },
    };
    Ok(Json(response))
}

async fn handle_missions_today(
    State(state): State<AppState>,
    Path(subject_user_id): Path<String>,
) -> Result<Json<MissionsToday>, ApiError> {
    let date = state.today();
    let missions = state.store.missions_on(&subject_user_id, date).await?;
    Ok(Json(MissionsToday {
        subject_user_id,
        date,
        missions,
    }))
}

async fn handle_activity(
    State(state): State<AppState>,
    Json(req): Json<ActivityRequest>,
) -> Result<StatusCode, ApiError> {
    if req.step_count < 0 {
        return Err(ApiError::BadRequest("stepCount must not be negative".to_string()));
    }
    let date = req.date.unwrap_or_else(|| state.today());
    state
        .store
        .record_steps(&req.subject_user_id, req.step_count, date)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_link(
    State(state): State<AppState>,
    Json(link): Json<SubjectLink>,
) -> Result<Json<SubjectLink>, ApiError> {
    state.store.link_subject(&link).await?;
    tracing::info!(caregiver = %link.caregiver_id, subject = %link.subject_user_id, "caregiver linked");
    Ok(Json(link))
}

/// POST /caregivers/:id/logs/refresh: fill missing days of the lookback window.
async fn handle_refresh(
    State(state): State<AppState>,
    Path(caregiver_id): Path<String>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let link = state.linked(&caregiver_id).await?;
    let days = state
        .summarizer
        .refresh_missing(&link.subject_user_id, &link.subject_name, state.today())
        .await;
    Ok(Json(RefreshResponse {
        subject_user_id: link.subject_user_id,
        days,
    }))
}

async fn handle_summaries(
    State(state): State<AppState>,
    Path(caregiver_id): Path<String>,
) -> Result<Json<SummariesResponse>, ApiError> {
    let link = state.linked(&caregiver_id).await?;
    let window = lookback_window(state.today(), state.config.summary.lookback_days);
    let summaries = match (window.first(), window.last()) {
        (Some(from), Some(to)) => {
            state
                .store
                .summaries_between(&link.subject_user_id, *from, *to)
                .await?
        }
        _ => Vec::new(),
    };
    Ok(Json(SummariesResponse {
        subject_user_id: link.subject_user_id,
        subject_name: link.subject_name,
        summaries,
    }))
}

async fn handle_attention(
    State(state): State<AppState>,
    Path(caregiver_id): Path<String>,
) -> Result<Json<AttentionResponse>, ApiError> {
    let link = state.linked(&caregiver_id).await?;
    let activity = state.store.subject_activity(&link.subject_user_id).await?;
    let today = state.today();

    let (last_activity_at, steps_today) = match activity {
        Some(a) => {
            let steps = if a.step_date == Some(today) { a.step_count } else { 0 };
            (a.last_activity_at, steps)
        }
        None => (None, 0),
    };
    let report = assess_attention(
        &link.subject_name,
        last_activity_at,
        steps_today,
        Utc::now(),
        state.config.attention.inactivity_hours,
    );
    Ok(Json(AttentionResponse {
        subject_user_id: link.subject_user_id,
        subject_name: link.subject_name,
        report,
    }))
}

async fn handle_rewards(
    State(state): State<AppState>,
    Path(caregiver_id): Path<String>,
) -> Result<Json<LedgerStatus>, ApiError> {
    Ok(Json(state.ledger.status(&caregiver_id).await?))
}

async fn handle_claim(
    State(state): State<AppState>,
    Path(caregiver_id): Path<String>,
) -> Result<Json<ClaimOutcome>, ApiError> {
    Ok(Json(state.ledger.claim(&caregiver_id).await?))
}

async fn handle_coupons(
    State(state): State<AppState>,
    Path(caregiver_id): Path<String>,
) -> Result<Json<Vec<CouponView>>, ApiError> {
    Ok(Json(state.ledger.list(&caregiver_id, Utc::now()).await?))
}

async fn handle_redeem(
    State(state): State<AppState>,
    Path((caregiver_id, coupon_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let outcome = state
        .ledger
        .redeem(&caregiver_id, &coupon_id, Utc::now())
        .await?;
    let status = match outcome {
        RedeemOutcome::Redeemed { .. } => StatusCode::OK,
        RedeemOutcome::AlreadyRedeemed { .. } | RedeemOutcome::Expired { .. } => StatusCode::CONFLICT,
        RedeemOutcome::NotFound => return Err(ApiError::NotFound("coupon not found".to_string())),
    };
    Ok((status, Json(outcome)).into_response())
}

/// GET /caregivers/:id/realtime: the feed is connected before the upgrade
/// so an unlinked caregiver gets a plain 404.
async fn realtime_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(caregiver_id): Path<String>,
) -> Result<Response, ApiError> {
    let resync = Duration::from_secs(state.config.realtime.resync_interval_secs.max(1));
    let Some(feed) =
        CaregiverFeed::connect(state.store.clone(), &state.store, &caregiver_id, resync).await?
    else {
        return Err(ApiError::NotFound(format!(
            "caregiver {} has no linked subject",
            caregiver_id
        )));
    };
    let active_ws = state.active_ws.clone();
    Ok(ws.on_upgrade(move |socket| stream_feed(socket, feed, active_ws)))
}

/// Forward feed messages as JSON text frames until either side goes away.
async fn stream_feed(socket: WebSocket, feed: CaregiverFeed, active_ws: Arc<AtomicUsize>) {
    active_ws.fetch_add(1, Ordering::Relaxed);
    let caregiver = feed.link().caregiver_id.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<FeedMessage>(64);
    let feed_task = tokio::spawn(feed.run(tx));

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!("failed to encode feed message: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    // Closing the receiver stops the feed loop
    drop(rx);
    match feed_task.await {
        Ok(Err(e)) => tracing::warn!(caregiver = %caregiver, "feed stopped with error: {:#}", e),
        Err(e) => tracing::warn!(caregiver = %caregiver, "feed task panicked: {}", e),
        Ok(Ok(())) => {}
    }
    active_ws.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!(caregiver = %caregiver, "realtime socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use buddy_core::{EmotionLabel, MissionType};
    use buddy_memory::ActivityBus;
    use buddy_reasoning::providers::MockProvider;
    use chrono::NaiveDate;

    async fn state() -> AppState {
        let store = SqliteStore::new(":memory:", Arc::new(ActivityBus::new()))
            .await
            .unwrap();
        AppState::new(
            BuddyConfig::default(),
            store,
            Arc::new(MockProvider::new("offline")),
        )
    }

    async fn link(state: &AppState) {
        handle_link(
            State(state.clone()),
            Json(SubjectLink {
                subject_user_id: "grace".into(),
                caregiver_id: "carer".into(),
                subject_name: "Grace".into(),
            }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(health().await, "ok");
    }

    #[tokio::test]
    async fn test_chat_returns_reply_and_label() {
        let state = state().await;
        let Json(reply) = handle_chat(
            State(state.clone()),
            Json(ChatRequest {
                subject_user_id: "grace".into(),
                text: "My knee hurts today".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(reply.emotion_label, EmotionLabel::PainSuspected);
        assert!(!reply.companion_reply_text.is_empty());
    }

    #[tokio::test]
    async fn test_chat_rejects_blank_text() {
        let state = state().await;
        let err = handle_chat(
            State(state),
            Json(ChatRequest {
                subject_user_id: "grace".into(),
                text: "   ".into(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mission_twice_reports_already_completed() {
        let state = state().await;
        let req = MissionRequest {
            subject_user_id: "grace".into(),
            mission_type: MissionType::Meal,
        };
        let Json(first) = handle_mission(State(state.clone()), Json(req.clone())).await.unwrap();
        assert!(matches!(first, MissionResponse::Completed(_)));
        let Json(second) = handle_mission(State(state.clone()), Json(req)).await.unwrap();
        assert!(matches!(second, MissionResponse::AlreadyCompleted { .. }));

        let Json(today) = handle_missions_today(State(state), Path("grace".into()))
            .await
            .unwrap();
        assert_eq!(today.missions, vec![MissionType::Meal]);
    }

    #[tokio::test]
    async fn test_caregiver_routes_need_a_link() {
        let state = state().await;
        let err = handle_attention(State(state), Path("nobody".into()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_attention_uses_todays_steps_only() {
        let state = state().await;
        link(&state).await;
        let yesterday = state.today() - chrono::Duration::days(1);
        handle_activity(
            State(state.clone()),
            Json(ActivityRequest {
                subject_user_id: "grace".into(),
                step_count: 3000,
                date: Some(yesterday),
            }),
        )
        .await
        .unwrap();

        let Json(resp) = handle_attention(State(state), Path("carer".into()))
            .await
            .unwrap();
        assert!(resp.report.inactive);
        assert!(resp.report.no_steps);
        assert!(resp.report.message.unwrap().contains("Grace"));
    }

    #[tokio::test]
    async fn test_summarize_empty_day() {
        let state = state().await;
        let Json(outcome) = handle_summarize(
            State(state),
            Json(SummaryRequest {
                subject_user_id: "grace".into(),
                subject_name: None,
                date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            }),
        )
        .await
        .unwrap();
        assert!(!outcome.has_concern);
        assert_eq!(outcome.summary, "No conversations on this day.");
    }

    #[tokio::test]
    async fn test_claim_and_redeem_through_routes() {
        let state = state().await;
        for _ in 0..20 {
            state.store.record_heart("grace", "carer").await.unwrap();
        }
        let Json(claim) = handle_claim(State(state.clone()), Path("carer".into()))
            .await
            .unwrap();
        let coupon_id = claim.coupon().unwrap().id.clone();

        let Json(again) = handle_claim(State(state.clone()), Path("carer".into()))
            .await
            .unwrap();
        assert!(again.coupon().is_none());

        let ok = handle_redeem(State(state.clone()), Path(("carer".into(), coupon_id.clone())))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let conflict = handle_redeem(State(state.clone()), Path(("carer".into(), coupon_id)))
            .await
            .unwrap();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        let missing = handle_redeem(State(state), Path(("carer".into(), "nope".into())))
            .await
            .err()
            .unwrap();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
    }
}

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use solana_sdk::signer::Signer;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use shielded_relayer_core::api::{
    PrepareDepositRequest, PrepareTransferRequest, PrepareWithdrawRequest, SubmitDepositRequest,
    SubmitTransferRequest, SubmitWithdrawRequest,
};

use crate::config::RelayerConfig;
use crate::error::{RelayerError, Result};
use crate::orchestrator::Orchestrator;
use crate::prepare;
use crate::registry::Registry;
use crate::store::MerkleStore;
use crate::txmanager::TransactionManager;
use crate::verifier::VerifierRegistry;

pub struct RelayerState {
    pub config: RelayerConfig,
    pub orchestrator: Orchestrator,
}

impl RelayerState {
    pub async fn new(config: RelayerConfig) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(16)
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let store = MerkleStore::ensure_initialized(
            pool.clone(),
            config.tree_id as i32,
            config.tree_depth,
            config.max_roots,
        )
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialize Merkle store: {e}"))?;

        let verifier = VerifierRegistry::load(&config.vkey_dir)?;
        let registry = Registry::new(pool.clone());
        let txmanager = TransactionManager::new(
            config.rpc_url.clone(),
            config.keypair.clone(),
            config.program_id,
        );

        tracing::info!(relayer_pubkey = %config.keypair.pubkey(), tree_id = config.tree_id, depth = config.tree_depth, "relayer initialized");

        Ok(Self {
            config,
            orchestrator: Orchestrator {
                store,
                verifier,
                registry,
                txmanager,
            },
        })
    }
}

pub async fn run(state: Arc<RelayerState>) -> anyhow::Result<()> {
    // 10 requests per second per IP, burst of 20.
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(10)
        .burst_size(20)
        .key_extractor(tower_governor::key_extractor::SmartIpKeyExtractor)
        .finish()
        .unwrap();

    let host = state.config.host.clone();
    let port = state.config.port;

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v1/prepare/deposit", post(prepare_deposit))
        .route("/api/v1/prepare/transfer", post(prepare_transfer))
        .route("/api/v1/prepare/withdraw", post(prepare_withdraw))
        .route("/api/v1/submit/deposit", post(submit_deposit))
        .route("/api/v1/submit/transfer", post(submit_transfer))
        .route("/api/v1/submit/withdraw", post(submit_withdraw))
        .layer(GovernorLayer {
            config: Arc::new(governor_conf),
        })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(%host, port, "relayer listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn prepare_deposit(
    State(state): State<Arc<RelayerState>>,
    Json(req): Json<PrepareDepositRequest>,
) -> Result<Json<shielded_relayer_core::api::PrepareDepositResponse>> {
    Ok(Json(
        prepare::prepare_deposit(&state.orchestrator.store, &req.commitment).await?,
    ))
}

async fn prepare_transfer(
    State(state): State<Arc<RelayerState>>,
    Json(req): Json<PrepareTransferRequest>,
) -> Result<Json<shielded_relayer_core::api::PrepareTransferResponse>> {
    Ok(Json(
        prepare::prepare_transfer(&state.orchestrator.store, &req.in_commitment).await?,
    ))
}

async fn prepare_withdraw(
    State(state): State<Arc<RelayerState>>,
    Json(req): Json<PrepareWithdrawRequest>,
) -> Result<Json<shielded_relayer_core::api::PrepareWithdrawResponse>> {
    Ok(Json(
        prepare::prepare_withdraw(&state.orchestrator.store, &req.spend_commitment).await?,
    ))
}

async fn submit_deposit(
    State(state): State<Arc<RelayerState>>,
    Json(req): Json<SubmitDepositRequest>,
) -> Result<Json<shielded_relayer_core::api::SubmitResponse>> {
    Ok(Json(state.orchestrator.submit_deposit(req).await?))
}

async fn submit_transfer(
    State(state): State<Arc<RelayerState>>,
    Json(req): Json<SubmitTransferRequest>,
) -> Result<Json<shielded_relayer_core::api::SubmitResponse>> {
    Ok(Json(state.orchestrator.submit_transfer(req).await?))
}

async fn submit_withdraw(
    State(state): State<Arc<RelayerState>>,
    Json(req): Json<SubmitWithdrawRequest>,
) -> Result<Json<shielded_relayer_core::api::SubmitResponse>> {
    Ok(Json(state.orchestrator.submit_withdraw(req).await?))
}

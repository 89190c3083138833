// src/main.rs

//! # Gatekey - Main Entry Point
//!
//! Initializes the ledger adapter, the verification engine, the actuation
//! notifier and (when an owner seed is configured) the owner-side writers,
//! then starts the API server.
//!
//! ## Configuration
//! Read from `gatekey.toml` and `GATEKEY__*` environment variables (a `.env`
//! file is honoured). The only required setting is `GATEKEY__APP_ID`;
//! `GATEKEY__SANDBOX=true` runs against an in-process ledger.

use anyhow::{Context, Result};
use gatekey::blockchain::indexer_client::IndexerClient;
use gatekey::blockchain::ledger::{LedgerReader, LedgerWriter};
use gatekey::blockchain::memory_ledger::MemoryLedger;
use gatekey::config::Settings;
use gatekey::services::actuation::{AccessPublisher, ActuationNotifier, AuditTrail, SimulatedLock};
use gatekey::services::api_server::ApiServer;
use gatekey::services::credential_issuer::CredentialIssuer;
use gatekey::services::record_reader::LedgerStrategy;
use gatekey::services::verifier::VerificationEngine;
use gatekey::utils::serialization::now_epoch;
use gatekey::wallet::session::OwnerSession;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load settings and initialise logging
/// 2. Open the owner session, if configured
/// 3. Connect to the ledger (or start the sandbox ledger)
/// 4. Initialize service components
/// 5. Start API server
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("failed to load settings")?;
    let app_id = settings.app_id();
    let strategy = settings.ledger_strategy()?;

    let session = match &settings.owner_seed_path {
        Some(path) => {
            let session = OwnerSession::load_or_create(path)
                .with_context(|| format!("failed to open owner session at {}", path.display()))?
                .with_confirmation_rounds(settings.ledger.confirmation_rounds);
            Some(Arc::new(session))
        }
        None => None,
    };

    let (reader, writer): (Arc<dyn LedgerReader>, Arc<dyn LedgerWriter>) = if settings.sandbox {
        let ledger = Arc::new(MemoryLedger::new(now_epoch()));
        if let (LedgerStrategy::ObjectStore { application_id }, Some(session)) =
            (strategy, &session)
        {
            ledger.deploy_application(application_id, session.address());
        }
        let clock = ledger.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                clock.set_time(now_epoch());
            }
        });
        warn!("Sandbox mode: using an in-process ledger");
        (ledger.clone() as Arc<dyn LedgerReader>, ledger as Arc<dyn LedgerWriter>)
    } else {
        let client = IndexerClient::new(settings.ledger_endpoints())
            .context("failed to build ledger client")?;
        let client = Arc::new(client);
        info!("Ledger indexer at {}", settings.ledger.indexer_url);
        (client.clone() as Arc<dyn LedgerReader>, client as Arc<dyn LedgerWriter>)
    };

    // Verification engine
    let engine = VerificationEngine::new(
        reader.clone(),
        app_id.clone(),
        strategy,
        settings.engine_options()?,
    );
    info!("Verifying keys of application {} ({:?})", app_id, strategy);

    // Actuation
    let mut notifier = ActuationNotifier::new(
        Arc::new(SimulatedLock::new(settings.device.lock_pin)),
        Arc::new(AuditTrail::new(settings.device.audit_capacity)),
        settings.unlock_duration(),
    );
    if settings.device.publish_access_log {
        match &session {
            Some(session) => {
                notifier = notifier.with_publisher(AccessPublisher {
                    session: session.clone(),
                    ledger: writer.clone(),
                    app_id: app_id.clone(),
                });
            }
            None => {
                warn!("publish_access_log is set but no owner seed is configured; not publishing")
            }
        }
    }

    let mut server = ApiServer::new(engine, notifier, reader)
        .with_lock_account(settings.owner_address()?)
        .with_history_limit(settings.verifier.revocation_scan_limit);
    match session {
        Some(session) => {
            info!("Owner session {}", session.address());
            server = server.with_issuer(CredentialIssuer::new(writer, session, app_id, strategy));
        }
        None => info!("No owner seed configured; owner routes disabled"),
    }

    let addr = settings.bind_address()?;
    Arc::new(server)
        .run(addr, settings.request_timeout())
        .await
        .context("API server failed")
}

//! Sentinel worker
//!
//! One worker process: restores open trades from the shared store, then on
//! every cycle polls broker positions, ticks the risk circuits, closes
//! trades whose profit has retreated from its peak, judges any signals
//! waiting in the inbox, prunes stale cooldowns and writes a status file.
//! Several workers may share one store and one inbox.

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sentinel::broker::PaperBroker;
use sentinel::config::{Config, StoreBackend};
use sentinel::core::confidence::ConfidenceScorer;
use sentinel::core::coordinator::ExecutionCoordinator;
use sentinel::core::decision::{Decision, DecisionEngine};
use sentinel::core::regime::RegimeClassifier;
use sentinel::core::risk_circuit::RiskAction;
use sentinel::data::{MemoryStore, SharedStore, SqliteStore};
use sentinel::signals::SignalInbox;
use sentinel::status::{TrackedTrade, WorkerStatus};

const SEP: &str = "===========================================================";

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .init();
}

async fn run_cycle(coordinator: &ExecutionCoordinator, status: &mut WorkerStatus) {
    let ticks = match coordinator.sync_positions().await {
        Ok(t) => t,
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "position sync failed");
            status.last_error = Some(e.to_string());
            return;
        }
    };
    let profits: HashMap<String, Option<Decimal>> =
        ticks.iter().map(|t| (t.trade_id.clone(), t.profit)).collect();

    for event in coordinator.tick_risk_circuits(&ticks).await {
        match event.outcome.action {
            RiskAction::ProfitDrawdownExit => {
                let profit = profits.get(&event.trade_id).copied().flatten();
                match coordinator.close_trade(&event.trade_id, profit).await {
                    Ok(_) => status.drawdown_exits += 1,
                    Err(e) => {
                        error!(trade = %event.trade_id, error = %e, "drawdown exit failed");
                        status.last_error = Some(e.to_string());
                    }
                }
            }
            RiskAction::MoveSlBreakeven | RiskAction::TrailingStop => {
                info!(
                    trade = %event.trade_id,
                    action = %event.outcome.action,
                    new_sl = ?event.outcome.new_sl,
                    "{}",
                    event.outcome.reason
                );
                status.stop_moves += 1;
            }
            RiskAction::None => {}
        }
    }

    if let Err(e) = coordinator.prune_cooldowns().await {
        warn!(error = %e, "cooldown pruning failed");
    }

    status.tracked = coordinator
        .tracked_trades()
        .await
        .iter()
        .map(TrackedTrade::from)
        .collect();
    status.cycles += 1;
    status.last_cycle = Utc::now().timestamp();
}

/// Judge every signal waiting in the inbox. Paper prices are marked at each
/// signal's last close before it is considered.
async fn take_signals(
    engine: &DecisionEngine,
    broker: &PaperBroker,
    inbox: &SignalInbox,
    status: &mut WorkerStatus,
) {
    let signals = match inbox.drain() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "signal inbox unreadable");
            status.last_error = Some(e.to_string());
            return;
        }
    };

    for msg in signals {
        status.signals_seen += 1;
        if let Some(close) = msg.last_close() {
            broker.set_price(&msg.asset, close).await;
        }
        let candidate = match msg.into_candidate() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "signal dropped");
                continue;
            }
        };

        match engine.consider(&candidate).await {
            Decision::Opened { trade, score } => {
                status.trades_opened += 1;
                info!(trade = %trade.trade_id, platform = %trade.platform, total = score.total, "signal executed");
            }
            Decision::Refused { error, .. } if error.is_contention() => {
                debug!(asset = %candidate.asset, error = %error, "signal lost the race");
            }
            Decision::Refused { error, score } => {
                info!(asset = %candidate.asset, kind = error.kind(), total = score.total, "signal refused: {}", error);
            }
            Decision::Skipped { score } => {
                debug!(asset = %candidate.asset, total = score.total, threshold = score.threshold, "signal skipped");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = Config::load(&path).unwrap_or_else(|e| {
        eprintln!("Failed to load {}: {:#}. Exiting.", path, e);
        std::process::exit(1);
    });

    init_logging(&cfg.system.log_level);

    info!("{}", SEP);
    info!("  {} - decision and execution worker", cfg.system.name);
    info!("{}", SEP);

    let store: Arc<dyn SharedStore> = match cfg.store.backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&cfg.store.path, cfg.store.busy_timeout_ms)?),
        StoreBackend::Memory => {
            warn!("in-memory store: coordination is limited to this process");
            Arc::new(MemoryStore::new())
        }
    };

    let broker = Arc::new(PaperBroker::new(cfg.paper.margin_rate, cfg.paper.contract_size));
    for account in &cfg.accounts {
        broker.add_account(&account.platform, account.paper_balance).await;
        info!(platform = %account.platform, balance = %account.paper_balance, "paper account ready");
    }
    for symbol in &cfg.symbols {
        if let Some(price) = symbol.price {
            broker.set_price(&symbol.name, price).await;
        }
    }

    let worker_id = if cfg.system.worker_id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        cfg.system.worker_id.clone()
    };
    let coordinator = Arc::new(ExecutionCoordinator::with_worker_id(
        broker.clone(),
        store,
        cfg.execution.clone(),
        cfg.risk_circuit.clone(),
        worker_id.clone(),
    ));
    let engine = DecisionEngine::new(
        RegimeClassifier::new(cfg.regime.clone()),
        ConfidenceScorer::new(cfg.scoring.clone()),
        coordinator.clone(),
    );
    let inbox = (!cfg.system.signal_inbox.is_empty()).then(|| {
        info!(path = %cfg.system.signal_inbox, "signal inbox enabled");
        SignalInbox::new(&cfg.system.signal_inbox, &worker_id)
    });

    match coordinator.restore_open_trades().await {
        Ok(n) => info!(restored = n, "risk circuits re-armed"),
        Err(e) => warn!(error = %e, "could not restore open trades"),
    }

    let mut status = WorkerStatus {
        worker_id,
        running: true,
        start_time: Utc::now().timestamp(),
        ..Default::default()
    };

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.system.cycle_secs.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = interval.tick() => {
                run_cycle(&coordinator, &mut status).await;
                if let Some(inbox) = &inbox {
                    take_signals(&engine, &broker, inbox, &mut status).await;
                }
                if let Err(e) = status.save(&cfg.system.status_file) {
                    warn!(error = %e, "failed to write status file");
                }
            }
        }
    }

    status.running = false;
    if let Err(e) = status.save(&cfg.system.status_file) {
        warn!(error = %e, "failed to write status file");
    }
    info!(cycles = status.cycles, "worker stopped");
    Ok(())
}

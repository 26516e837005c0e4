use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use wallet_balance_sync::config::AppConfig;
use wallet_balance_sync::sync::{SyncEvent, WalletSyncOrchestrator};
use wallet_balance_sync::utils::format_token_amount;

#[tokio::main]
async fn main() {
	// Initialize tracing subscriber, debug for the sync engine itself
	let directive = match "wallet_balance_sync=debug".parse() {
		Ok(directive) => directive,
		Err(e) => {
			eprintln!("Invalid log directive: {}", e);
			return;
		}
	};
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(directive)
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting wallet balance sync service");

	let config = match AppConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			return;
		}
	};
	let decimals = config.coin.decimals;
	let coin = config.coin.name.clone();

	let orchestrator = match WalletSyncOrchestrator::new(config) {
		Ok(orchestrator) => orchestrator,
		Err(e) => {
			error!("Failed to create wallet sync service: {}", e);
			return;
		}
	};

	let mut balances = orchestrator.bus().subscribe_balances();
	let mut events = orchestrator.bus().subscribe_events();

	if let Err(e) = orchestrator.start().await {
		error!("Failed to start wallet sync: {}", e);
		return;
	}

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("Shutdown requested");
				break;
			}
			changed = balances.changed() => {
				if changed.is_err() {
					break;
				}
				let snapshot = balances.borrow_and_update().clone();
				for wallet in snapshot.iter() {
					info!(
						"{}: {} {} confirmed, {} {} predicted",
						wallet.label,
						format_token_amount(wallet.current, decimals),
						coin,
						format_token_amount(wallet.predicted, decimals),
						coin,
					);
				}
			}
			event = events.recv() => {
				match event {
					Ok(SyncEvent::CycleFailed { generation, error }) => {
						warn!("Refresh {} failed, retrying later: {}", generation, error);
					}
					Ok(_) => {}
					Err(RecvError::Lagged(missed)) => warn!("Missed {} sync events", missed),
					Err(RecvError::Closed) => break,
				}
			}
		}
	}

	orchestrator.shutdown();
}

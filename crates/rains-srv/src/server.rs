//! Server runner: wires the switchboard, engine and dispatcher together and
//! runs until interrupted.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::authority;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::engine::QueryEngine;
use crate::switchboard::{Outbound, Switchboard};

/// Run a node with the given configuration until ctrl-c.
pub async fn run(config: ServerConfig) -> crate::Result<()> {
    config.validate()?;

    let switchboard = Arc::new(Switchboard::bind(&config).await?);
    let outbound: Arc<dyn Outbound> = switchboard.clone();
    let engine = Arc::new(QueryEngine::from_config(&config, Arc::clone(&outbound)));

    for path in &config.zonefiles {
        authority::load_zonefile(&engine, path, config.authority_validity(), Utc::now())?;
    }

    let dispatcher = Dispatcher::new(Arc::clone(&engine), outbound, &config);
    let reaper = tokio::spawn(reap_loop(Arc::clone(&engine), config.reap_interval()));

    info!(
        addr = %switchboard.local_addr(),
        node = %config.node_name,
        peers = config.peers.len(),
        zonefiles = config.zonefiles.len(),
        "rainsd running"
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutting down");
                break;
            }
            inbound = switchboard.receive() => match inbound {
                Some(inbound) => dispatcher.handle_inbound(inbound, Utc::now()),
                None => break,
            },
        }
    }

    reaper.abort();
    Ok(())
}

async fn reap_loop(engine: Arc<QueryEngine>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match engine.reap(Utc::now()) {
            Ok(stats) if stats.is_empty() => {}
            Ok(stats) => debug!(
                assertions = stats.assertions_removed,
                queries = stats.queries_timed_out,
                "reaped"
            ),
            Err(e) => error!(error = %e, "reap failed"),
        }
    }
}

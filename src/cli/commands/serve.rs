//! `serve`: runs the `Scheduler` loop and the webhook HTTP listener side
//! by side until a shutdown signal arrives (spec.md §4.H, §4.J).
//!
//! Grounded on the teacher's `main.rs` top-level wiring, replacing the
//! single-purpose agent CLI with the two long-running tasks this system
//! actually has: the scheduler tick loop and the webhook listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tracing::{error, info};

use crate::cli::context::Context;
use crate::scheduler::Scheduler;
use crate::shutdown::ShutdownCoordinator;
use crate::webhook::{server::serve as serve_webhook, WebhookRouter};

pub async fn run(webhook_addr: String) -> Result<()> {
    let ctx = Context::bootstrap().await.context("bootstrapping context")?;

    let scheduler = Scheduler::new(
        ctx.queue.clone(),
        ctx.store.clone(),
        ctx.engine.clone(),
        ctx.reconciler.clone(),
        ctx.router.clone(),
        ctx.platform.clone(),
        ctx.launcher.clone(),
        ctx.agents.clone(),
        ctx.events.clone(),
        ctx.clock.clone(),
        Duration::from_secs(ctx.config.scheduler.sleep_interval_seconds),
        Duration::from_secs(ctx.config.scheduler.check_interval_seconds),
        ctx.config.scheduler.claim_batch_size,
        ctx.config.queue.stale_claim_seconds,
        ctx.config.scheduler.issue_dedupe_hours,
    );

    let webhook_router = Arc::new(WebhookRouter::new(
        ctx.router.clone(),
        ctx.engine.clone(),
        ctx.platform.clone(),
        ctx.launcher.clone(),
        ctx.agents.clone(),
        ctx.events.clone(),
        ctx.clock.clone(),
        ctx.config.webhook.secret.clone(),
        ctx.config.webhook.bot_author.clone(),
    ));

    let addr: SocketAddr = webhook_addr
        .parse()
        .with_context(|| format!("parsing webhook address `{webhook_addr}`"))?;

    let coordinator = ShutdownCoordinator::new();
    let shutdown_signal = coordinator.signal();

    let watch = ctx.watch.clone();
    let watch_task = tokio::spawn(async move { watch.run().await });

    let webhook_task = tokio::spawn(async move {
        if let Err(err) = serve_webhook(webhook_router, addr).await {
            error!(%err, "webhook listener exited");
        }
    });

    let scheduler_task = tokio::spawn(async move {
        if let Err(err) = scheduler.run(shutdown_signal).await {
            error!(%err, "scheduler loop exited with error");
        }
    });

    info!("nexus-orchestrator serving; press Ctrl-C to stop");
    coordinator.wait_for_shutdown().await?;

    scheduler_task.abort();
    webhook_task.abort();
    watch_task.abort();

    info!("shutdown complete");
    Ok(())
}

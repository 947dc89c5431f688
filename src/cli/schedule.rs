use super::ui;
use crate::App;
use anyhow::{Context, Result, bail};
use std::time::Duration;
use tracing::info;

/// Runs the background refresh until Ctrl-C.
pub async fn run(app: &App, interval: Option<Duration>) -> Result<()> {
    if interval.is_some_and(|d| d.is_zero()) {
        bail!("Update interval must be at least one second");
    }
    let scheduler = app.scheduler(interval);
    let interval_secs = interval.map_or(app.config.rates.update_interval_seconds, |d| d.as_secs());

    scheduler.start().await;
    println!(
        "{} every {}s. Press Ctrl-C to stop.",
        ui::style_text("Updating rates", ui::StyleType::Title),
        interval_secs
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stop requested");
    println!("{}", ui::style_text("Stopping...", ui::StyleType::Subtle));
    scheduler.stop().await;
    Ok(())
}

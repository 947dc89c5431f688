use super::ui;
use crate::App;
use crate::core::{CurrencyRegistry, HistoryRecord, PairKey, RatesSnapshot, UpdateReport};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use comfy_table::Cell;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

impl UpdateReport {
    pub fn display_as_table(&self) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![ui::header_cell("Source"), ui::header_cell("Rates")]);
        for (source, count) in &self.by_source {
            table.add_row(vec![Cell::new(source), ui::number_cell(count.to_string())]);
        }

        let status = if self.success {
            ui::style_text("OK", ui::StyleType::TotalValue)
        } else {
            ui::style_text("COMPLETED WITH ERRORS", ui::StyleType::Error)
        };

        let mut output = format!(
            "Rate update: {}\n\n",
            ui::style_text(&status, ui::StyleType::Title)
        );
        output.push_str(&table.to_string());
        output.push_str(&format!(
            "\n\n{} {}",
            ui::style_text("Total rates updated:", ui::StyleType::TotalLabel),
            self.total_rates
        ));
        if let Some(ts) = self.last_refresh {
            output.push_str(&format!("\nLast refresh: {}", ts.format(TIME_FORMAT)));
        }
        for error in &self.errors {
            output.push_str(&format!("\n{}", ui::style_text(error, ui::StyleType::Error)));
        }
        output.push_str(&ui::style_text(
            &format!("\nTook {:.2}s", self.duration_seconds),
            ui::StyleType::Subtle,
        ));
        output
    }
}

pub fn currencies_table(registry: &CurrencyRegistry) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Code"),
        ui::header_cell("Type"),
        ui::header_cell("Description"),
    ]);
    for currency in registry.iter() {
        let kind = if currency.is_crypto() { "Crypto" } else { "Fiat" };
        table.add_row(vec![
            Cell::new(&currency.code),
            Cell::new(kind),
            Cell::new(currency.display_info()),
        ]);
    }
    table.to_string()
}

/// Cached pairs, optionally only those involving `currency`.
pub fn rates_table(
    snapshot: &RatesSnapshot,
    currency: Option<&str>,
    ttl_seconds: u64,
    now: DateTime<Utc>,
) -> Option<String> {
    let currency = currency.map(|c| c.trim().to_uppercase());
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Pair"),
        ui::header_cell("Rate"),
        ui::header_cell("Updated"),
        ui::header_cell("Source"),
        ui::header_cell("Status"),
    ]);

    let mut rows = 0;
    for (key, record) in &snapshot.pairs {
        if let Some(code) = &currency {
            let involves = key
                .parse::<PairKey>()
                .is_ok_and(|pair| &pair.from == code || &pair.to == code);
            if !involves {
                continue;
            }
        }
        table.add_row(vec![
            Cell::new(key),
            ui::number_cell(ui::format_rate(record.rate)),
            Cell::new(record.updated_at.format(TIME_FORMAT)),
            Cell::new(&record.source),
            ui::freshness_cell(!record.is_fresh(now, ttl_seconds)),
        ]);
        rows += 1;
    }

    (rows > 0).then(|| table.to_string())
}

pub fn history_table(records: &[HistoryRecord]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Timestamp"),
        ui::header_cell("Rate"),
        ui::header_cell("Source"),
        ui::header_cell("Method"),
    ]);
    for record in records {
        table.add_row(vec![
            Cell::new(record.timestamp.format(TIME_FORMAT)),
            ui::number_cell(ui::format_rate(record.rate)),
            Cell::new(&record.source),
            Cell::new(record.meta.get("update_method").map_or("-", String::as_str)),
        ]);
    }
    table.to_string()
}

pub fn currencies(app: &App) -> Result<()> {
    println!("{}", currencies_table(&app.registry));
    Ok(())
}

pub async fn update_rates(app: &App, source: Option<&str>) -> Result<()> {
    let spinner = ui::new_spinner("Updating exchange rates...");
    let report = app.updater.run_update(source).await;
    spinner.finish_and_clear();

    println!("{}", report.display_as_table());
    if !report.success && report.total_rates == 0 {
        bail!("Rate update failed: {}", report.errors.join("; "));
    }
    Ok(())
}

pub async fn show_rates(app: &App, currency: Option<&str>) -> Result<()> {
    if let Some(code) = currency {
        app.registry.get(code)?;
    }

    let snapshot = app.rates.snapshot().await;
    match rates_table(&snapshot, currency, app.config.rates.ttl_seconds, Utc::now()) {
        Some(table) => {
            println!("{table}");
            if let Some(ts) = snapshot.last_refresh {
                println!("Last refresh: {}", ts.format(TIME_FORMAT));
            }
        }
        None => println!(
            "{}",
            ui::style_text(
                "No cached rates found. Run `valuta update-rates` first.",
                ui::StyleType::Warning
            )
        ),
    }
    Ok(())
}

pub async fn history(
    app: &App,
    pair: &str,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
) -> Result<()> {
    let pair: PairKey = pair.parse()?;
    let records = app.history.query(&pair, since, until, limit).await;
    if records.is_empty() {
        println!(
            "{}",
            ui::style_text(&format!("No history for {pair}"), ui::StyleType::Warning)
        );
        return Ok(());
    }

    println!(
        "History for {}\n\n{}",
        ui::style_text(&pair.to_string(), ui::StyleType::Title),
        history_table(&records)
    );
    Ok(())
}

pub async fn get_rate(app: &App, from: &str, to: &str) -> Result<()> {
    let resolved = app.resolver.resolve_detailed(from, to).await?;
    let from = from.trim().to_uppercase();
    let to = to.trim().to_uppercase();

    println!(
        "{} {}→{}: {}",
        ui::style_text("Rate", ui::StyleType::TotalLabel),
        from,
        to,
        ui::style_text(&ui::format_rate(resolved.rate), ui::StyleType::TotalValue)
    );
    println!(
        "Reverse rate {}→{}: {}",
        to,
        from,
        ui::format_rate(1.0 / resolved.rate)
    );

    let mut detail = format!("Path: {}", resolved.path);
    if let Some(ts) = resolved.updated_at {
        detail.push_str(&format!(", updated {}", ts.format(TIME_FORMAT)));
    }
    println!("{}", ui::style_text(&detail, ui::StyleType::Subtle));
    if resolved.stale {
        println!(
            "{}",
            ui::style_text(
                "Warning: this rate is older than the configured TTL",
                ui::StyleType::Warning
            )
        );
    }
    Ok(())
}

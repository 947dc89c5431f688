use super::ui;
use crate::App;
use crate::core::{PortfolioValue, Session};
use anyhow::Result;
use comfy_table::{Cell, Color};

impl PortfolioValue {
    pub fn display_as_table(&self) -> String {
        let target_currency = &self.target_currency;

        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Wallet"),
            ui::header_cell("Balance"),
            ui::header_cell("Rate"),
            ui::header_cell(&format!("Value ({target_currency})")),
        ]);

        for wallet in &self.wallets {
            let name = match &wallet.error {
                Some(_) => Cell::new(&wallet.currency).fg(Color::Red),
                None => Cell::new(&wallet.currency),
            };
            table.add_row(vec![
                name,
                ui::number_cell(format!("{:.8}", wallet.balance)),
                ui::format_optional_cell(wallet.rate, ui::format_rate),
                ui::format_optional_cell(wallet.value, |v| format!("{v:.2}")),
            ]);
        }

        let total_style_type = if self.total.is_some() {
            ui::StyleType::TotalValue
        } else {
            ui::StyleType::Error
        };
        let total = self.total.map_or("N/A".to_string(), |v| format!("{v:.2}"));

        let mut output = format!(
            "Portfolio of user {}\n\n",
            ui::style_text(&self.user_id.to_string(), ui::StyleType::Title)
        );
        output.push_str(&table.to_string());
        output.push_str(&format!(
            "\n\nTotal Value ({}): {}",
            ui::style_text(target_currency, ui::StyleType::TotalLabel),
            ui::style_text(&total, total_style_type)
        ));
        for wallet in &self.wallets {
            if let Some(error) = &wallet.error {
                output.push_str(&format!(
                    "\n{}",
                    ui::style_text(&format!("{}: {}", wallet.currency, error), ui::StyleType::Error)
                ));
            }
        }
        output
    }
}

pub async fn show(app: &App, session: &Session, base: Option<&str>) -> Result<()> {
    let value = app.portfolio_value(session, base).await?;
    if value.wallets.is_empty() {
        println!(
            "{}",
            ui::style_text(
                &format!(
                    "Portfolio of user {} is empty. Use `valuta deposit` to fund it.",
                    session.user_id
                ),
                ui::StyleType::Warning
            )
        );
        return Ok(());
    }
    println!("{}", value.display_as_table());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WalletValue;

    #[test]
    fn test_display_without_total() {
        let value = PortfolioValue {
            user_id: 1,
            target_currency: "USD".to_string(),
            wallets: vec![
                WalletValue {
                    currency: "USD".to_string(),
                    balance: 100.0,
                    rate: Some(1.0),
                    value: Some(100.0),
                    error: None,
                },
                WalletValue {
                    currency: "JPY".to_string(),
                    balance: 500.0,
                    rate: None,
                    value: None,
                    error: Some("Rate JPY->USD is unavailable, retry later".to_string()),
                },
            ],
            total: None,
        };
        let output = value.display_as_table();
        assert!(output.contains("Value (USD)"));
        assert!(output.contains("N/A"));
        assert!(output.contains("JPY->USD"));
    }
}

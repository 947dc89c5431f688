use super::ui;
use crate::App;
use crate::core::{DepositResult, Session, TradeAction, TransactionResult};
use anyhow::Result;
use comfy_table::Cell;

impl TransactionResult {
    pub fn display_as_table(&self) -> String {
        let verb = match self.action {
            TradeAction::Buy => "Bought",
            TradeAction::Sell => "Sold",
            TradeAction::Deposit => "Deposited",
        };
        let base_label = match self.action {
            TradeAction::Sell => "Proceeds",
            _ => "Cost",
        };

        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Wallet"),
            ui::header_cell("Before"),
            ui::header_cell("After"),
        ]);
        table.add_row(vec![
            Cell::new(&self.currency),
            ui::number_cell(format!("{:.8}", self.currency_before)),
            ui::number_cell(format!("{:.8}", self.currency_after)),
        ]);
        table.add_row(vec![
            Cell::new(&self.base_currency),
            ui::number_cell(format!("{:.2}", self.base_before)),
            ui::number_cell(format!("{:.2}", self.base_after)),
        ]);

        format!(
            "{} {} {} at {} {}/{}\n{}: {}\n\n{}",
            ui::style_text(verb, ui::StyleType::Title),
            self.amount,
            self.currency,
            ui::format_rate(self.rate),
            self.base_currency,
            self.currency,
            base_label,
            ui::style_text(
                &format!("{:.2} {}", self.base_amount, self.base_currency),
                ui::StyleType::TotalValue
            ),
            table
        )
    }
}

impl DepositResult {
    pub fn display(&self) -> String {
        format!(
            "{} {} {}. Balance: {} -> {}",
            ui::style_text("Deposited", ui::StyleType::Title),
            self.amount,
            self.currency,
            self.balance_before,
            ui::style_text(&self.balance_after.to_string(), ui::StyleType::TotalValue)
        )
    }
}

pub async fn deposit(app: &App, session: &Session, currency: &str, amount: f64) -> Result<()> {
    let result = app.ledger.deposit(session, currency, amount).await?;
    println!("{}", result.display());
    Ok(())
}

pub async fn buy(app: &App, session: &Session, currency: &str, amount: f64) -> Result<()> {
    let result = app.ledger.buy(session, currency, amount).await?;
    println!("{}", result.display_as_table());
    Ok(())
}

pub async fn sell(app: &App, session: &Session, currency: &str, amount: f64) -> Result<()> {
    let result = app.ledger.sell(session, currency, amount).await?;
    println!("{}", result.display_as_table());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_display() {
        let result = TransactionResult {
            action: TradeAction::Buy,
            currency: "BTC".to_string(),
            amount: 0.01,
            rate: 50000.0,
            base_currency: "USD".to_string(),
            base_amount: 500.0,
            currency_before: 0.0,
            currency_after: 0.01,
            base_before: 1000.0,
            base_after: 500.0,
        };
        let output = result.display_as_table();
        assert!(output.contains("0.01 BTC"));
        assert!(output.contains("500.00 USD"));
        assert!(output.contains("1000.00"));
    }
}

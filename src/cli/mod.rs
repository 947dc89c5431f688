//! Terminal presentation for each command

pub mod portfolio;
pub mod rates;
pub mod schedule;
pub mod setup;
pub mod trade;
pub mod ui;

pub mod artifact;
pub mod backtest;
pub mod boosting;
pub mod calibration;
pub mod config;
pub mod edge;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod forest;
pub mod history;
pub mod ledger;
pub mod ledger_store;
pub mod logging;
pub mod market;
pub mod outcome;
pub mod pick;
pub mod pipeline;
pub mod providers;
pub mod report_export;
pub mod scheduler;
pub mod synthetic;
pub mod team_form;
pub mod training;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_support;

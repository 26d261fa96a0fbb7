use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::backtest::{BacktestRun, ComparisonReport, SweepReport};

pub struct ExportReport {
    pub runs: usize,
    pub bets: usize,
    pub skipped: usize,
    pub compared: bool,
}

enum Cell {
    Text(String),
    Num(f64),
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Num(value)
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Num(value as f64)
    }
}

type Row = Vec<Cell>;

/// Sweep runs, the bets of the headline run, skipped matches and an optional
/// challenger comparison, one sheet each.
pub fn export_backtest(
    path: &Path,
    sweep: &SweepReport,
    headline: Option<&BacktestRun>,
    comparison: Option<&ComparisonReport>,
) -> Result<ExportReport> {
    let mut summary_rows: Vec<Row> = vec![
        vec!["Provenance".into(), sweep.provenance.label().into()],
        vec![
            "Live validated".into(),
            if sweep.provenance.is_live_validated() { "yes" } else { "NO" }.into(),
        ],
        vec![
            "Best threshold".into(),
            sweep
                .best_threshold
                .map(|t| format!("{t:.2}"))
                .unwrap_or_else(|| "n/a".to_string())
                .into(),
        ],
    ];
    if let Some(run) = sweep.runs.first() {
        summary_rows.push(vec!["Model".into(), run.model_id.clone().into()]);
        summary_rows.push(vec!["Matches".into(), run.total_matches.into()]);
        summary_rows.push(vec!["Evaluated".into(), run.evaluated.into()]);
        summary_rows.push(vec!["Brier".into(), run.metrics.brier.into()]);
        summary_rows.push(vec!["Log loss".into(), run.metrics.log_loss.into()]);
        summary_rows.push(vec!["Accuracy".into(), run.metrics.accuracy.into()]);
        summary_rows.push(vec![
            "Completed".into(),
            if run.completed { "yes" } else { "partial (cancelled)" }.into(),
        ]);
    }

    let mut sweep_rows: Vec<Row> = vec![run_header()];
    sweep_rows.extend(sweep.runs.iter().map(|r| run_row("sweep", r)));

    let headline = headline.or_else(|| {
        sweep
            .best_threshold
            .and_then(|t| sweep.runs.iter().find(|r| r.threshold == t))
    });
    let mut bet_rows: Vec<Row> = vec![vec![
        "Fixture".into(),
        "Prediction".into(),
        "Actual".into(),
        "Confidence".into(),
        "Odds".into(),
        "Edge %".into(),
        "Won".into(),
        "Profit".into(),
    ]];
    let mut skipped_rows: Vec<Row> = vec![vec!["Fixture".into(), "Reason".into()]];
    if let Some(run) = headline {
        for b in &run.bets {
            bet_rows.push(vec![
                b.fixture.clone().into(),
                b.prediction.label().into(),
                b.actual.label().into(),
                b.confidence.into(),
                b.odds.into(),
                b.edge_pct.into(),
                if b.won { "W" } else { "L" }.into(),
                b.profit.into(),
            ]);
        }
        for s in &run.skipped {
            skipped_rows.push(vec![s.fixture.clone().into(), s.reason.clone().into()]);
        }
    }

    let mut compare_rows: Vec<Row> = vec![run_header()];
    if let Some(cmp) = comparison {
        compare_rows.push(run_row("baseline", &cmp.baseline));
        compare_rows.push(run_row("challenger", &cmp.challenger));
        compare_rows.push(Vec::new());
        compare_rows.push(vec!["Win rate delta".into(), cmp.win_rate_delta.into()]);
        compare_rows.push(vec!["ROI delta".into(), cmp.roi_delta.into()]);
        compare_rows.push(vec!["Profit delta".into(), cmp.profit_delta.into()]);
        compare_rows.push(vec!["Log loss delta".into(), cmp.log_loss_delta.into()]);
    }

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Summary")?;
        write_rows(sheet, &summary_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Sweep")?;
        write_rows(sheet, &sweep_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Bets")?;
        write_rows(sheet, &bet_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Skipped")?;
        write_rows(sheet, &skipped_rows)?;
    }
    if comparison.is_some() {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Comparison")?;
        write_rows(sheet, &compare_rows)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;

    Ok(ExportReport {
        runs: sweep.runs.len(),
        bets: bet_rows.len().saturating_sub(1),
        skipped: skipped_rows.len().saturating_sub(1),
        compared: comparison.is_some(),
    })
}

fn run_header() -> Row {
    [
        "Label", "Model", "Threshold", "Bets", "Wins", "Losses", "Win rate", "Break-even",
        "Staked", "Profit", "ROI", "Avg odds", "Unpriced", "Log loss",
    ]
    .into_iter()
    .map(Cell::from)
    .collect()
}

fn run_row(label: &str, run: &BacktestRun) -> Row {
    vec![
        label.into(),
        run.model_id.clone().into(),
        run.threshold.into(),
        run.bets_placed.into(),
        run.wins.into(),
        run.losses.into(),
        run.win_rate.into(),
        run.break_even_rate.into(),
        run.total_staked.into(),
        run.total_profit.into(),
        run.roi.into(),
        run.avg_odds_taken.into(),
        run.unpriced.into(),
        run.metrics.log_loss.into(),
    ]
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Row]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, cell) in row.iter().enumerate() {
            let (r, c) = (row_idx as u32, col_idx as u16);
            match cell {
                Cell::Text(value) => worksheet.write_string(r, c, value),
                Cell::Num(value) if value.is_finite() => worksheet.write_number(r, c, *value),
                Cell::Num(_) => worksheet.write_string(r, c, ""),
            }
            .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::export_backtest;
    use crate::backtest::{BacktestConfig, Harness};
    use crate::market::MarketOdds;
    use crate::test_support::{played, prior_artifact};

    #[test]
    fn writes_a_workbook() {
        let start = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let corpus: Vec<_> = (0..12)
            .map(|i| {
                let (h, a) = if i % 2 == 0 { ("A", "B") } else { ("B", "A") };
                let odds = Some(MarketOdds::new(2.2, 3.3, 3.4));
                played(h, a, start + Duration::days(i * 7), (1, 0), odds)
            })
            .collect();
        let harness = Harness::new(BacktestConfig::default());
        let art = prior_artifact(&[0.5, 0.25, 0.25]);
        let sweep = harness.sweep(&corpus, &art, &[0.0, 0.5]);
        let cmp = harness.compare(&corpus, &art, &art, 0.0);
        let path = std::env::temp_dir().join(format!("kicklab_export_{}.xlsx", std::process::id()));
        let report = export_backtest(&path, &sweep, sweep.runs.first(), Some(&cmp)).unwrap();
        assert_eq!(report.runs, 2);
        assert_eq!(report.bets, 12);
        assert!(report.compared);
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }
}

//! Feature calculator.
//!
//! Pure transformation from a window snapshot to one [`FeatureVector`] per
//! tick. Every rolling column is lagged by one row so the value stored
//! against tick `t` only sees ticks before `t`.

use tick_features_data::{volume_to_column, FeatureVector, RawTick};

/// Rolling spans, labelled 5 / 30 / 365 in column names (a week, a month
/// and a year of trading days).
pub const SHORT_WINDOW: usize = 5;
pub const MEDIUM_WINDOW: usize = 21;
pub const LONG_WINDOW: usize = 252;

/// Minimum number of ticks before anything is derived.
pub const MIN_ROWS: usize = 2;

type Column = Vec<Option<f64>>;

/// Result of a calculation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureTable {
    /// Fewer than [`MIN_ROWS`] ticks: the window is handed back unchanged.
    Insufficient(Vec<RawTick>),
    /// One engineered row per input tick, in window order.
    Computed(Vec<FeatureVector>),
}

impl FeatureTable {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Insufficient(ticks) => ticks.len(),
            Self::Computed(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows in storage shape. Insufficient ticks become raw-only vectors.
    #[must_use]
    pub fn into_vectors(self) -> Vec<FeatureVector> {
        match self {
            Self::Insufficient(ticks) => ticks.iter().map(FeatureVector::from_tick).collect(),
            Self::Computed(rows) => rows,
        }
    }
}

/// Stateless feature engineering over a window snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureCalculator;

impl FeatureCalculator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the full feature table for `window`.
    ///
    /// Windows shorter than [`MIN_ROWS`] are returned untouched. Leading rows
    /// without enough history carry `None`, as do ratios and returns whose
    /// denominator is zero or missing.
    #[must_use]
    pub fn calculate_all(&self, window: &[RawTick]) -> FeatureTable {
        if window.len() < MIN_ROWS {
            return FeatureTable::Insufficient(window.to_vec());
        }

        let close: Column = window.iter().map(|t| Some(t.close)).collect();
        #[allow(clippy::cast_precision_loss)]
        let volume: Column = window.iter().map(|t| Some(t.volume as f64)).collect();

        let open_1 = shift(&window.iter().map(|t| Some(t.open)).collect::<Column>());
        let high_1 = shift(&window.iter().map(|t| Some(t.high)).collect::<Column>());
        let low_1 = shift(&window.iter().map(|t| Some(t.low)).collect::<Column>());
        let close_1 = shift(&close);

        let [avg_price_5, avg_price_30, avg_price_365] = lagged_spans(&close, rolling_mean);
        let [avg_volume_5, avg_volume_30, avg_volume_365] = lagged_spans(&volume, rolling_mean);
        let [std_price_5, std_price_30, std_price_365] = lagged_spans(&close, rolling_std);
        let [std_volume_5, std_volume_30, std_volume_365] = lagged_spans(&volume, rolling_std);

        let return_1 = shift(&pct_change(&close, 1));
        let return_5 = shift(&pct_change(&close, SHORT_WINDOW));
        let return_30 = shift(&pct_change(&close, MEDIUM_WINDOW));
        let return_365 = shift(&pct_change(&close, LONG_WINDOW));

        // Momentum rolls over the already-lagged return_1 and lags once more.
        let [moving_avg_5, moving_avg_30, moving_avg_365] = lagged_spans(&return_1, rolling_mean);

        let rows = window
            .iter()
            .enumerate()
            .map(|(i, tick)| {
                let mut row = FeatureVector::from_tick(tick);

                row.open_1 = open_1[i];
                row.high_1 = high_1[i];
                row.low_1 = low_1[i];
                row.close_1 = close_1[i];
                row.volume_1 = i
                    .checked_sub(1)
                    .map(|prev| volume_to_column(window[prev].volume));

                row.avg_price_5 = avg_price_5[i];
                row.avg_price_30 = avg_price_30[i];
                row.avg_price_365 = avg_price_365[i];
                row.ratio_avg_price_5_30 = ratio(avg_price_5[i], avg_price_30[i]);
                row.ratio_avg_price_5_365 = ratio(avg_price_5[i], avg_price_365[i]);
                row.ratio_avg_price_30_365 = ratio(avg_price_30[i], avg_price_365[i]);

                row.avg_volume_5 = avg_volume_5[i];
                row.avg_volume_30 = avg_volume_30[i];
                row.avg_volume_365 = avg_volume_365[i];
                row.ratio_avg_volume_5_30 = ratio(avg_volume_5[i], avg_volume_30[i]);
                row.ratio_avg_volume_5_365 = ratio(avg_volume_5[i], avg_volume_365[i]);
                row.ratio_avg_volume_30_365 = ratio(avg_volume_30[i], avg_volume_365[i]);

                row.std_price_5 = std_price_5[i];
                row.std_price_30 = std_price_30[i];
                row.std_price_365 = std_price_365[i];
                row.ratio_std_price_5_30 = ratio(std_price_5[i], std_price_30[i]);
                row.ratio_std_price_5_365 = ratio(std_price_5[i], std_price_365[i]);
                row.ratio_std_price_30_365 = ratio(std_price_30[i], std_price_365[i]);

                row.std_volume_5 = std_volume_5[i];
                row.std_volume_30 = std_volume_30[i];
                row.std_volume_365 = std_volume_365[i];
                row.ratio_std_volume_5_30 = ratio(std_volume_5[i], std_volume_30[i]);
                row.ratio_std_volume_5_365 = ratio(std_volume_5[i], std_volume_365[i]);
                row.ratio_std_volume_30_365 = ratio(std_volume_30[i], std_volume_365[i]);

                row.return_1 = return_1[i];
                row.return_5 = return_5[i];
                row.return_30 = return_30[i];
                row.return_365 = return_365[i];

                row.moving_avg_5 = moving_avg_5[i];
                row.moving_avg_30 = moving_avg_30[i];
                row.moving_avg_365 = moving_avg_365[i];

                row
            })
            .collect();

        FeatureTable::Computed(rows)
    }
}

/// Applies `stat` over the three spans and lags each result by one row.
fn lagged_spans(
    values: &[Option<f64>],
    stat: fn(&[Option<f64>], usize) -> Column,
) -> [Column; 3] {
    [SHORT_WINDOW, MEDIUM_WINDOW, LONG_WINDOW].map(|span| shift(&stat(values, span)))
}

/// Moves every value down one row; the first row becomes `None`.
fn shift(values: &[Option<f64>]) -> Column {
    let mut shifted = Vec::with_capacity(values.len());
    if values.is_empty() {
        return shifted;
    }
    shifted.push(None);
    shifted.extend_from_slice(&values[..values.len() - 1]);
    shifted
}

/// Complete trailing window ending at `end` (inclusive), or `None` if it is
/// too short or contains a missing value.
fn full_window(values: &[Option<f64>], end: usize, span: usize) -> Option<Vec<f64>> {
    if span == 0 || end + 1 < span {
        return None;
    }
    values[end + 1 - span..=end].iter().copied().collect()
}

fn rolling_mean(values: &[Option<f64>], span: usize) -> Column {
    (0..values.len())
        .map(|end| {
            let window = full_window(values, end, span)?;
            #[allow(clippy::cast_precision_loss)]
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            finite(mean)
        })
        .collect()
}

/// Sample standard deviation (n - 1 denominator).
fn rolling_std(values: &[Option<f64>], span: usize) -> Column {
    (0..values.len())
        .map(|end| {
            if span < 2 {
                return None;
            }
            let window = full_window(values, end, span)?;
            #[allow(clippy::cast_precision_loss)]
            let n = window.len() as f64;
            let mean = window.iter().sum::<f64>() / n;
            let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
            finite(variance.sqrt())
        })
        .collect()
}

/// Simple return over `periods` rows: `(v[t] - v[t-k]) / v[t-k]`.
fn pct_change(values: &[Option<f64>], periods: usize) -> Column {
    (0..values.len())
        .map(|t| {
            if t < periods {
                return None;
            }
            let current = values[t]?;
            let base = values[t - periods]?;
            ratio(Some(current - base), Some(base))
        })
        .collect()
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let denominator = denominator?;
    if denominator == 0.0 {
        return None;
    }
    finite(numerator? / denominator)
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

//! Combining candle pages into one continuous series.
//!
//! Upstream pages are aggregated independently per bucket, so they can
//! overlap and disagree at their edges. These functions are pure. The
//! adapter applies them in the order merge, smooth, select, invert.

use rust_decimal::Decimal;

use crate::candle::Candle;

/// Merge fetched pages into an existing series.
///
/// The result is sorted ascending by `time` with unique timestamps. When two
/// bars share a timestamp the most recently fetched one wins: pages override
/// `existing`, and later pages override earlier ones.
pub fn merge_sorted(pages: Vec<Vec<Candle>>, existing: &[Candle]) -> Vec<Candle> {
    let total = existing.len() + pages.iter().map(Vec::len).sum::<usize>();
    let mut merged = Vec::with_capacity(total);
    merged.extend_from_slice(existing);
    for page in pages {
        merged.extend(page);
    }

    // Stable, so equal timestamps keep fetch order.
    merged.sort_by_key(|c| c.time);
    merged.dedup_by(|later, kept| {
        if later.time == kept.time {
            std::mem::swap(later, kept);
            true
        } else {
            false
        }
    });
    merged
}

/// Force each bar's close onto the next bar's open so the rendered line has
/// no gaps, widening high/low to keep bounding the bar.
pub fn smooth_discontinuities(mut series: Vec<Candle>) -> Vec<Candle> {
    for i in 0..series.len().saturating_sub(1) {
        let next_open = series[i + 1].open;
        let bar = &mut series[i];
        if bar.close != next_open {
            bar.close = next_open;
        }
        bar.high = bar.high.max(bar.open).max(bar.close);
        bar.low = bar.low.min(bar.open).min(bar.close);
    }
    series
}

/// Bars strictly between `from_ms` and `to_ms`. Bars exactly on either bound
/// are excluded.
pub fn select_range(series: &[Candle], from_ms: i64, to_ms: i64) -> Vec<Candle> {
    series
        .iter()
        .filter(|c| c.time > from_ms && c.time < to_ms)
        .cloned()
        .collect()
}

/// Express bars in the opposite quote direction.
///
/// Prices become reciprocals and high/low swap roles. Bars with a zero price
/// have no reciprocal and are dropped.
pub fn invert(series: &[Candle]) -> Vec<Candle> {
    series.iter().filter_map(invert_candle).collect()
}

fn invert_candle(c: &Candle) -> Option<Candle> {
    Some(Candle {
        time: c.time,
        open: reciprocal(c.open)?,
        high: reciprocal(c.low)?,
        low: reciprocal(c.high)?,
        close: reciprocal(c.close)?,
    })
}

fn reciprocal(value: Decimal) -> Option<Decimal> {
    Decimal::ONE.checked_div(value)
}

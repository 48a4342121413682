//! Parquet layout for exported candle series.
//!
//! Prices are stored as strings so reciprocal prices of reverse pairs keep
//! their full decimal precision.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;

use crate::candle::Candle;
use crate::error::CandleError;

pub fn candle_schema() -> Schema {
    Schema::new(vec![
        Field::new(
            "time",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("open", DataType::Utf8, false),
        Field::new("high", DataType::Utf8, false),
        Field::new("low", DataType::Utf8, false),
        Field::new("close", DataType::Utf8, false),
    ])
}

fn price_column(candles: &[Candle], price: impl Fn(&Candle) -> Decimal) -> ArrayRef {
    let values: Vec<String> = candles.iter().map(|c| price(c).to_string()).collect();
    Arc::new(StringArray::from(values))
}

pub fn candles_to_record_batch(candles: &[Candle]) -> Result<RecordBatch, CandleError> {
    let schema = Arc::new(candle_schema());
    let times: Vec<i64> = candles.iter().map(|c| c.time).collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampMillisecondArray::from(times).with_timezone("UTC")),
        price_column(candles, |c| c.open),
        price_column(candles, |c| c.high),
        price_column(candles, |c| c.low),
        price_column(candles, |c| c.close),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

fn string_column<'a>(
    batch: &'a RecordBatch,
    index: usize,
    name: &str,
) -> Result<&'a StringArray, CandleError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| CandleError::InvalidData(format!("expected {name} column")))
}

fn parse_price(column: &StringArray, row: usize, name: &str) -> Result<Decimal, CandleError> {
    column
        .value(row)
        .parse()
        .map_err(|e| CandleError::InvalidData(format!("invalid {name}: {e}")))
}

pub fn record_batch_to_candles(batch: &RecordBatch) -> Result<Vec<Candle>, CandleError> {
    let times = batch
        .column(0)
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .ok_or_else(|| CandleError::InvalidData("expected time column".into()))?;
    let opens = string_column(batch, 1, "open")?;
    let highs = string_column(batch, 2, "high")?;
    let lows = string_column(batch, 3, "low")?;
    let closes = string_column(batch, 4, "close")?;

    let mut candles = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        candles.push(Candle {
            time: times.value(i),
            open: parse_price(opens, i, "open")?,
            high: parse_price(highs, i, "high")?,
            low: parse_price(lows, i, "low")?,
            close: parse_price(closes, i, "close")?,
        });
    }

    Ok(candles)
}

/// Write a series to a Parquet file, creating parent directories as needed.
/// Overwrites an existing file.
pub fn write_parquet(path: &Path, candles: &[Candle]) -> Result<(), CandleError> {
    let batch = candles_to_record_batch(candles)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<Vec<Candle>, CandleError> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let reader = builder.build()?;

    let mut all_candles = Vec::new();
    for batch in reader {
        let batch = batch?;
        let mut candles = record_batch_to_candles(&batch)?;
        all_candles.append(&mut candles);
    }

    Ok(all_candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_candles() -> Vec<Candle> {
        vec![
            Candle {
                time: 1_736_942_400_000,
                open: dec!(0.000412345678),
                high: dec!(0.0005),
                low: dec!(0.0004),
                close: dec!(0.00045),
            },
            Candle {
                time: 1_736_943_300_000,
                open: dec!(0.00045),
                high: dec!(0.00046),
                low: dec!(0.00044),
                close: dec!(0.000455),
            },
        ]
    }

    #[test]
    fn record_batch_keeps_columns() {
        let batch = candles_to_record_batch(&sample_candles()).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 5);
        assert_eq!(batch.schema().field(0).name(), "time");
        assert_eq!(record_batch_to_candles(&batch).unwrap(), sample_candles());
    }

    #[test]
    fn empty_series_writes_zero_rows() {
        let batch = candles_to_record_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert!(record_batch_to_candles(&batch).unwrap().is_empty());
    }

    #[test]
    fn parquet_file_preserves_reciprocal_precision() {
        let inverted = vec![Candle {
            time: 1_736_942_400_000,
            open: dec!(1) / dec!(110),
            high: dec!(1) / dec!(90),
            low: dec!(1) / dec!(120),
            close: dec!(1) / dec!(3),
        }];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports/pair.parquet");

        write_parquet(&path, &inverted).unwrap();
        assert_eq!(read_parquet(&path).unwrap(), inverted);
    }
}

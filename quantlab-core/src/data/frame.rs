//! Conversion between panel rows and Polars frames.
//!
//! Reading is lenient about physical types: dates may be stored as Date or
//! ISO strings and numeric columns as any numeric type. Writing always uses
//! Date and Float64.

use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::Path;

use super::PanelError;
use crate::domain::AsOfPanelRow;

/// Columns every panel frame must carry.
pub const REQUIRED_COLUMNS: [&str; 3] = ["asset_id", "asof_date", "adv20_dollar"];

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn days_since_epoch(d: NaiveDate) -> i32 {
    (d - epoch()).num_days() as i32
}

fn polars_err(context: &'static str) -> impl Fn(PolarsError) -> PanelError {
    move |e| PanelError::Parquet(format!("{context}: {e}"))
}

// ── Rows → frame ────────────────────────────────────────────────────

pub fn rows_to_dataframe(rows: &[AsOfPanelRow]) -> Result<DataFrame, PanelError> {
    let float = |name: &str, get: fn(&AsOfPanelRow) -> Option<f64>| {
        Column::new(name.into(), rows.iter().map(get).collect::<Vec<_>>())
    };
    let asof: Vec<i32> = rows.iter().map(|r| days_since_epoch(r.asof_date)).collect();
    let feature: Vec<Option<i32>> = rows
        .iter()
        .map(|r| r.feature_date.map(days_since_epoch))
        .collect();

    DataFrame::new(vec![
        Column::new(
            "asset_id".into(),
            rows.iter().map(|r| r.asset_id.clone()).collect::<Vec<_>>(),
        ),
        Column::new(
            "asset_class".into(),
            rows.iter().map(|r| r.asset_class.clone()).collect::<Vec<_>>(),
        ),
        Column::new("asof_date".into(), asof)
            .cast(&DataType::Date)
            .map_err(polars_err("asof_date cast"))?,
        Column::new("feature_date".into(), feature)
            .cast(&DataType::Date)
            .map_err(polars_err("feature_date cast"))?,
        float("ret_20d", |r| r.ret_20d),
        float("ret_5d", |r| r.ret_5d),
        float("rsi_14", |r| r.rsi_14),
        float("macd_hist", |r| r.macd_hist),
        float("atr_pct_14", |r| r.atr_pct_14),
        float("ewma_vol_20", |r| r.ewma_vol_20),
        float("boll_z_20", |r| r.boll_z_20),
        float("adv20_dollar", |r| r.adv20_dollar),
        float("close_raw", |r| r.close_raw),
        float("sma_200", |r| r.sma_200),
        float("fwd_ret_5d", |r| r.fwd_ret_5d),
    ])
    .map_err(polars_err("dataframe creation"))
}

// ── Frame → rows ────────────────────────────────────────────────────

/// Float column as `Option<f64>` per row; the first name found wins and a
/// column absent under every name reads as all-missing.
fn floats(df: &DataFrame, names: &[&str]) -> Result<Vec<Option<f64>>, PanelError> {
    for name in names {
        if let Ok(col) = df.column(name) {
            let cast = col
                .cast(&DataType::Float64)
                .map_err(polars_err("float column cast"))?;
            let ca = cast.f64().map_err(polars_err("float column type"))?;
            return Ok(ca.into_iter().collect());
        }
    }
    Ok(vec![None; df.height()])
}

fn strings(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, PanelError> {
    match df.column(name) {
        Ok(col) => {
            let cast = col
                .cast(&DataType::String)
                .map_err(polars_err("string column cast"))?;
            let ca = cast.str().map_err(polars_err("string column type"))?;
            Ok(ca.into_iter().map(|v| v.map(str::to_string)).collect())
        }
        Err(_) => Ok(vec![None; df.height()]),
    }
}

/// Date column from either a Date or an ISO string column. Unparseable
/// values read as missing.
fn dates(df: &DataFrame, name: &str) -> Result<Vec<Option<NaiveDate>>, PanelError> {
    Ok(strings(df, name)?
        .into_iter()
        .map(|v| v.and_then(|s| parse_day(&s)))
        .collect())
}

/// Parse the `YYYY-MM-DD` prefix of a date or datetime string.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Convert a frame to panel rows.
///
/// Rows missing `asset_id` or `asof_date` are dropped (they cannot be
/// placed in any fold). `default_class` fills a missing `asset_class`.
/// Returns the rows and the number dropped.
pub fn dataframe_to_rows(
    df: &DataFrame,
    default_class: Option<&str>,
) -> Result<(Vec<AsOfPanelRow>, usize), PanelError> {
    let asset_id = strings(df, "asset_id")?;
    let asset_class = strings(df, "asset_class")?;
    let asof = dates(df, "asof_date")?;
    let feature = dates(df, "feature_date")?;
    let ret_20d = floats(df, &["ret_20d"])?;
    let ret_5d = floats(df, &["ret_5d"])?;
    let rsi_14 = floats(df, &["rsi_14"])?;
    let macd_hist = floats(df, &["macd_hist"])?;
    let atr_pct_14 = floats(df, &["atr_pct_14"])?;
    let ewma_vol_20 = floats(df, &["ewma_vol_20"])?;
    let boll_z_20 = floats(df, &["boll_z_20"])?;
    let adv = floats(df, &["adv20_dollar"])?;
    let close_raw = floats(df, &["close_raw"])?;
    let sma_200 = floats(df, &["sma_200"])?;
    let fwd = floats(df, &["fwd_ret_5d", "forward_return_5d"])?;

    let mut rows = Vec::with_capacity(df.height());
    let mut dropped = 0;
    for i in 0..df.height() {
        let (Some(id), Some(asof_date)) = (asset_id[i].clone(), asof[i]) else {
            dropped += 1;
            continue;
        };
        if id.is_empty() {
            dropped += 1;
            continue;
        }
        let class = asset_class[i]
            .clone()
            .or_else(|| default_class.map(str::to_string))
            .unwrap_or_default()
            .to_ascii_lowercase();
        rows.push(AsOfPanelRow {
            asset_id: id,
            asset_class: class,
            asof_date,
            feature_date: feature[i],
            ret_20d: ret_20d[i],
            ret_5d: ret_5d[i],
            rsi_14: rsi_14[i],
            macd_hist: macd_hist[i],
            atr_pct_14: atr_pct_14[i],
            ewma_vol_20: ewma_vol_20[i],
            boll_z_20: boll_z_20[i],
            adv20_dollar: adv[i],
            close_raw: close_raw[i],
            sma_200: sma_200[i],
            fwd_ret_5d: fwd[i],
        });
    }
    Ok((rows, dropped))
}

// ── Parquet I/O ─────────────────────────────────────────────────────

pub fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), PanelError> {
    let file = fs::File::create(path)?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(polars_err("write parquet"))?;
    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<DataFrame, PanelError> {
    let file = fs::File::open(path)?;
    ParquetReader::new(file)
        .finish()
        .map_err(polars_err("read parquet"))
}

/// Write rows to a parquet file.
pub fn write_rows(rows: &[AsOfPanelRow], path: &Path) -> Result<(), PanelError> {
    let mut df = rows_to_dataframe(rows)?;
    write_parquet(&mut df, path)
}

/// Read a parquet file that must carry `REQUIRED_COLUMNS` and at least one
/// row.
pub fn read_rows_validated(path: &Path) -> Result<Vec<AsOfPanelRow>, PanelError> {
    let df = read_parquet(path)?;
    if df.height() == 0 {
        return Err(PanelError::Validation("empty parquet file".into()));
    }
    for name in REQUIRED_COLUMNS {
        if df.column(name).is_err() {
            return Err(PanelError::Validation(format!("missing column '{name}'")));
        }
    }
    Ok(dataframe_to_rows(&df, None)?.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, day: u32) -> AsOfPanelRow {
        let mut r = AsOfPanelRow::empty(id, "stock", NaiveDate::from_ymd_opt(2024, 2, day).unwrap());
        r.feature_date = NaiveDate::from_ymd_opt(2024, 2, day - 1);
        r.ret_20d = Some(0.05);
        r.adv20_dollar = Some(2.5e6);
        r.fwd_ret_5d = Some(-0.01);
        r
    }

    #[test]
    fn parquet_preserves_rows_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.parquet");
        let rows = vec![row("AAA", 2), row("BBB", 3)];
        write_rows(&rows, &path).unwrap();
        let loaded = read_rows_validated(&path).unwrap();
        assert_eq!(loaded, rows);
        assert_eq!(loaded[0].rsi_14, None);
    }

    #[test]
    fn string_dates_and_target_alias_are_accepted() {
        let df = DataFrame::new(vec![
            Column::new("asset_id".into(), vec!["AAA", "BBB"]),
            Column::new("asof_date".into(), vec!["2024-02-02", "not-a-date"]),
            Column::new("adv20_dollar".into(), vec![1i64, 2]),
            Column::new("forward_return_5d".into(), vec![0.01f32, 0.02]),
        ])
        .unwrap();
        let (rows, dropped) = dataframe_to_rows(&df, Some("ETF")).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(rows[0].asset_class, "etf");
        assert_eq!(rows[0].adv20_dollar, Some(1.0));
        assert!((rows[0].fwd_ret_5d.unwrap() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn parse_day_accepts_datetime_prefix() {
        assert_eq!(parse_day("2024-02-02T00:00:00"), NaiveDate::from_ymd_opt(2024, 2, 2));
        assert_eq!(parse_day("02/02/2024"), None);
    }
}

//! Step 3 of the tick: groups query rows by batch anchor (spec §4.2 step 3).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use migeng_datasource::QueryRow;
use migeng_runbook::BatchTimeMode;

/// Rounds down to the nearest 5-minute boundary — the anchor for
/// `batch_time: immediate` runbooks.
pub fn round_down_to_5min(now: DateTime<Utc>) -> DateTime<Utc> {
    let minute = now.minute() - (now.minute() % 5);
    now.with_minute(minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now - Duration::minutes((now.minute() % 5) as i64))
}

/// Groups rows into batch anchors. For `immediate` runbooks every row
/// shares the single rounded-down-now anchor; for `batch_time_column`
/// runbooks, rows with a missing/unparseable batch time are dropped (the
/// data-source client already logged the parse failure).
pub fn group_by_anchor(
    rows: Vec<QueryRow>,
    batch_time: &BatchTimeMode,
    now: DateTime<Utc>,
) -> HashMap<DateTime<Utc>, Vec<QueryRow>> {
    let mut groups: HashMap<DateTime<Utc>, Vec<QueryRow>> = HashMap::new();
    match batch_time {
        BatchTimeMode::Immediate => {
            let anchor = round_down_to_5min(now);
            groups.entry(anchor).or_default().extend(rows);
        }
        BatchTimeMode::Column(_) => {
            for row in rows {
                if let Some(anchor) = row.batch_time {
                    groups.entry(anchor).or_default().push(row);
                }
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rounds_down_to_five_minute_grid() {
        let t = Utc.with_ymd_and_hms(2025, 3, 15, 12, 37, 42).unwrap();
        let rounded = round_down_to_5min(t);
        assert_eq!(rounded, Utc.with_ymd_and_hms(2025, 3, 15, 12, 35, 0).unwrap());
    }

    #[test]
    fn column_mode_drops_rows_missing_batch_time() {
        let rows = vec![
            QueryRow { primary_key: "1".into(), batch_time: None, columns: Default::default() },
            QueryRow {
                primary_key: "2".into(),
                batch_time: Some(Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap()),
                columns: Default::default(),
            },
        ];
        let groups = group_by_anchor(rows, &BatchTimeMode::Column("when".into()), Utc::now());
        assert_eq!(groups.len(), 1);
    }
}

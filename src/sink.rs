//! Result sinks: durable storage for call records and concurrency results
//!
//! Every write path is independent. A failing sink never touches results that
//! were already computed; the pipeline collects the error and carries on.

use crate::call_record::CallRecord;
use crate::error::PersistenceError;
use crate::histogram::OccupancyHistogram;
use crate::top_k::TopKEntry;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

/// Destination for run results
///
/// Sinks implement only the paths they care about; the rest are no-ops.
pub trait ResultSink {
    /// Short label used in logs and failure reports
    fn name(&self) -> &str;

    /// Store one raw call audit row
    fn persist_record(&mut self, _record: &CallRecord) -> Result<(), PersistenceError> {
        Ok(())
    }

    /// Store a batch of raw call audit rows
    fn persist_records(&mut self, records: &[CallRecord]) -> Result<(), PersistenceError> {
        records.iter().try_for_each(|r| self.persist_record(r))
    }

    /// Store the full epoch -> count table
    fn persist_histogram(&mut self, _histogram: &OccupancyHistogram) -> Result<(), PersistenceError> {
        Ok(())
    }

    /// Store the final report rows in order
    fn persist_top_k(&mut self, _entries: &[TopKEntry]) -> Result<(), PersistenceError> {
        Ok(())
    }
}

const CREATE_CALLS: &str = "CREATE TABLE IF NOT EXISTS calls(
    sid TEXT PRIMARY KEY,
    date_created TEXT,
    start_time TEXT,
    end_time TEXT,
    to_formatted TEXT,
    from_formatted TEXT,
    direction TEXT,
    duration TEXT,
    status TEXT
)";

const CREATE_EPOCH: &str =
    "CREATE TABLE IF NOT EXISTS epoch(epoch INTEGER PRIMARY KEY, count INTEGER NOT NULL DEFAULT 0)";

const CREATE_TOP_SECONDS: &str = "CREATE TABLE IF NOT EXISTS top_seconds(
    rank INTEGER PRIMARY KEY,
    epoch INTEGER NOT NULL,
    count INTEGER NOT NULL
)";

/// Duplicate deliveries of the same sid overwrite the earlier row
const UPSERT_CALL: &str = "INSERT INTO calls(sid, date_created, start_time, end_time, to_formatted, from_formatted, direction, duration, status)
VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(sid) DO UPDATE SET
    date_created = excluded.date_created,
    start_time = excluded.start_time,
    end_time = excluded.end_time,
    to_formatted = excluded.to_formatted,
    from_formatted = excluded.from_formatted,
    direction = excluded.direction,
    duration = excluded.duration,
    status = excluded.status";

const UPSERT_EPOCH: &str = "INSERT INTO epoch(epoch, count) VALUES(?1, ?2)
ON CONFLICT(epoch) DO UPDATE SET count = excluded.count";

/// Per-run SQLite database
pub struct SqliteSink {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSink {
    /// Open (or create) the run database
    ///
    /// The `calls` table is only created when raw records will be kept.
    pub fn open(path: impl AsRef<Path>, record_calls: bool) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch(CREATE_EPOCH)?;
        if record_calls {
            conn.execute_batch(CREATE_CALLS)?;
        }
        tracing::debug!(path = %path.display(), record_calls, "opened run database");
        Ok(Self { conn, path })
    }

    /// In-memory database, for tests and dry runs
    pub fn in_memory(record_calls: bool) -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_EPOCH)?;
        if record_calls {
            conn.execute_batch(CREATE_CALLS)?;
        }
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the epoch table back
    pub fn load_histogram(&self) -> Result<OccupancyHistogram, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT epoch, count FROM epoch ORDER BY epoch")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(OccupancyHistogram::from_counts(rows))
    }

    /// Read the stored report back in rank order
    pub fn load_top_k(&self) -> Result<Vec<TopKEntry>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT epoch, count FROM top_seconds ORDER BY rank")?;
        let rows = stmt
            .query_map([], |row| Ok(TopKEntry::new(row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of rows in the calls table
    pub fn call_count(&self) -> Result<u64, PersistenceError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM calls", [], |row| row.get(0))?;
        Ok(count.unsigned_abs())
    }
}

impl ResultSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn persist_record(&mut self, record: &CallRecord) -> Result<(), PersistenceError> {
        self.persist_records(std::slice::from_ref(record))
    }

    fn persist_records(&mut self, records: &[CallRecord]) -> Result<(), PersistenceError> {
        self.conn.execute_batch(CREATE_CALLS)?;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_CALL)?;
            for r in records {
                stmt.execute(params![
                    r.sid,
                    r.date_created,
                    r.start_time,
                    r.end_time,
                    r.to_formatted,
                    r.from_formatted,
                    r.direction,
                    r.duration,
                    r.status,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn persist_histogram(&mut self, histogram: &OccupancyHistogram) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_EPOCH)?;
            for (epoch, count) in histogram.iter() {
                stmt.execute(params![epoch, count])?;
            }
        }
        tx.commit()?;
        tracing::debug!(rows = histogram.len(), "epoch table written");
        Ok(())
    }

    fn persist_top_k(&mut self, entries: &[TopKEntry]) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(CREATE_TOP_SECONDS)?;
        tx.execute("DELETE FROM top_seconds", [])?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT INTO top_seconds(rank, epoch, count) VALUES(?1, ?2, ?3)")?;
            for (rank, entry) in (1i64..).zip(entries) {
                stmt.execute(params![rank, entry.epoch, entry.count])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(sid: &str, status: &str) -> CallRecord {
        CallRecord {
            sid: sid.to_string(),
            date_created: Some("Mon, 01 Jul 2019 00:00:00 +0000".to_string()),
            start_time: Some("Mon, 01 Jul 2019 00:00:00 +0000".to_string()),
            end_time: Some("Mon, 01 Jul 2019 00:00:05 +0000".to_string()),
            to_formatted: Some("(415) 555-0100".to_string()),
            from_formatted: Some("(415) 555-0199".to_string()),
            direction: "trunking-originating".to_string(),
            duration: Some("5".to_string()),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_histogram_written_and_read_back() {
        let mut sink = SqliteSink::in_memory(false).unwrap();
        let histogram = OccupancyHistogram::from_counts([(10, 1), (11, 2), (12, 2)]);
        sink.persist_histogram(&histogram).unwrap();
        assert_eq!(sink.load_histogram().unwrap(), histogram);
    }

    #[test]
    fn test_histogram_rewrite_is_idempotent() {
        let mut sink = SqliteSink::in_memory(false).unwrap();
        let histogram = OccupancyHistogram::from_counts([(10, 3)]);
        sink.persist_histogram(&histogram).unwrap();
        sink.persist_histogram(&histogram).unwrap();
        assert_eq!(sink.load_histogram().unwrap().get(10), 3);
    }

    #[test]
    fn test_duplicate_sid_is_upserted() {
        let mut sink = SqliteSink::in_memory(true).unwrap();
        sink.persist_record(&call("CA1", "in-progress")).unwrap();
        sink.persist_records(&[call("CA1", "completed"), call("CA2", "completed")])
            .unwrap();
        assert_eq!(sink.call_count().unwrap(), 2);

        let status: String = sink
            .conn
            .query_row("SELECT status FROM calls WHERE sid = 'CA1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "completed");
    }

    #[test]
    fn test_top_k_keeps_rank_order() {
        let mut sink = SqliteSink::in_memory(false).unwrap();
        let entries = vec![TopKEntry::new(7, 4), TopKEntry::new(3, 4), TopKEntry::new(1, 1)];
        sink.persist_top_k(&entries).unwrap();
        assert_eq!(sink.load_top_k().unwrap(), entries);

        sink.persist_top_k(&entries[..1]).unwrap();
        assert_eq!(sink.load_top_k().unwrap(), entries[..1].to_vec());
    }

    #[test]
    fn test_calls_table_absent_unless_requested() {
        let sink = SqliteSink::in_memory(false).unwrap();
        assert!(sink.call_count().is_err());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.db");
        let mut sink = SqliteSink::open(&path, true).unwrap();
        sink.persist_histogram(&OccupancyHistogram::from_counts([(1, 1)]))
            .unwrap();
        assert!(path.exists());
        assert_eq!(sink.path(), path.as_path());
    }
}

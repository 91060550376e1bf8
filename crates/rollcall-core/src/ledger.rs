//! Attendance ledger: a CSV table of `Name,Date,Time[,Status]` rows.
//!
//! Two deduplication policies decide whether a sighting becomes a row:
//!
//! - [`DedupPolicy::Daily`]: at most one row per name per calendar date. The
//!   file is re-read before each append so rows written by an earlier run (or
//!   another process) count.
//! - [`DedupPolicy::Cooldown`]: a new row once more than the cooldown has
//!   elapsed since the last row this session wrote for the name.
//!
//! Every read-check-append holds an exclusive `flock` on the file.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ledger {path}: failed to lock: {errno}")]
    Lock { path: PathBuf, errno: Errno },
    #[error("ledger {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

/// Attendance status column. Only presence is ever recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Present,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Present => "Present",
        }
    }
}

/// Rule deciding whether a sighting is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPolicy {
    /// One row per name per date. Header `Name,Date,Time`.
    Daily,
    /// One row per name per cooldown window. Header `Name,Date,Time,Status`.
    Cooldown(Duration),
}

impl DedupPolicy {
    fn header(&self) -> &'static [&'static str] {
        match self {
            DedupPolicy::Daily => &["Name", "Date", "Time"],
            DedupPolicy::Cooldown(_) => &["Name", "Date", "Time", "Status"],
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub identity: String,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Time")]
    pub time: NaiveTime,
    /// Absent in daily-format files; always `Present`.
    #[serde(rename = "Status", default)]
    pub status: Status,
}

impl AttendanceRecord {
    /// Record for `identity` at `at`, truncated to whole seconds.
    pub fn new(identity: impl Into<String>, at: NaiveDateTime) -> Self {
        Self {
            identity: identity.into(),
            date: at.date(),
            time: at.time().with_nanosecond(0).unwrap_or(at.time()),
            status: Status::Present,
        }
    }

    fn fields(&self, policy: DedupPolicy) -> Vec<String> {
        let mut fields = vec![
            self.identity.clone(),
            self.date.format(DATE_FORMAT).to_string(),
            self.time.format(TIME_FORMAT).to_string(),
        ];
        if let DedupPolicy::Cooldown(_) = policy {
            fields.push(self.status.as_str().to_string());
        }
        fields
    }
}

/// What a call to [`Ledger::mark`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    Recorded(AttendanceRecord),
    /// Daily policy: the name already has a row for this date.
    AlreadyMarked,
    /// Cooldown policy: the last row for the name is too recent.
    CoolingDown { remaining: Duration },
}

/// Per-session memory of the last row written for each name.
#[derive(Debug, Default, Clone)]
pub struct MarkState {
    last_marked: HashMap<String, NaiveDateTime>,
}

impl MarkState {
    pub fn last_marked(&self, name: &str) -> Option<NaiveDateTime> {
        self.last_marked.get(name).copied()
    }
}

/// Handle on the ledger file and its policy.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    policy: DedupPolicy,
    uppercase_names: bool,
}

impl Ledger {
    /// Open the ledger, creating the file (and parent directories) with the
    /// policy's header if it does not exist yet.
    pub fn open(
        path: impl Into<PathBuf>,
        policy: DedupPolicy,
        uppercase_names: bool,
    ) -> Result<Self, LedgerError> {
        let ledger = Self {
            path: path.into(),
            policy,
            uppercase_names,
        };
        if let Some(parent) = ledger.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ledger.io(e))?;
        }
        let mut file = ledger.lock()?;
        ledger.ensure_header(&mut file)?;
        tracing::debug!(path = %ledger.path.display(), ?policy, "ledger ready");
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// Name as it is written to the ledger.
    pub fn record_name(&self, identity: &str) -> String {
        if self.uppercase_names {
            identity.to_uppercase()
        } else {
            identity.to_string()
        }
    }

    /// Record a sighting of `identity` at `now`, subject to the policy.
    ///
    /// `state` only advances when a row is actually written, so a failed
    /// write is retried on the next sighting.
    pub fn mark(
        &self,
        state: &mut MarkState,
        identity: &str,
        now: NaiveDateTime,
    ) -> Result<MarkOutcome, LedgerError> {
        let name = self.record_name(identity);

        match self.policy {
            DedupPolicy::Daily => {
                if state
                    .last_marked(&name)
                    .is_some_and(|last| last.date() == now.date())
                {
                    return Ok(MarkOutcome::AlreadyMarked);
                }
            }
            DedupPolicy::Cooldown(cooldown) => {
                if let Some(last) = state.last_marked(&name) {
                    let elapsed = now
                        .signed_duration_since(last)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    if elapsed <= cooldown {
                        return Ok(MarkOutcome::CoolingDown {
                            remaining: cooldown - elapsed,
                        });
                    }
                }
            }
        }

        let mut file = self.lock()?;
        self.ensure_header(&mut file)?;

        if self.policy == DedupPolicy::Daily {
            let seen = self
                .read_records(&mut file)?
                .iter()
                .any(|r| r.identity == name && r.date == now.date());
            if seen {
                state.last_marked.insert(name, now);
                return Ok(MarkOutcome::AlreadyMarked);
            }
        }

        let record = AttendanceRecord::new(name.clone(), now);
        self.append(&mut file, &record)?;
        state.last_marked.insert(name, now);

        tracing::info!(
            name = %record.identity,
            date = %record.date,
            time = %record.time,
            "attendance marked"
        );
        Ok(MarkOutcome::Recorded(record))
    }

    /// All rows in file order. A missing file reads as empty.
    /// Rows that do not parse are logged and skipped.
    pub fn load(path: &Path) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        parse_records(file, path)
    }

    fn lock(&self) -> Result<Flock<File>, LedgerError> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| LedgerError::Lock {
            path: self.path.clone(),
            errno,
        })
    }

    fn ensure_header(&self, file: &mut File) -> Result<(), LedgerError> {
        let len = file.metadata().map_err(|e| self.io(e))?.len();
        if len == 0 {
            let mut writer = csv::WriterBuilder::new().from_writer(&mut *file);
            writer
                .write_record(self.policy.header())
                .and_then(|()| writer.flush().map_err(csv::Error::from))
                .map_err(|e| self.csv(e))?;
        }
        Ok(())
    }

    fn read_records(&self, file: &mut File) -> Result<Vec<AttendanceRecord>, LedgerError> {
        file.seek(SeekFrom::Start(0)).map_err(|e| self.io(e))?;
        parse_records(&mut *file, &self.path)
    }

    fn append(&self, file: &mut File, record: &AttendanceRecord) -> Result<(), LedgerError> {
        // A hand-edited file may lack the final newline.
        let len = file.metadata().map_err(|e| self.io(e))?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))
                .and_then(|_| file.read_exact(&mut last))
                .map_err(|e| self.io(e))?;
            if last[0] != b'\n' {
                file.write_all(b"\n").map_err(|e| self.io(e))?;
            }
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut *file);
        writer
            .write_record(record.fields(self.policy))
            .and_then(|()| writer.flush().map_err(csv::Error::from))
            .map_err(|e| self.csv(e))
    }

    fn io(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

/// Deserialize every row, skipping rows that do not parse.
///
/// I/O failures still abort the read.
fn parse_records<R: Read>(reader: R, path: &Path) -> Result<Vec<AttendanceRecord>, LedgerError> {
    let mut records = Vec::new();
    for row in csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader)
        .deserialize::<AttendanceRecord>()
    {
        match row {
            Ok(record) => records.push(record),
            Err(e) if e.is_io_error() => {
                return Err(LedgerError::Csv {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
            Err(e) => {
                let line = e.position().map(|p| p.line());
                tracing::warn!(path = %path.display(), ?line, error = %e, "skipping malformed ledger row");
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn open(dir: &tempfile::TempDir, policy: DedupPolicy) -> Ledger {
        Ledger::open(dir.path().join("attendance.csv"), policy, true).unwrap()
    }

    const COOLDOWN: DedupPolicy = DedupPolicy::Cooldown(Duration::from_secs(10));

    #[rstest]
    #[case(DedupPolicy::Daily, "Name,Date,Time\n")]
    #[case(COOLDOWN, "Name,Date,Time,Status\n")]
    fn test_open_writes_header(#[case] policy: DedupPolicy, #[case] header: &str) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir, policy);
        // Opening twice must not duplicate the header.
        let ledger = Ledger::open(ledger.path(), policy, true).unwrap();
        assert_eq!(std::fs::read_to_string(ledger.path()).unwrap(), header);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/attendance.csv");
        Ledger::open(&path, DedupPolicy::Daily, true).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_daily_is_idempotent_within_a_date() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir, DedupPolicy::Daily);
        let mut state = MarkState::default();

        let first = ledger.mark(&mut state, "alice", at(9, 0, 0)).unwrap();
        assert!(matches!(first, MarkOutcome::Recorded(_)));
        for minute in 1..5 {
            let again = ledger.mark(&mut state, "alice", at(9, minute, 0)).unwrap();
            assert_eq!(again, MarkOutcome::AlreadyMarked);
        }

        let rows = Ledger::load(ledger.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].identity, "ALICE");
        assert_eq!(rows[0].time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn test_daily_new_date_marks_again() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir, DedupPolicy::Daily);
        let mut state = MarkState::default();

        ledger.mark(&mut state, "alice", at(23, 59, 59)).unwrap();
        let next_day = at(0, 0, 1) + chrono::Duration::days(1);
        let outcome = ledger.mark(&mut state, "alice", next_day).unwrap();
        assert!(matches!(outcome, MarkOutcome::Recorded(_)));
        assert_eq!(Ledger::load(ledger.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_daily_sees_rows_from_earlier_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir, DedupPolicy::Daily);

        ledger.mark(&mut MarkState::default(), "bob", at(8, 0, 0)).unwrap();
        // Fresh state, as after a restart.
        let outcome = ledger.mark(&mut MarkState::default(), "bob", at(12, 0, 0)).unwrap();
        assert_eq!(outcome, MarkOutcome::AlreadyMarked);
        assert_eq!(Ledger::load(ledger.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_daily_distinct_names_each_marked() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir, DedupPolicy::Daily);
        let mut state = MarkState::default();
        ledger.mark(&mut state, "alice", at(9, 0, 0)).unwrap();
        ledger.mark(&mut state, "bob", at(9, 0, 1)).unwrap();
        ledger.mark(&mut state, "alice", at(9, 0, 2)).unwrap();

        let names: Vec<String> = Ledger::load(ledger.path())
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(names, vec!["ALICE", "BOB"]);
    }

    #[test]
    fn test_cooldown_window() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir, COOLDOWN);
        let mut state = MarkState::default();

        let t0 = at(10, 0, 0);
        assert!(matches!(
            ledger.mark(&mut state, "carol", t0).unwrap(),
            MarkOutcome::Recorded(_)
        ));
        assert_eq!(
            ledger
                .mark(&mut state, "carol", t0 + chrono::Duration::seconds(5))
                .unwrap(),
            MarkOutcome::CoolingDown {
                remaining: Duration::from_secs(5)
            }
        );
        assert_eq!(Ledger::load(ledger.path()).unwrap().len(), 1);

        assert!(matches!(
            ledger
                .mark(&mut state, "carol", t0 + chrono::Duration::seconds(15))
                .unwrap(),
            MarkOutcome::Recorded(_)
        ));
        let rows = Ledger::load(ledger.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].time, NaiveTime::from_hms_opt(10, 0, 15).unwrap());
        assert_eq!(rows[1].status, Status::Present);
    }

    #[test]
    fn test_cooldown_boundary_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir, COOLDOWN);
        let mut state = MarkState::default();
        let t0 = at(10, 0, 0);
        ledger.mark(&mut state, "dave", t0).unwrap();
        let outcome = ledger
            .mark(&mut state, "dave", t0 + chrono::Duration::seconds(10))
            .unwrap();
        assert!(matches!(outcome, MarkOutcome::CoolingDown { .. }));
    }

    #[test]
    fn test_cooldown_rows_carry_status_column() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir, COOLDOWN);
        ledger.mark(&mut MarkState::default(), "erin", at(7, 5, 9)).unwrap();
        let text = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(text, "Name,Date,Time,Status\nERIN,2024-03-14,07:05:09,Present\n");
    }

    #[test]
    fn test_subsecond_time_truncated() {
        let now = at(9, 30, 15) + chrono::Duration::milliseconds(750);
        let record = AttendanceRecord::new("x", now);
        assert_eq!(record.time, NaiveTime::from_hms_opt(9, 30, 15).unwrap());
    }

    #[test]
    fn test_keep_case_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv"), DedupPolicy::Daily, false).unwrap();
        assert_eq!(ledger.record_name("Ada"), "Ada");
    }

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir, COOLDOWN);
        let mut state = MarkState::default();
        let names = ["ann", "ben", "cat", "dan", "eve"];
        for (i, name) in names.iter().enumerate() {
            ledger.mark(&mut state, name, at(8, i as u32, i as u32)).unwrap();
        }

        let rows = Ledger::load(ledger.path()).unwrap();
        assert_eq!(rows.len(), names.len());
        for (i, (row, name)) in rows.iter().zip(names).enumerate() {
            assert_eq!(row.identity, name.to_uppercase());
            assert_eq!(row.date, NaiveDate::from_ymd_opt(2024, 3, 14).unwrap());
            assert_eq!(row.time, NaiveTime::from_hms_opt(8, i as u32, i as u32).unwrap());
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Ledger::load(&dir.path().join("none.csv")).unwrap().is_empty());
    }

    #[test]
    fn test_load_accepts_daily_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.csv");
        std::fs::write(&path, "Name,Date,Time\nALICE,2024-01-02,08:15:00\n").unwrap();
        let rows = Ledger::load(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, Status::Present);
    }

    #[test]
    fn test_malformed_row_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        std::fs::write(
            &path,
            "Name,Date,Time\nBOB,14/03/2024,09:00:00\nCAROL,2024-03-14,08:00:00\n",
        )
        .unwrap();

        let ledger = Ledger::open(&path, DedupPolicy::Daily, true).unwrap();
        let outcome = ledger.mark(&mut MarkState::default(), "bob", at(9, 5, 0)).unwrap();
        assert!(matches!(outcome, MarkOutcome::Recorded(_)));

        let names: Vec<String> = Ledger::load(&path)
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(names, vec!["CAROL", "BOB"]);
    }

    #[test]
    fn test_append_after_missing_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        std::fs::write(&path, "Name,Date,Time\nBOB,2024-03-14,09:00:00").unwrap();

        let ledger = Ledger::open(&path, DedupPolicy::Daily, true).unwrap();
        ledger.mark(&mut MarkState::default(), "alice", at(9, 1, 0)).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Name,Date,Time\nBOB,2024-03-14,09:00:00\nALICE,2024-03-14,09:01:00\n"
        );
        assert_eq!(Ledger::load(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_write_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir, DedupPolicy::Daily);
        // A directory in place of the file fails to open even for root.
        std::fs::remove_file(ledger.path()).unwrap();
        std::fs::create_dir(ledger.path()).unwrap();

        let mut state = MarkState::default();
        let err = ledger.mark(&mut state, "alice", at(9, 0, 0)).unwrap_err();
        assert!(matches!(err, LedgerError::Io { .. }));
        assert!(state.last_marked("ALICE").is_none());
    }
}

//! Firehose archive I/O.
//!
//! Two on-disk layouts are understood:
//!
//! - **raw**: one `YYYY-MM-DD.jsonl` file per day, one record per line, in
//!   arrival order.
//! - **batches**: numbered `0.json`, `1.json`, ... files each holding
//!   `{"records": [...]}`, ordered by record time across the whole set.

pub mod source;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::vec;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::Record;

pub use source::{BatchDirSource, RecordSource, SourceHandle};

/// Anything carrying an optional Unix-millisecond `ts`.
pub trait Timestamped {
    /// The record's `ts`, if stamped.
    fn ts(&self) -> Option<i64>;
}

impl Timestamped for Record {
    fn ts(&self) -> Option<i64> {
        self.ts
    }
}

impl Timestamped for Map<String, Value> {
    fn ts(&self) -> Option<i64> {
        self.get("ts").and_then(Value::as_i64)
    }
}

/// On-disk shape of a batch file.
#[derive(Debug, Serialize, Deserialize)]
struct BatchFile<C> {
    records: C,
}

fn list_dir(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::stream_file(dir, e.to_string()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Raw daily dumps in `dir`, in date order, up to and including `end_date`.
///
/// Files whose stem is not a `YYYY-MM-DD` date are skipped.
///
/// # Errors
///
/// Returns an error if `dir` cannot be listed.
pub fn raw_files(dir: &Path, end_date: Option<NaiveDate>) -> Result<Vec<PathBuf>> {
    let mut dated: Vec<(NaiveDate, PathBuf)> = list_dir(dir, "jsonl")?
        .into_iter()
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?;
            match NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                Ok(date) => Some((date, path)),
                Err(_) => {
                    warn!(path = %path.display(), "Skipping raw file without a date stem");
                    None
                }
            }
        })
        .collect();
    dated.sort();

    Ok(dated
        .into_iter()
        .take_while(|(date, _)| end_date.map_or(true, |end| *date <= end))
        .map(|(_, path)| path)
        .collect())
}

/// Batch files in `dir`, sorted numerically by stem.
///
/// # Errors
///
/// Returns an error if `dir` cannot be listed.
pub fn batch_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut numbered: Vec<(u64, PathBuf)> = list_dir(dir, "json")?
        .into_iter()
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?;
            match stem.parse::<u64>() {
                Ok(n) => Some((n, path)),
                Err(_) => {
                    warn!(path = %path.display(), "Skipping batch file without a numeric stem");
                    None
                }
            }
        })
        .collect();
    numbered.sort();
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

/// Read the raw JSON elements of one batch file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or is not a batch document.
pub fn read_batch_values(path: &Path) -> Result<Vec<Value>> {
    let file = File::open(path).map_err(|e| Error::stream_file(path, e.to_string()))?;
    let batch: BatchFile<Vec<Value>> = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::stream_file(path, e.to_string()))?;
    Ok(batch.records)
}

/// Write records to a batch file, replacing any existing file.
///
/// # Errors
///
/// Returns an error if the file cannot be created or serialization fails.
pub fn write_batch<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::stream_file(path, e.to_string()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &BatchFile { records })?;
    writer.flush()?;
    debug!(path = %path.display(), records = records.len(), "Wrote batch");
    Ok(())
}

fn trim_line(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Line-by-line reader over a raw `.jsonl` dump.
///
/// Yields `(raw line bytes, parsed object)`. Blank lines are ignored; lines
/// that are not UTF-8 JSON objects are logged and skipped.
#[derive(Debug)]
pub struct JsonlReader<R> {
    path: PathBuf,
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
    malformed: usize,
}

impl JsonlReader<BufReader<File>> {
    /// Open a raw dump.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::stream_file(path, e.to_string()))?;
        Ok(Self::new(path, BufReader::new(file)))
    }
}

impl<R: BufRead> JsonlReader<R> {
    /// Wrap an existing reader; `path` is used for diagnostics only.
    pub fn new(path: impl Into<PathBuf>, reader: R) -> Self {
        Self {
            path: path.into(),
            reader,
            buf: Vec::new(),
            line_no: 0,
            malformed: 0,
        }
    }

    /// Lines skipped because they did not parse.
    #[must_use]
    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

impl<R: BufRead> Iterator for JsonlReader<R> {
    type Item = Result<(Vec<u8>, Map<String, Value>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(Error::stream_file(&self.path, e.to_string()))),
            }
            self.line_no += 1;

            let line = trim_line(&self.buf);
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Map<String, Value>>(line) {
                Ok(object) => return Some(Ok((line.to_vec(), object))),
                Err(e) => {
                    self.malformed += 1;
                    warn!(
                        path = %self.path.display(),
                        line = self.line_no,
                        error = %e,
                        "Skipping malformed line"
                    );
                }
            }
        }
    }
}

/// Iterator over every record of an ordered batch directory.
///
/// Stops at the first record whose `ts` is at or after `end_ms`. Elements
/// that fail to deserialize as `T` are logged and skipped.
#[derive(Debug)]
pub struct BatchReader<T> {
    files: vec::IntoIter<PathBuf>,
    current: vec::IntoIter<Value>,
    current_path: Option<PathBuf>,
    end_ms: Option<i64>,
    finished: bool,
    skipped: usize,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> BatchReader<T> {
    /// Open the batches in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` cannot be listed.
    pub fn open(dir: &Path, end_ms: Option<i64>) -> Result<Self> {
        let files = batch_files(dir)?;
        info!(dir = %dir.display(), files = files.len(), "Opened batch directory");
        Ok(Self::from_files(files, end_ms))
    }

    /// Read from an explicit list of batch files.
    #[must_use]
    pub fn from_files(files: Vec<PathBuf>, end_ms: Option<i64>) -> Self {
        Self {
            files: files.into_iter(),
            current: Vec::new().into_iter(),
            current_path: None,
            end_ms,
            finished: false,
            skipped: 0,
            _marker: std::marker::PhantomData,
        }
    }

    /// Elements skipped because they did not deserialize.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<T: DeserializeOwned + Timestamped> Iterator for BatchReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(value) = self.current.next() {
                let record: T = match serde_json::from_value(value) {
                    Ok(record) => record,
                    Err(e) => {
                        self.skipped += 1;
                        debug!(
                            path = ?self.current_path,
                            error = %e,
                            "Skipping undecodable record"
                        );
                        continue;
                    }
                };
                if let (Some(end), Some(ts)) = (self.end_ms, record.ts()) {
                    if ts >= end {
                        self.finished = true;
                        return None;
                    }
                }
                return Some(Ok(record));
            }

            let path = self.files.next()?;
            info!(path = %path.display(), "Reading batch");
            match read_batch_values(&path) {
                Ok(values) => self.current = values.into_iter(),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
            self.current_path = Some(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn like(ts: i64) -> Value {
        json!({
            "$type": "app.bsky.feed.like",
            "ts": ts,
            "did": "did:plc:a",
            "uri": format!("at://did:plc:a/app.bsky.feed.like/{ts}"),
            "subject": {"uri": "at://did:plc:b/app.bsky.feed.post/x", "cid": "c"}
        })
    }

    #[test]
    fn test_batch_files_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["10.json", "2.json", "1.json", "notes.json", "3.txt"] {
            std::fs::write(dir.path().join(name), r#"{"records":[]}"#).unwrap();
        }

        let files = batch_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1.json", "2.json", "10.json"]);
    }

    #[test]
    fn test_raw_files_respects_end_date() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["2023-02-02.jsonl", "2023-01-31.jsonl", "2023-02-01.jsonl", "misc.jsonl"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }

        let files = raw_files(dir.path(), NaiveDate::from_ymd_opt(2023, 2, 1)).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("2023-01-31.jsonl"));
        assert!(files[1].ends_with("2023-02-01.jsonl"));

        assert_eq!(raw_files(dir.path(), None).unwrap().len(), 3);
    }

    #[test]
    fn test_jsonl_reader_skips_malformed_lines() {
        let input = "{\"did\":\"a\"}\n\nnot json\n[1,2]\n{\"did\":\"b\"}\n";
        let mut reader = JsonlReader::new("mem.jsonl", input.as_bytes());

        let dids: Vec<String> = reader
            .by_ref()
            .map(|r| r.unwrap().1["did"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(dids, vec!["a", "b"]);
        assert_eq!(reader.malformed(), 2);
    }

    #[test]
    fn test_jsonl_reader_skips_invalid_utf8() {
        let mut input = b"{\"did\":\"".to_vec();
        input.extend_from_slice(&[0xff, 0xfe]);
        input.extend_from_slice(b"\"}\r\n{\"did\":\"b\"}");
        let mut reader = JsonlReader::new("mem.jsonl", input.as_slice());

        let items: Vec<_> = reader.by_ref().map(Result::unwrap).collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, b"{\"did\":\"b\"}".to_vec());
        assert_eq!(items[0].1["did"], "b");
        assert_eq!(reader.malformed(), 1);
    }

    #[test]
    fn test_batch_reader_reads_across_files() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(&dir.path().join("0.json"), &[like(1), like(2)]).unwrap();
        write_batch(&dir.path().join("1.json"), &[like(3)]).unwrap();

        let records: Vec<Record> = BatchReader::open(dir.path(), None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let times: Vec<_> = records.iter().map(|r| r.ts.unwrap()).collect();
        assert_eq!(times, vec![1, 2, 3]);
    }

    #[test]
    fn test_batch_reader_end_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(&dir.path().join("0.json"), &[like(1), like(2), like(3)]).unwrap();

        let records: Vec<Record> = BatchReader::open(dir.path(), Some(2))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_batch_reader_skips_undecodable_records() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(
            &dir.path().join("0.json"),
            &[like(1), json!({"no": "did"}), like(2)],
        )
        .unwrap();

        let mut reader: BatchReader<Record> = BatchReader::open(dir.path(), None).unwrap();
        let records: Vec<Record> = reader.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(reader.skipped(), 1);
    }

    #[test]
    fn test_batch_reader_raw_maps_keep_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut value = like(7);
        value["extra"] = json!("kept");
        write_batch(&dir.path().join("0.json"), &[value]).unwrap();

        let maps: Vec<Map<String, Value>> = BatchReader::open(dir.path(), None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(maps[0]["extra"], "kept");
        assert_eq!(maps[0].ts(), Some(7));
    }

    #[test]
    fn test_batch_reader_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0.json"), "{ nope").unwrap();

        let mut reader: BatchReader<Record> = BatchReader::open(dir.path(), None).unwrap();
        assert!(matches!(reader.next(), Some(Err(Error::StreamFile { .. }))));
        assert!(reader.next().is_none());
    }
}

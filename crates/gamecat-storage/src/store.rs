//! Append-only CSV record store with atomic temp-file + rename persistence.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::Utc;
use gamecat_core::{GameRecord, RecordStatus, COLUMNS};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Exclusive claim on an output file, held for the lifetime of a writing store.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(output: &Path) -> anyhow::Result<Self> {
        let path = sibling_path(output, "lock");
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(anyhow!(
                    "output {} is locked by another process (remove {} if it is stale)",
                    output.display(),
                    path.display()
                ));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("creating lock file {}", path.display()));
            }
        };
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("writing lock file {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Persisted output rows plus the dedup index over `game_name`.
///
/// Every mutation rewrites the whole file through a synced temp file that is renamed over the
/// target, so a reader never observes a partially written row.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    known: HashSet<String>,
    dirty: bool,
    _lock: Option<StoreLock>,
}

impl RecordStore {
    /// Lock the output file for writing and load whatever it already holds.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let lock = StoreLock::acquire(&path)?;
        let mut store = Self::load(path)?;
        store._lock = Some(lock);
        Ok(store)
    }

    /// Load without taking the lock. A missing file is an empty store; a malformed one is moved aside.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Self::read(path.into(), Malformed::MoveAside)
    }

    /// Read-only load for reporting. A malformed file is an error and stays where it is.
    pub fn inspect(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Self::read(path.into(), Malformed::Fail)
    }

    fn read(path: PathBuf, malformed: Malformed) -> anyhow::Result<Self> {
        let mut store = Self {
            path,
            header: COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
            known: HashSet::new(),
            dirty: false,
            _lock: None,
        };

        let existing_len = match fs::metadata(&store.path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %store.path.display(), "no existing output, starting empty");
                return Ok(store);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("inspecting {}", store.path.display()));
            }
        };
        if existing_len == 0 {
            return Ok(store);
        }

        match read_table(&store.path) {
            Ok((header, rows)) => {
                store.header = merge_header(header);
                let width = store.header.len();
                store.rows = rows
                    .into_iter()
                    .map(|mut row| {
                        row.resize(width, String::new());
                        row
                    })
                    .collect();
                store.rebuild_index();
                info!(
                    path = %store.path.display(),
                    known = store.known.len(),
                    "loaded existing records"
                );
            }
            Err(err) if malformed == Malformed::Fail => {
                return Err(err).with_context(|| format!("{} is malformed", store.path.display()));
            }
            Err(err) => {
                let aside = quarantine_path(&store.path);
                warn!(
                    path = %store.path.display(),
                    moved_to = %aside.display(),
                    error = %err,
                    "existing output is unreadable; moving it aside and starting empty"
                );
                fs::rename(&store.path, &aside).with_context(|| {
                    format!(
                        "moving unreadable output {} to {}",
                        store.path.display(),
                        aside.display()
                    )
                })?;
            }
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, game_name: &str) -> bool {
        self.known.contains(game_name)
    }

    /// Snapshot of every stored `game_name`, used to seed the controller's dedup set.
    pub fn known_names(&self) -> HashSet<String> {
        self.known.clone()
    }

    /// Cell values of one row keyed by column name.
    pub fn row(&self, index: usize) -> Option<BTreeMap<&str, &str>> {
        let row = self.rows.get(index)?;
        Some(
            self.header
                .iter()
                .map(String::as_str)
                .zip(row.iter().map(String::as_str))
                .collect(),
        )
    }

    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        let Some(status_idx) = self.column_index("status") else {
            return counts;
        };
        for row in &self.rows {
            let status = row.get(status_idx).map(String::as_str).unwrap_or_default();
            *counts.entry(status.to_string()).or_default() += 1;
        }
        counts
    }

    /// Persist one record before returning. Returns `false` (and writes nothing) for a name
    /// that is already stored.
    pub fn append(&mut self, record: &GameRecord) -> anyhow::Result<bool> {
        if self.known.contains(&record.game_name) {
            warn!(game_name = %record.game_name, "refusing to store a duplicate game_name");
            return Ok(false);
        }
        let row = self
            .header
            .iter()
            .map(|column| record.value_for(column).unwrap_or_default().to_string())
            .collect();
        self.rows.push(row);
        self.known.insert(record.game_name.clone());
        self.dirty = true;
        self.flush()?;
        Ok(true)
    }

    /// Write pending changes; a no-op when nothing changed since the last successful write.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.write_atomically()?;
        self.dirty = false;
        debug!(path = %self.path.display(), rows = self.rows.len(), "flushed output");
        Ok(())
    }

    /// Drop failed rows so their names are processed again on the next run. An empty
    /// `statuses` slice removes every row whose status is not `ok`.
    pub fn remove_failed(&mut self, statuses: &[RecordStatus]) -> anyhow::Result<usize> {
        let status_idx = self
            .column_index("status")
            .context("output has no status column")?;
        let before = self.rows.len();
        self.rows.retain(|row| {
            let cell = row.get(status_idx).map(String::as_str).unwrap_or_default();
            let parsed = cell.parse::<RecordStatus>().ok();
            let remove = if statuses.is_empty() {
                parsed != Some(RecordStatus::Ok)
            } else {
                parsed.is_some_and(|s| statuses.contains(&s))
            };
            !remove
        });
        let removed = before - self.rows.len();
        if removed > 0 {
            self.rebuild_index();
            self.dirty = true;
            self.flush()?;
        }
        Ok(removed)
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.header.iter().position(|c| c == column)
    }

    fn rebuild_index(&mut self) {
        let name_idx = self.column_index("game_name").unwrap_or(0);
        self.known = self
            .rows
            .iter()
            .filter_map(|row| row.get(name_idx).cloned())
            .collect();
    }

    fn write_atomically(&self) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

        let temp_path = dir.join(format!(".{}.{}.tmp", Uuid::new_v4(), self.rows.len()));
        let file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| format!("opening temp output file {}", temp_path.display()))?;

        let written = (|| -> anyhow::Result<()> {
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(&self.header)?;
            for row in &self.rows {
                writer.write_record(row)?;
            }
            let file = writer
                .into_inner()
                .map_err(|e| anyhow!("flushing csv writer: {}", e.error()))?;
            file.sync_all()?;
            Ok(())
        })();

        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(err).with_context(|| format!("writing {}", temp_path.display()));
        }

        if let Err(err) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp output {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Malformed {
    MoveAside,
    Fail,
}

fn read_table(path: &Path) -> anyhow::Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let header: Vec<String> = reader
        .headers()
        .context("reading header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if !header.iter().any(|h| h == "game_name") {
        return Err(anyhow!("header has no game_name column"));
    }
    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {}", idx + 1))?;
        if record.len() > header.len() {
            return Err(anyhow!(
                "row {} has {} cells but the header names {} columns",
                idx + 1,
                record.len(),
                header.len()
            ));
        }
        rows.push(record.iter().map(ToString::to_string).collect());
    }
    Ok((header, rows))
}

/// Existing columns keep their position; columns this version writes but the file lacks go last.
fn merge_header(mut header: Vec<String>) -> Vec<String> {
    for column in COLUMNS {
        if !header.iter().any(|h| h == column) {
            header.push(column.to_string());
        }
    }
    header
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{name}.{suffix}"))
}

fn quarantine_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    sibling_path(path, &format!("corrupt-{stamp}"))
}

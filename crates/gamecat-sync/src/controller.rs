//! Ingestion Controller: resolve → extract → persist, one name at a time, in input order.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use gamecat_adapters::{AdapterError, Extract, Resolution, Resolve};
use gamecat_core::{DetailRef, GameRecord, RecordStatus};
use gamecat_storage::RecordStore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{RunSummary, Shutdown};

/// Per-name progress. `Recorded` holds a finished record that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Resolving,
    Extracting(DetailRef),
    Recorded(GameRecord),
    Persisted,
    RecordedAsFailed(RecordStatus),
}

pub fn status_for(err: &AdapterError) -> RecordStatus {
    match err {
        AdapterError::Network(_) => RecordStatus::NetworkError,
        AdapterError::AgeGateBlocked { .. } => RecordStatus::AgeGateBlocked,
        AdapterError::Parse(_) | AdapterError::Selector(_) => RecordStatus::ParseError,
    }
}

pub struct IngestController<R, E> {
    store: RecordStore,
    known: HashSet<String>,
    resolver: R,
    extractor: E,
    delay: Duration,
    shutdown: Shutdown,
}

impl<R: Resolve, E: Extract> IngestController<R, E> {
    /// `known` is the dedup set, normally `store.known_names()`.
    pub fn new(
        store: RecordStore,
        known: HashSet<String>,
        resolver: R,
        extractor: E,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            known,
            resolver,
            extractor,
            delay: Duration::ZERO,
            shutdown,
        }
    }

    /// Pause before each network fetch except the first of a run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn into_store(self) -> RecordStore {
        self.store
    }

    /// Advance one name through the network stages until a record is built.
    pub(crate) async fn step(&self, game_name: &str, stage: Stage) -> Stage {
        match stage {
            Stage::Pending => Stage::Resolving,
            Stage::Resolving => match self.resolver.resolve(game_name).await {
                Ok(Resolution::Found(detail)) => Stage::Extracting(detail),
                Ok(Resolution::NotFound) => Stage::Recorded(GameRecord::failed(
                    game_name,
                    None,
                    RecordStatus::NotFound,
                )),
                Err(err) => {
                    warn!(game_name, error = %err, "search failed");
                    Stage::Recorded(GameRecord::failed(game_name, None, status_for(&err)))
                }
            },
            Stage::Extracting(detail) => match self.extractor.extract(&detail).await {
                Ok(fields) => Stage::Recorded(GameRecord::ok(game_name, &detail, fields)),
                Err(err) => {
                    warn!(game_name, url = %detail.url, error = %err, "extraction failed");
                    Stage::Recorded(GameRecord::failed(
                        game_name,
                        Some(&detail.url),
                        status_for(&err),
                    ))
                }
            },
            done => done,
        }
    }

    async fn build_record(&self, game_name: &str) -> GameRecord {
        let mut stage = Stage::Pending;
        loop {
            stage = match self.step(game_name, stage).await {
                Stage::Recorded(record) => return record,
                next => {
                    debug!(game_name, stage = ?next, "advanced");
                    next
                }
            };
        }
    }

    /// Write the record, then mark the name as known. Never interrupted part-way.
    /// `None` when the store already held the name and nothing was written.
    pub(crate) fn persist(&mut self, record: GameRecord) -> Result<Option<Stage>> {
        let status = record.status;
        let written = self.store.append(&record)?;
        self.known.insert(record.game_name);
        if !written {
            return Ok(None);
        }
        Ok(Some(if status.is_failure() {
            Stage::RecordedAsFailed(status)
        } else {
            Stage::Persisted
        }))
    }

    pub async fn run(&mut self, names: &[String]) -> Result<RunSummary> {
        let started_at = Utc::now();
        let total = names.len();
        let mut shutdown = self.shutdown.clone();
        let mut per_status: BTreeMap<RecordStatus, usize> = BTreeMap::new();
        let mut skipped = 0usize;
        let mut persisted = 0usize;
        let mut fetched = 0usize;
        let mut interrupted = false;

        info!(total, known = self.known.len(), "starting ingestion run");

        for (index, game_name) in names.iter().enumerate() {
            if shutdown.is_triggered() {
                interrupted = true;
                break;
            }
            if self.known.contains(game_name) {
                debug!(game_name = %game_name, "already stored, skipping");
                skipped += 1;
                continue;
            }

            if fetched > 0 && !self.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => {
                        interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            fetched += 1;

            let record = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    warn!(game_name = %game_name, "stop requested; discarding in-flight record");
                    interrupted = true;
                    break;
                }
                record = self.build_record(game_name) => record,
            };

            let status = record.status;
            let Some(stage) = self.persist(record)? else {
                debug!(game_name = %game_name, "already in the output file, nothing written");
                skipped += 1;
                continue;
            };
            persisted += 1;
            *per_status.entry(status).or_default() += 1;
            info!(
                index = index + 1,
                total,
                game_name = %game_name,
                status = %status,
                stage = ?stage,
                "record persisted"
            );
        }

        self.store.flush()?;
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            total_names: total,
            skipped,
            persisted,
            per_status,
            interrupted,
        };
        if interrupted {
            warn!(persisted, "run interrupted; output flushed");
        } else {
            info!(persisted, skipped, "run complete");
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::{self, ShutdownTrigger};
    use async_trait::async_trait;
    use gamecat_core::{ExtractedFields, FREE, NOT_AVAILABLE};
    use gamecat_storage::NetworkError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Copy)]
    enum Script {
        Found,
        Missing,
        Offline,
        Gated,
        Garbage,
        Free,
        NoDate,
    }

    #[derive(Default)]
    struct FakeStorefront {
        scripts: HashMap<String, Script>,
        resolved: Mutex<Vec<String>>,
        extracted: Mutex<Vec<String>>,
        stop_at: Option<(String, ShutdownTrigger)>,
    }

    impl FakeStorefront {
        fn with(mut self, name: &str, script: Script) -> Self {
            self.scripts.insert(name.to_string(), script);
            self
        }

        fn script(&self, name: &str) -> Script {
            self.scripts.get(name).copied().unwrap_or(Script::Found)
        }

        fn resolved(&self) -> Vec<String> {
            self.resolved.lock().unwrap().clone()
        }
    }

    fn detail_for(name: &str) -> DetailRef {
        DetailRef {
            app_id: "1".into(),
            url: format!("https://store.steampowered.com/app/1/{name}/"),
            display_name: name.into(),
        }
    }

    #[async_trait]
    impl<'a> Resolve for &'a FakeStorefront {
        async fn resolve(&self, game_name: &str) -> Result<Resolution, AdapterError> {
            self.resolved.lock().unwrap().push(game_name.to_string());
            if let Some((stop_name, trigger)) = &self.stop_at {
                if stop_name == game_name {
                    trigger.trigger();
                    return std::future::pending().await;
                }
            }
            match self.script(game_name) {
                Script::Missing => Ok(Resolution::NotFound),
                Script::Offline => Err(AdapterError::Network(NetworkError::Transport {
                    url: "https://store.steampowered.com/search/suggest".into(),
                    attempts: 4,
                    message: "timed out".into(),
                })),
                _ => Ok(Resolution::Found(detail_for(game_name))),
            }
        }
    }

    #[async_trait]
    impl<'a> Extract for &'a FakeStorefront {
        async fn extract(&self, detail: &DetailRef) -> Result<ExtractedFields, AdapterError> {
            let name = detail.display_name.as_str();
            self.extracted.lock().unwrap().push(name.to_string());
            let mut fields = ExtractedFields::unavailable();
            match self.script(name) {
                Script::Gated => {
                    return Err(AdapterError::AgeGateBlocked {
                        url: detail.url.clone(),
                    })
                }
                Script::Garbage => return Err(AdapterError::Parse("no product".into())),
                Script::Free => {
                    fields.price = FREE.into();
                    fields.release_date = "09.07.2013".into();
                }
                Script::NoDate => fields.price = "$1.99".into(),
                _ => {
                    fields.price = "$9.99".into();
                    fields.release_date = "18.04.2011".into();
                }
            }
            Ok(fields)
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn controller<'a>(
        store: RecordStore,
        fake: &'a FakeStorefront,
        shutdown: Shutdown,
    ) -> IngestController<&'a FakeStorefront, &'a FakeStorefront> {
        let known = store.known_names();
        IngestController::new(store, known, fake, fake, shutdown)
    }

    fn stored_names(store: &RecordStore) -> Vec<String> {
        (0..store.len())
            .map(|i| store.row(i).unwrap()["game_name"].to_string())
            .collect()
    }

    #[tokio::test]
    async fn every_failure_kind_is_recorded_and_the_batch_continues() {
        let dir = tempdir().unwrap();
        let fake = FakeStorefront::default()
            .with("Missing", Script::Missing)
            .with("Offline", Script::Offline)
            .with("Gated", Script::Gated)
            .with("Garbage", Script::Garbage);
        let store = RecordStore::open(dir.path().join("out.csv")).unwrap();
        let mut ctl = controller(store, &fake, Shutdown::never());

        let summary = ctl
            .run(&names(&["Portal", "Missing", "Offline", "Gated", "Garbage"]))
            .await
            .unwrap();

        assert_eq!(summary.persisted, 5);
        assert!(!summary.interrupted);
        let store = ctl.store();
        let status = |i: usize| store.row(i).unwrap()["status"].to_string();
        assert_eq!(status(0), "ok");
        assert_eq!(status(1), "not_found");
        assert_eq!(status(2), "network_error");
        assert_eq!(status(3), "age_gate_blocked");
        assert_eq!(status(4), "parse_error");
        assert_eq!(store.row(1).unwrap()["detail_url"], "");
        assert_eq!(
            store.row(3).unwrap()["detail_url"],
            "https://store.steampowered.com/app/1/Gated/"
        );
        assert_eq!(summary.per_status.get(&RecordStatus::Ok), Some(&1));
        assert_eq!(
            *fake.extracted.lock().unwrap(),
            vec!["Portal", "Gated", "Garbage"],
            "only resolved names reach extraction"
        );
    }

    #[tokio::test]
    async fn second_run_over_same_input_adds_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let input = names(&["A", "Missing", "B"]);
        let fake = FakeStorefront::default().with("Missing", Script::Missing);

        {
            let store = RecordStore::open(&path).unwrap();
            let mut ctl = controller(store, &fake, Shutdown::never());
            ctl.run(&input).await.unwrap();
        }
        let fake_again = FakeStorefront::default();
        let store = RecordStore::open(&path).unwrap();
        let mut ctl = controller(store, &fake_again, Shutdown::never());
        let summary = ctl.run(&input).await.unwrap();

        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.skipped, 3);
        assert!(fake_again.resolved().is_empty(), "known names must not touch the network");
        assert_eq!(ctl.store().len(), 3);
    }

    #[tokio::test]
    async fn new_names_keep_input_order_and_in_list_duplicates_run_once() {
        let dir = tempdir().unwrap();
        let fake = FakeStorefront::default();
        let store = RecordStore::open(dir.path().join("out.csv")).unwrap();
        let mut ctl = controller(store, &fake, Shutdown::never());

        ctl.run(&names(&["Zeta", "Alpha", "Zeta", "Mid"]))
            .await
            .unwrap();

        assert_eq!(stored_names(ctl.store()), vec!["Zeta", "Alpha", "Mid"]);
        assert_eq!(fake.resolved(), vec!["Zeta", "Alpha", "Mid"]);
    }

    #[tokio::test]
    async fn stop_during_record_k_plus_one_persists_exactly_k() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let (trigger, shutdown) = shutdown::channel();
        let fake = FakeStorefront {
            stop_at: Some(("C".to_string(), trigger)),
            ..Default::default()
        };
        let store = RecordStore::open(&path).unwrap();
        let mut ctl = controller(store, &fake, shutdown);

        let summary = ctl
            .run(&names(&["A", "B", "C", "D", "E"]))
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.persisted, 2);
        assert_eq!(fake.resolved(), vec!["A", "B", "C"]);
        drop(ctl);

        let reloaded = RecordStore::load(&path).unwrap();
        assert_eq!(stored_names(&reloaded), vec!["A", "B"]);
        for i in 0..reloaded.len() {
            assert_eq!(reloaded.row(i).unwrap()["status"], "ok");
        }
    }

    #[tokio::test]
    async fn stop_before_start_touches_nothing() {
        let dir = tempdir().unwrap();
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();
        let fake = FakeStorefront::default();
        let store = RecordStore::open(dir.path().join("out.csv")).unwrap();
        let mut ctl = controller(store, &fake, shutdown);

        let summary = ctl.run(&names(&["A", "B"])).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.persisted, 0);
        assert!(fake.resolved().is_empty());
    }

    #[tokio::test]
    async fn stop_during_politeness_delay_ends_the_run() {
        let dir = tempdir().unwrap();
        let (trigger, shutdown) = shutdown::channel();
        let fake = FakeStorefront::default();
        let store = RecordStore::open(dir.path().join("out.csv")).unwrap();
        let mut ctl =
            controller(store, &fake, shutdown).with_delay(Duration::from_secs(3600));

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });
        let summary = ctl.run(&names(&["A", "B"])).await.unwrap();
        stopper.await.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.persisted, 1);
        assert_eq!(fake.resolved(), vec!["A"]);
    }

    #[tokio::test]
    async fn sentinels_do_not_fail_the_record() {
        let dir = tempdir().unwrap();
        let fake = FakeStorefront::default()
            .with("Free Game", Script::Free)
            .with("Undated", Script::NoDate);
        let store = RecordStore::open(dir.path().join("out.csv")).unwrap();
        let mut ctl = controller(store, &fake, Shutdown::never());

        ctl.run(&names(&["Free Game", "Undated"])).await.unwrap();

        let store = ctl.store();
        let free = store.row(0).unwrap();
        assert_eq!(free["status"], "ok");
        assert_eq!(free["price"], "Free");
        let undated = store.row(1).unwrap();
        assert_eq!(undated["status"], "ok");
        assert_eq!(undated["price"], "$1.99");
        assert_eq!(undated["release_date"], NOT_AVAILABLE);
    }

    #[tokio::test]
    async fn each_stage_advances_by_one_transition() {
        let dir = tempdir().unwrap();
        let fake = FakeStorefront::default()
            .with("Missing", Script::Missing)
            .with("Gated", Script::Gated);
        let store = RecordStore::open(dir.path().join("out.csv")).unwrap();
        let mut ctl = controller(store, &fake, Shutdown::never());

        let stage = ctl.step("Portal", Stage::Pending).await;
        assert_eq!(stage, Stage::Resolving);
        assert!(fake.resolved().is_empty());
        let stage = ctl.step("Portal", stage).await;
        assert_eq!(stage, Stage::Extracting(detail_for("Portal")));
        let Stage::Recorded(record) = ctl.step("Portal", stage).await else {
            panic!("extraction should yield a record");
        };
        assert_eq!(record.status, RecordStatus::Ok);
        assert!(ctl.store().is_empty(), "nothing is written before persist");

        assert_eq!(ctl.persist(record.clone()).unwrap(), Some(Stage::Persisted));
        assert_eq!(ctl.persist(record).unwrap(), None);
        assert_eq!(ctl.step("Portal", Stage::Persisted).await, Stage::Persisted);

        let stage = ctl.step("Missing", Stage::Resolving).await;
        assert!(matches!(&stage, Stage::Recorded(r) if r.status == RecordStatus::NotFound));

        let Stage::Recorded(gated) = ctl.step("Gated", Stage::Extracting(detail_for("Gated"))).await
        else {
            panic!("extraction failure should still yield a record");
        };
        assert_eq!(gated.status, RecordStatus::AgeGateBlocked);
        assert_eq!(
            ctl.persist(gated).unwrap(),
            Some(Stage::RecordedAsFailed(RecordStatus::AgeGateBlocked))
        );
        assert_eq!(ctl.store().len(), 2);
    }

    #[tokio::test]
    async fn name_held_by_the_store_but_not_the_known_set_is_written_once() {
        let dir = tempdir().unwrap();
        let fake = FakeStorefront::default();
        let mut store = RecordStore::open(dir.path().join("out.csv")).unwrap();
        store
            .append(&GameRecord::failed("A", None, RecordStatus::NotFound))
            .unwrap();
        let mut ctl = IngestController::new(store, HashSet::new(), &fake, &fake, Shutdown::never());

        let summary = ctl.run(&names(&["A", "A"])).await.unwrap();

        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.skipped, 2);
        assert!(summary.per_status.is_empty());
        assert_eq!(fake.resolved(), vec!["A"]);
        assert_eq!(ctl.store().len(), 1);
        assert_eq!(ctl.store().row(0).unwrap()["status"], "not_found");
    }

    #[tokio::test]
    async fn no_pause_when_the_remaining_names_are_already_stored() {
        let dir = tempdir().unwrap();
        let fake = FakeStorefront::default();
        let mut store = RecordStore::open(dir.path().join("out.csv")).unwrap();
        store
            .append(&GameRecord::failed("Known", None, RecordStatus::NotFound))
            .unwrap();
        let mut ctl =
            controller(store, &fake, Shutdown::never()).with_delay(Duration::from_secs(3600));

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            ctl.run(&names(&["New", "Known"])),
        )
        .await
        .expect("run should not wait once no fetch remains")
        .unwrap();

        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(fake.resolved(), vec!["New"]);
    }

    #[test]
    fn adapter_errors_map_to_statuses() {
        assert_eq!(
            status_for(&AdapterError::Selector("x".into())),
            RecordStatus::ParseError
        );
        assert_eq!(
            status_for(&AdapterError::AgeGateBlocked { url: "u".into() }),
            RecordStatus::AgeGateBlocked
        );
    }
}

//! Two-state run loop: Running executes one capture/analyze/emit cycle,
//! Waiting sleeps until the next one. There is no terminal state.
//!
//! All suspension goes through [`Clock`], so a fake clock drives the whole
//! loop in tests without sleeping.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use log::{error, info, warn};

use crate::analyze::{AnalysisRecord, RegionAnalyzer};
use crate::boundary::BoundaryLayer;
use crate::config::Config;
use crate::error::{ConfigError, RunError};
use crate::layout::RunLayout;
use crate::sinks::{Capture, Delivery, DeliveryOutcome, RecordStore, Reporter, RunSummary, Transport};
use crate::timestamp::{normalize, PAYLOAD_FORMAT};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Waiting(Duration),
}

/// Counts and paths from a cycle that reached the output stages.
#[derive(Debug)]
pub struct RunStats {
    pub timestamp: DateTime<FixedOffset>,
    pub dir: PathBuf,
    pub regions: usize,
    pub failed_regions: usize,
    pub zero_pixel_regions: usize,
    pub persisted: usize,
    pub report: Option<PathBuf>,
    pub delivery: DeliveryOutcome,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(RunStats),
    Aborted(RunError),
}

/// The external collaborators of a scheduler.
pub struct Collaborators {
    pub capture: Box<dyn Capture>,
    pub store: Box<dyn RecordStore>,
    pub reporter: Box<dyn Reporter>,
    pub transport: Box<dyn Transport>,
    pub clock: Box<dyn Clock>,
}

pub struct Scheduler<'a> {
    config: &'a Config,
    boundary: &'a BoundaryLayer,
    offset: FixedOffset,
    capture: Box<dyn Capture>,
    store: Box<dyn RecordStore>,
    reporter: Box<dyn Reporter>,
    delivery: Delivery,
    clock: Box<dyn Clock>,
    state: SchedulerState,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        config: &'a Config,
        boundary: &'a BoundaryLayer,
        parts: Collaborators,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            boundary,
            offset: config.schedule.offset()?,
            capture: parts.capture,
            store: parts.store,
            reporter: parts.reporter,
            delivery: Delivery::new(parts.transport, &config.delivery),
            clock: parts.clock,
            state: SchedulerState::Running,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Where a finished cycle sends the loop: the regular interval after a
    /// completed run, the shorter recovery wait after an aborted one.
    pub fn next_state(&self, outcome: &CycleOutcome) -> SchedulerState {
        match outcome {
            CycleOutcome::Completed(_) => SchedulerState::Waiting(self.config.schedule.interval()),
            CycleOutcome::Aborted(_) => SchedulerState::Waiting(self.config.schedule.recovery()),
        }
    }

    /// Advance the state machine by one transition. Returns the outcome when
    /// a cycle ran.
    pub fn step(&mut self) -> Option<CycleOutcome> {
        match self.state {
            SchedulerState::Running => {
                let outcome = self.run_cycle();
                self.state = self.next_state(&outcome);
                Some(outcome)
            }
            SchedulerState::Waiting(delay) => {
                info!("waiting {:.1} minutes before next run", delay.as_secs_f64() / 60.0);
                self.clock.sleep(delay);
                self.state = SchedulerState::Running;
                None
            }
        }
    }

    /// Run exactly `n` cycles, with the waits between them, and stop right
    /// after the last one.
    pub fn run_cycles(&mut self, n: usize) -> Vec<CycleOutcome> {
        let mut outcomes = Vec::with_capacity(n);
        while outcomes.len() < n {
            if let Some(outcome) = self.step() {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    pub fn run_forever(&mut self) -> ! {
        loop {
            self.step();
        }
    }

    /// One Running state, start to finish.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let started = self.clock.now();
        let timestamp = normalize(started, self.offset, self.config.schedule.grid_minutes);
        info!(
            "run started at {} (rounded to {})",
            started.with_timezone(&self.offset).format(PAYLOAD_FORMAT),
            timestamp.format(PAYLOAD_FORMAT)
        );

        match self.execute(timestamp) {
            Ok(stats) => {
                info!(
                    "run {} complete: {} regions, {} failed, {} persisted",
                    timestamp.format(PAYLOAD_FORMAT),
                    stats.regions,
                    stats.failed_regions,
                    stats.persisted
                );
                CycleOutcome::Completed(stats)
            }
            Err(err) => {
                error!("run {} aborted: {err}", timestamp.format(PAYLOAD_FORMAT));
                CycleOutcome::Aborted(err)
            }
        }
    }

    fn execute(&mut self, timestamp: DateTime<FixedOffset>) -> Result<RunStats, RunError> {
        let layout = RunLayout::new(&self.config.output.root, &self.boundary.district, timestamp);
        layout.create().map_err(|source| RunError::Layout {
            path: layout.dir().to_path_buf(),
            source,
        })?;

        let frame = self.capture.capture(&layout)?;
        let analysis = RegionAnalyzer::new(&self.config.extent, &self.config.alignment)
            .analyze(self.boundary, &frame, timestamp)?;
        let records = analysis.records();

        let persisted = self.persist(&records);
        let json = write_results(&layout, &records);

        let mut visualizations = Vec::new();
        for region in &analysis.regions {
            let Some(image) = &region.visualization else {
                continue;
            };
            let path = layout.region_visualization(&region.record.region_name);
            let saved = path
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .map_err(|e| e.to_string())
                .and_then(|()| image.save(&path).map_err(|e| e.to_string()));
            match saved {
                Ok(()) => visualizations.push((region.record.region_name.clone(), path)),
                Err(e) => warn!("cannot save visualisation {}: {e}", path.display()),
            }
        }

        let summary = RunSummary {
            district: &self.boundary.district,
            timestamp,
            layout: &layout,
            records: &records,
            visualizations: &visualizations,
            json: &json,
        };
        let report = match self.reporter.render(&summary) {
            Ok(path) => {
                info!("report written to {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("{e}");
                None
            }
        };

        let delivery = self.delivery.deliver(&records, self.clock.as_ref());

        Ok(RunStats {
            timestamp,
            dir: layout.dir().to_path_buf(),
            regions: analysis.regions.len(),
            failed_regions: analysis.failed.len(),
            zero_pixel_regions: analysis.zero_pixel_regions.len(),
            persisted,
            report,
            delivery,
        })
    }

    fn persist(&mut self, records: &[AnalysisRecord]) -> usize {
        let mut persisted = 0;
        for record in records {
            match self.store.upsert(record) {
                Ok(()) => {
                    info!("stored {} for {}", record.cloud_percentage, record.region_name);
                    persisted += 1;
                }
                Err(e) => error!("{}: {e}", record.region_name),
            }
        }
        persisted
    }
}

/// Write the two-space-indented results file; returns the JSON text (empty
/// array text if serialisation fails).
fn write_results(layout: &RunLayout, records: &[AnalysisRecord]) -> String {
    let json = match serde_json::to_string_pretty(records) {
        Ok(json) => json,
        Err(e) => {
            error!("cannot serialise results: {e}");
            return "[]".to_string();
        }
    };
    let path = layout.results_json();
    match fs::write(&path, &json) {
        Ok(()) => info!("results saved to {}", path.display()),
        Err(e) => error!("cannot write {}: {e}", path.display()),
    }
    json
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::Region;
    use crate::error::SinkError;
    use crate::geo_transform::{AlignmentParams, ImageExtent};
    use chrono::TimeZone;
    use geo::{polygon, MultiPolygon};
    use image::{Rgba, RgbaImage};
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};
    use std::rc::Rc;

    struct FakeClock {
        now: Cell<DateTime<Utc>>,
        sleeps: Rc<RefCell<Vec<Duration>>>,
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
            let step = chrono::Duration::from_std(duration).unwrap();
            self.now.set(self.now.get() + step);
        }
    }

    /// Plays back a queue of results, one per capture.
    struct ScriptedCapture {
        script: VecDeque<Result<RgbaImage, RunError>>,
    }

    impl Capture for ScriptedCapture {
        fn capture(&mut self, _layout: &RunLayout) -> Result<RgbaImage, RunError> {
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(RunError::CaptureFailure("script exhausted".into())))
        }
    }

    type Table = Rc<RefCell<HashMap<(String, String), AnalysisRecord>>>;

    struct MapStore {
        table: Table,
        writes: Rc<Cell<usize>>,
    }

    impl RecordStore for MapStore {
        fn upsert(&mut self, record: &AnalysisRecord) -> Result<(), SinkError> {
            self.writes.set(self.writes.get() + 1);
            let key = (record.region_name.clone(), record.timestamp.to_rfc3339());
            self.table.borrow_mut().insert(key, record.clone());
            Ok(())
        }
    }

    struct FailingReporter;

    impl Reporter for FailingReporter {
        fn render(&mut self, _summary: &RunSummary<'_>) -> Result<PathBuf, SinkError> {
            Err(SinkError::Reporting("disk full".into()))
        }
    }

    struct OkTransport(Rc<Cell<u32>>);

    impl Transport for OkTransport {
        fn post_json(&self, _endpoint: &str, _body: &str) -> Result<u16, SinkError> {
            self.0.set(self.0.get() + 1);
            Ok(201)
        }
    }

    struct Harness {
        config: Config,
        boundary: BoundaryLayer,
        _root: tempfile::TempDir,
        table: Table,
        writes: Rc<Cell<usize>>,
        posts: Rc<Cell<u32>>,
        sleeps: Rc<RefCell<Vec<Duration>>>,
    }

    fn harness() -> Harness {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.extent = ImageExtent {
            min_lon: 79.0,
            max_lon: 80.0,
            min_lat: 9.0,
            max_lat: 10.0,
            pixel_width: 100,
            pixel_height: 100,
        };
        config.alignment = AlignmentParams {
            zoom_factor: 1.0,
            offset_left: 0.0,
            offset_right: 0.0,
            offset_up: 0.0,
            offset_down: 0.0,
        };
        config.output.root = root.path().to_path_buf();
        config.delivery.endpoint = Some("http://localhost:8003/push".into());

        let west = Region {
            name: "West".into(),
            geometry: MultiPolygon(vec![polygon![
                (x: 79.0, y: 9.0), (x: 79.495, y: 9.0), (x: 79.495, y: 10.0), (x: 79.0, y: 10.0)
            ]]),
        };
        let east = Region {
            name: "East".into(),
            geometry: MultiPolygon(vec![polygon![
                (x: 79.505, y: 9.0), (x: 80.0, y: 9.0), (x: 80.0, y: 10.0), (x: 79.505, y: 10.0)
            ]]),
        };

        Harness {
            config,
            boundary: BoundaryLayer::from_regions("Ramanathapuram", vec![west, east]),
            _root: root,
            table: Rc::default(),
            writes: Rc::default(),
            posts: Rc::default(),
            sleeps: Rc::default(),
        }
    }

    impl Harness {
        fn scheduler(&self, script: Vec<Result<RgbaImage, RunError>>) -> Scheduler<'_> {
            let parts = Collaborators {
                capture: Box::new(ScriptedCapture { script: script.into() }),
                store: Box::new(MapStore {
                    table: Rc::clone(&self.table),
                    writes: Rc::clone(&self.writes),
                }),
                reporter: Box::new(FailingReporter),
                transport: Box::new(OkTransport(Rc::clone(&self.posts))),
                // 04:40:10 UTC is 10:10:10 IST, which rounds to 10:15.
                clock: Box::new(FakeClock {
                    now: Cell::new(Utc.with_ymd_and_hms(2025, 6, 1, 4, 40, 10).unwrap()),
                    sleeps: Rc::clone(&self.sleeps),
                }),
            };
            Scheduler::new(&self.config, &self.boundary, parts).unwrap()
        }
    }

    fn half_cloudy() -> RgbaImage {
        let mut frame = RgbaImage::from_pixel(100, 100, Rgba([20, 60, 20, 255]));
        for (x, _, px) in frame.enumerate_pixels_mut() {
            if x < 50 {
                *px = Rgba([250, 250, 250, 255]);
            }
        }
        frame
    }

    #[test]
    fn completed_cycle_emits_all_outputs() {
        let h = harness();
        let mut scheduler = h.scheduler(vec![Ok(half_cloudy())]);
        let outcome = scheduler.run_cycle();

        let CycleOutcome::Completed(stats) = outcome else {
            panic!("expected a completed cycle");
        };
        assert_eq!(stats.regions, 2);
        assert_eq!(stats.persisted, 2);
        assert_eq!(stats.zero_pixel_regions, 0);
        assert_eq!(stats.report, None);
        assert_eq!(stats.delivery, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(stats.timestamp.format(PAYLOAD_FORMAT).to_string(), "2025-06-01 10:15:00");
        assert!(stats.dir.ends_with("ramanathapuram/2025-06-01_10-15-00"));

        let json = fs::read_to_string(stats.dir.join("cloud_analysis_results.json")).unwrap();
        assert!(json.starts_with("[\n  {\n    \""));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["taluk"], "West");
        assert_eq!(parsed[0]["values"], "100.00%");
        assert_eq!(parsed[1]["values"], "0.00%");
        assert!(stats.dir.join("masked_regions/west/west_masked.png").is_file());
        assert_eq!(h.posts.get(), 1);
    }

    #[test]
    fn completed_cycle_waits_the_regular_interval() {
        let h = harness();
        let mut scheduler = h.scheduler(vec![Ok(half_cloudy())]);
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.step();
        assert_eq!(scheduler.state(), SchedulerState::Waiting(Duration::from_secs(300)));
        assert!(scheduler.step().is_none());
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(*h.sleeps.borrow(), vec![Duration::from_secs(300)]);
    }

    #[test]
    fn capture_failure_aborts_and_recovers_sooner() {
        let h = harness();
        let mut scheduler = h.scheduler(vec![
            Err(RunError::CaptureFailure("browser crashed".into())),
            Ok(half_cloudy()),
        ]);
        let outcomes = scheduler.run_cycles(2);

        assert!(matches!(outcomes[0], CycleOutcome::Aborted(RunError::CaptureFailure(_))));
        assert!(matches!(outcomes[1], CycleOutcome::Completed(_)));
        assert_eq!(*h.sleeps.borrow(), vec![Duration::from_secs(120)]);
        assert_eq!(h.writes.get(), 2);
        assert_eq!(scheduler.state(), SchedulerState::Waiting(Duration::from_secs(300)));
    }

    #[test]
    fn extent_mismatch_aborts_the_run() {
        let h = harness();
        let mut scheduler = h.scheduler(vec![Ok(RgbaImage::new(64, 64))]);
        let outcome = scheduler.run_cycle();
        assert!(matches!(outcome, CycleOutcome::Aborted(RunError::ExtentMismatch { .. })));
        assert_eq!(
            scheduler.next_state(&outcome),
            SchedulerState::Waiting(Duration::from_secs(120))
        );
        assert_eq!(h.writes.get(), 0);
        assert_eq!(h.posts.get(), 0);
    }

    #[test]
    fn reruns_in_the_same_slot_overwrite() {
        let h = harness();
        // 10:10:10 and, five minutes later, 10:15:10 both round to 10:15.
        let clear = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        let mut scheduler = h.scheduler(vec![Ok(half_cloudy()), Ok(clear)]);
        let outcomes = scheduler.run_cycles(2);
        assert!(outcomes.iter().all(|o| matches!(o, CycleOutcome::Completed(_))));

        assert_eq!(h.writes.get(), 4);
        let table = h.table.borrow();
        assert_eq!(table.len(), 2);
        assert!(table.values().all(|r| r.cloud_percentage == "0.00%"));
    }
}

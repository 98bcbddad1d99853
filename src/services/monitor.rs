use crate::domain::ContainerStatus;
use crate::services::status::StatusSnapshot;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// How many past snapshots are kept between monitoring runs.
pub const STATUS_HISTORY_LENGTH: usize = 10;

/// Per-container view over the history window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedStatusReport {
    pub container_name: String,
    pub current_status: ContainerStatus,
    /// The raw current status, shown as the container's overall condition.
    pub overall_status: ContainerStatus,
    pub current_msg: String,
    pub changed: bool,
}

/// Decide, per container in the newest snapshot, whether its condition
/// changed in a way worth reporting.
///
/// `history` is ordered newest first, with the just-computed snapshot
/// already inserted at index 0.
///
/// STARTING entries are transient (they resolve into whatever comes
/// next) and are filtered out of the change computation so restart churn
/// does not page anyone. With too little settled history to judge a real
/// transition, any current failure is reported immediately. The overall
/// status is deliberately the raw newest entry, not the filtered one.
pub fn detect_flapping_and_changes(
    history: &[StatusSnapshot],
) -> (bool, Vec<ExtendedStatusReport>) {
    let Some(newest) = history.first() else {
        return (false, Vec::new());
    };

    let mut changes_to_report = false;
    let mut reports = Vec::with_capacity(newest.len());
    for (name, (current_status, current_msg)) in newest {
        let raw: Vec<ContainerStatus> = history
            .iter()
            .filter_map(|snapshot| snapshot.get(name).map(|(status, _)| *status))
            .collect();
        let settled: Vec<ContainerStatus> = raw
            .iter()
            .copied()
            .filter(|status| *status != ContainerStatus::Starting)
            .collect();

        let changed = if settled.len() > 2 {
            settled[0] != settled[1]
        } else {
            matches!(raw[0], ContainerStatus::Failed | ContainerStatus::Missing)
        };
        changes_to_report |= changed;

        reports.push(ExtendedStatusReport {
            container_name: name.clone(),
            current_status: *current_status,
            overall_status: raw[0],
            current_msg: current_msg.clone(),
            changed,
        });
    }
    // BTreeMap iteration already yields names in order
    (changes_to_report, reports)
}

/// JSON-persisted history window, newest snapshot first.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<Vec<StatusSnapshot>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("parsing status history {:?}", self.path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("reading status history {:?}", self.path)),
        }
    }

    /// Persist the window, truncated to [`STATUS_HISTORY_LENGTH`] entries.
    pub fn save(&self, history: &[StatusSnapshot]) -> Result<()> {
        let capped = &history[..history.len().min(STATUS_HISTORY_LENGTH)];
        let serialized = serde_json::to_string(capped)?;
        let mut file = File::create(&self.path)
            .with_context(|| format!("writing status history {:?}", self.path))?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()
            .with_context(|| format!("syncing status history {:?}", self.path))?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MonitorOutcome {
    pub changes_to_report: bool,
    pub reports: Vec<ExtendedStatusReport>,
}

/// One monitoring tick: fold the fresh snapshot into the persisted
/// window, decide what changed, persist the capped window again.
pub fn run_monitor(store: &HistoryStore, current: StatusSnapshot) -> Result<MonitorOutcome> {
    let mut history = store.load()?;
    history.insert(0, current);
    let (changes_to_report, reports) = detect_flapping_and_changes(&history);
    store.save(&history)?;
    Ok(MonitorOutcome {
        changes_to_report,
        reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContainerStatus::{Failed, Okay, Starting};

    fn snapshot(status: ContainerStatus) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot::new();
        snapshot.insert("foo".to_string(), (status, "no msg".to_string()));
        snapshot
    }

    fn history(statuses: &[ContainerStatus]) -> Vec<StatusSnapshot> {
        statuses.iter().map(|s| snapshot(*s)).collect()
    }

    #[test]
    fn all_okay() {
        let list = history(&[Okay; STATUS_HISTORY_LENGTH + 1]);
        let (changed, status) = detect_flapping_and_changes(&list);
        assert!(!changed);
        assert_eq!(changed, status[0].changed);
        assert_eq!(status[0].overall_status, Okay);
        assert_eq!(status[0].current_status, Okay);
        assert_eq!(status[0].container_name, "foo");
        assert_eq!(status[0].current_msg, "no msg");
    }

    #[test]
    fn all_failed() {
        let list = history(&[Failed; STATUS_HISTORY_LENGTH + 1]);
        let (changed, status) = detect_flapping_and_changes(&list);
        assert!(!changed);
        assert_eq!(changed, status[0].changed);
        assert_eq!(status[0].overall_status, Failed);
        assert_eq!(status[0].current_status, Failed);
    }

    #[test]
    fn failed_after_starting_short() {
        let mut statuses = vec![Failed];
        statuses.extend([Starting; STATUS_HISTORY_LENGTH - 1]);
        statuses.push(Okay);
        let (changed, status) = detect_flapping_and_changes(&history(&statuses));
        assert!(changed);
        assert_eq!(status[0].overall_status, Failed);
    }

    #[test]
    fn failed_after_starting_very_long() {
        let mut statuses = vec![Failed];
        statuses.extend([Starting; STATUS_HISTORY_LENGTH]);
        let (changed, status) = detect_flapping_and_changes(&history(&statuses));
        assert!(changed);
        assert_eq!(status[0].overall_status, Failed);
    }

    #[test]
    fn okay_after_failed() {
        let mut statuses = vec![Okay];
        statuses.extend([Failed; STATUS_HISTORY_LENGTH]);
        let (changed, status) = detect_flapping_and_changes(&history(&statuses));
        assert!(changed);
        assert_eq!(status[0].overall_status, Okay);
    }

    #[test]
    fn failed_after_okay() {
        let mut statuses = vec![Failed];
        statuses.extend([Okay; STATUS_HISTORY_LENGTH]);
        let (changed, status) = detect_flapping_and_changes(&history(&statuses));
        assert!(changed);
        assert_eq!(status[0].overall_status, Failed);
    }

    #[test]
    fn missing_data() {
        let mut statuses = vec![Failed; STATUS_HISTORY_LENGTH - 1];
        statuses.push(Okay);
        let (changed, status) = detect_flapping_and_changes(&history(&statuses));
        assert!(!changed);
        assert_eq!(status[0].overall_status, Failed);
    }

    #[test]
    fn too_much_data() {
        let mut statuses = vec![Okay; STATUS_HISTORY_LENGTH + 1];
        statuses.push(Failed);
        let (changed, status) = detect_flapping_and_changes(&history(&statuses));
        assert!(!changed);
        assert_eq!(status[0].overall_status, Okay);
    }

    #[test]
    fn first_run_failure_alerts_immediately() {
        let (changed, status) = detect_flapping_and_changes(&history(&[Failed]));
        assert!(changed);
        assert_eq!(status[0].overall_status, Failed);

        let (changed, _) = detect_flapping_and_changes(&history(&[Okay]));
        assert!(!changed);
    }

    #[test]
    fn missing_status_alerts_without_history() {
        let (changed, status) = detect_flapping_and_changes(&history(&[ContainerStatus::Missing]));
        assert!(changed);
        assert_eq!(status[0].overall_status, ContainerStatus::Missing);
    }

    #[test]
    fn containers_absent_from_older_snapshots_are_tolerated() {
        let mut list = vec![snapshot(Okay), StatusSnapshot::new(), snapshot(Okay)];
        list.push(snapshot(Failed));
        let (_, status) = detect_flapping_and_changes(&list);
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].overall_status, Okay);
    }

    #[test]
    fn reports_are_sorted_by_container_name() {
        let mut newest = StatusSnapshot::new();
        newest.insert("zeta".to_string(), (Okay, String::new()));
        newest.insert("alpha".to_string(), (Okay, String::new()));
        let (_, reports) = detect_flapping_and_changes(&[newest]);
        let names: Vec<&str> = reports.iter().map(|r| r.container_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn flapping_every_cycle_keeps_reporting() {
        // OKAY/FAILED alternation is reported on every cycle by design
        let statuses = [Okay, Failed, Okay, Failed, Okay, Failed];
        let (changed, _) = detect_flapping_and_changes(&history(&statuses));
        assert!(changed);
    }

    #[test]
    fn history_round_trips_and_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(&dir.path().join("status_history.json"));

        assert!(store.load().unwrap().is_empty());

        let list = history(&[Okay; STATUS_HISTORY_LENGTH + 4]);
        store.save(&list).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), STATUS_HISTORY_LENGTH);
        assert_eq!(loaded[0].get("foo").unwrap().0, Okay);
    }

    #[test]
    fn run_monitor_inserts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(&dir.path().join("status_history.json"));

        let outcome = run_monitor(&store, snapshot(Failed)).unwrap();
        // no settled history yet: a failure alerts immediately
        assert!(outcome.changes_to_report);

        for _ in 0..STATUS_HISTORY_LENGTH {
            run_monitor(&store, snapshot(Failed)).unwrap();
        }
        // stable failure is no longer a change
        let outcome = run_monitor(&store, snapshot(Failed)).unwrap();
        assert!(!outcome.changes_to_report);
        assert_eq!(store.load().unwrap().len(), STATUS_HISTORY_LENGTH);
    }
}

//! Quiet-period batching of source changes.

use serde::Serialize;
use specpage_core::{ChangeKind, SourceChange};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebounceState {
    Idle,
    Observing,
    Debouncing,
    Triggered,
}

/// One batch of changes, released after the source tree went quiet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Coalesced changes in the order their paths were last touched.
    pub changes: Vec<SourceChange>,
    /// Most recently changed path.
    pub latest: PathBuf,
}

impl Trigger {
    /// Folds this trigger over the changes of an abandoned one, so the next
    /// build still covers everything the abandoned build was meant to.
    pub fn carry(self, earlier: &Trigger) -> Trigger {
        let mut changes = earlier.changes.clone();
        for change in self.changes {
            let kind = match changes.iter().position(|seen| seen.path == change.path) {
                // The abandoned build may already have written this page.
                Some(index) => changes
                    .remove(index)
                    .kind
                    .then(change.kind)
                    .unwrap_or(ChangeKind::Removed),
                None => change.kind,
            };
            changes.push(SourceChange {
                path: change.path,
                kind,
            });
        }
        Trigger {
            changes,
            latest: self.latest,
        }
    }
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    state: DebounceState,
    pending: Vec<SourceChange>,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
            pending: Vec::new(),
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn start(&mut self) {
        if self.state == DebounceState::Idle {
            self.state = DebounceState::Observing;
        }
    }

    /// Records a change and pushes the deadline out to `now + window`.
    pub fn record(&mut self, path: PathBuf, kind: ChangeKind, now: Instant) {
        let merged = match self.pending.iter().position(|change| change.path == path) {
            Some(index) => self.pending.remove(index).kind.then(kind),
            None => Some(kind),
        };
        if let Some(kind) = merged {
            self.pending.push(SourceChange { path, kind });
        }
        self.state = DebounceState::Debouncing;
        self.deadline = Some(now + self.window);
    }

    /// Releases the pending batch once the deadline has passed. A batch
    /// whose changes all cancelled out is dropped without a trigger.
    pub fn poll(&mut self, now: Instant) -> Option<Trigger> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;

        let changes = std::mem::take(&mut self.pending);
        let Some(latest) = changes.last().map(|change| change.path.clone()) else {
            self.state = DebounceState::Observing;
            return None;
        };
        self.state = DebounceState::Triggered;
        Some(Trigger { changes, latest })
    }

    /// Goes back to observing after a trigger was handed off.
    pub fn resume(&mut self) {
        if self.state == DebounceState::Triggered {
            self.state = DebounceState::Observing;
        }
    }
}

/// Feeds raw changes through `debouncer` and forwards one trigger per quiet
/// period. Returns when either channel closes.
pub async fn run_debouncer(
    mut debouncer: Debouncer,
    mut changes: mpsc::Receiver<SourceChange>,
    triggers: mpsc::Sender<Trigger>,
) {
    debouncer.start();
    loop {
        let deadline = debouncer.deadline();
        // Only polled while a deadline is set.
        let wake = deadline.unwrap_or_else(|| Instant::now() + debouncer.window());

        tokio::select! {
            change = changes.recv() => match change {
                Some(change) => {
                    tracing::trace!(
                        path = %change.path.display(),
                        kind = ?change.kind,
                        "source change"
                    );
                    debouncer.record(change.path, change.kind, Instant::now());
                }
                None => break,
            },
            _ = sleep_until(wake), if deadline.is_some() => {
                if let Some(trigger) = debouncer.poll(Instant::now()) {
                    tracing::debug!(
                        changes = trigger.changes.len(),
                        latest = %trigger.latest.display(),
                        "changes settled"
                    );
                    if triggers.send(trigger).await.is_err() {
                        break;
                    }
                    debouncer.resume();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn test_state_walk() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        assert_eq!(debouncer.state(), DebounceState::Idle);

        debouncer.start();
        assert_eq!(debouncer.state(), DebounceState::Observing);

        debouncer.record("a.yaml".into(), ChangeKind::Modified, now);
        assert_eq!(debouncer.state(), DebounceState::Debouncing);
        assert!(debouncer.poll(now + Duration::from_millis(499)).is_none());

        let trigger = debouncer.poll(now + WINDOW).unwrap();
        assert_eq!(trigger.latest, PathBuf::from("a.yaml"));
        assert_eq!(debouncer.state(), DebounceState::Triggered);

        debouncer.resume();
        assert_eq!(debouncer.state(), DebounceState::Observing);
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn test_each_change_resets_the_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.start();
        debouncer.record("a.yaml".into(), ChangeKind::Modified, start);
        let later = start + Duration::from_millis(400);
        debouncer.record("b.yaml".into(), ChangeKind::Modified, later);

        assert!(debouncer.poll(start + WINDOW).is_none());
        let trigger = debouncer.poll(later + WINDOW).unwrap();
        assert_eq!(trigger.changes.len(), 2);
        assert_eq!(trigger.latest, PathBuf::from("b.yaml"));
    }

    #[test]
    fn test_kinds_coalesce_per_path() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.start();
        debouncer.record("new.yaml".into(), ChangeKind::Created, now);
        debouncer.record("new.yaml".into(), ChangeKind::Modified, now);
        debouncer.record("gone.yaml".into(), ChangeKind::Modified, now);
        debouncer.record("gone.yaml".into(), ChangeKind::Removed, now);
        debouncer.record("back.yaml".into(), ChangeKind::Removed, now);
        debouncer.record("back.yaml".into(), ChangeKind::Created, now);
        debouncer.record("temp.yaml".into(), ChangeKind::Created, now);
        debouncer.record("temp.yaml".into(), ChangeKind::Removed, now);

        let trigger = debouncer.poll(now + WINDOW).unwrap();
        assert_eq!(
            trigger.changes,
            vec![
                SourceChange::new("new.yaml", ChangeKind::Created),
                SourceChange::new("gone.yaml", ChangeKind::Removed),
                SourceChange::new("back.yaml", ChangeKind::Modified),
            ]
        );
        assert_eq!(trigger.latest, PathBuf::from("back.yaml"));
    }

    #[test]
    fn test_batch_that_cancels_out_is_dropped() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.start();
        debouncer.record("temp.yaml".into(), ChangeKind::Created, now);
        debouncer.record("temp.yaml".into(), ChangeKind::Removed, now);

        assert!(debouncer.poll(now + WINDOW).is_none());
        assert_eq!(debouncer.state(), DebounceState::Observing);
    }

    #[test]
    fn test_carry_keeps_abandoned_changes() {
        let earlier = Trigger {
            changes: vec![
                SourceChange::new("a.yaml", ChangeKind::Modified),
                SourceChange::new("new.yaml", ChangeKind::Created),
                SourceChange::new("old.yaml", ChangeKind::Removed),
            ],
            latest: PathBuf::from("old.yaml"),
        };
        let later = Trigger {
            changes: vec![
                SourceChange::new("b.yaml", ChangeKind::Created),
                SourceChange::new("new.yaml", ChangeKind::Removed),
                SourceChange::new("old.yaml", ChangeKind::Created),
            ],
            latest: PathBuf::from("old.yaml"),
        };

        let merged = later.carry(&earlier);
        assert_eq!(
            merged.changes,
            vec![
                SourceChange::new("a.yaml", ChangeKind::Modified),
                SourceChange::new("b.yaml", ChangeKind::Created),
                SourceChange::new("new.yaml", ChangeKind::Removed),
                SourceChange::new("old.yaml", ChangeKind::Modified),
            ]
        );
        assert_eq!(merged.latest, PathBuf::from("old.yaml"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_changes_make_one_trigger() {
        let (change_tx, change_rx) = mpsc::channel(32);
        let (trigger_tx, mut trigger_rx) = mpsc::channel(4);
        let task = tokio::spawn(run_debouncer(
            Debouncer::new(DEFAULT_DEBOUNCE_WINDOW),
            change_rx,
            trigger_tx,
        ));

        for i in 0..10 {
            let path = PathBuf::from(format!("doc{}.yaml", i % 3));
            change_tx
                .send(SourceChange::new(path, ChangeKind::Modified))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let trigger = trigger_rx.recv().await.unwrap();
        assert_eq!(trigger.changes.len(), 3);
        assert_eq!(trigger.latest, PathBuf::from("doc0.yaml"));

        tokio::time::sleep(DEFAULT_DEBOUNCE_WINDOW * 3).await;
        assert!(trigger_rx.try_recv().is_err());

        drop(change_tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_quiet_periods_make_separate_triggers() {
        let (change_tx, change_rx) = mpsc::channel(8);
        let (trigger_tx, mut trigger_rx) = mpsc::channel(4);
        tokio::spawn(run_debouncer(Debouncer::new(WINDOW), change_rx, trigger_tx));

        change_tx
            .send(SourceChange::new("a.yaml", ChangeKind::Modified))
            .await
            .unwrap();
        let first = trigger_rx.recv().await.unwrap();
        change_tx
            .send(SourceChange::new("b.yaml", ChangeKind::Created))
            .await
            .unwrap();
        let second = trigger_rx.recv().await.unwrap();

        assert_eq!(first.latest, PathBuf::from("a.yaml"));
        assert_eq!(
            second.changes,
            vec![SourceChange::new("b.yaml", ChangeKind::Created)]
        );
    }
}

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use specpage_core::{ChangeKind, SourceChange, SourceFilter};
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("could not create file watcher: {0}")]
    Create(#[source] notify::Error),
    #[error("could not watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        source: notify::Error,
    },
}

/// Bridges file-system notifications for source files into a channel.
///
/// Dropping the watcher stops the notifications.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
}

impl SourceWatcher {
    pub fn start(
        filter: SourceFilter,
        tx: mpsc::Sender<SourceChange>,
    ) -> Result<Self, WatchError> {
        let root = filter.source_dir().to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for change in source_changes(&event, &filter) {
                        // Receiver gone means the session is over.
                        if tx.blocking_send(change).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => tracing::warn!("watch error: {e}"),
            }
        })
        .map_err(WatchError::Create)?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Watch {
                path: root.clone(),
                source,
            })?;
        tracing::info!(path = %root.display(), "watching sources");

        Ok(Self { _watcher: watcher })
    }
}

/// Maps one notification onto changes of source files.
fn source_changes(event: &Event, filter: &SourceFilter) -> Vec<SourceChange> {
    let kinds: Vec<ChangeKind> = match &event.kind {
        EventKind::Create(_) => vec![ChangeKind::Created],
        EventKind::Remove(_) => vec![ChangeKind::Removed],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![ChangeKind::Removed],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![ChangeKind::Created],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            vec![ChangeKind::Removed, ChangeKind::Created]
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Direction unknown: decide by what is on disk now.
            return event
                .paths
                .iter()
                .filter(|path| filter.is_source(path))
                .map(|path| {
                    let kind = if path.exists() {
                        ChangeKind::Created
                    } else {
                        ChangeKind::Removed
                    };
                    SourceChange::new(path.clone(), kind)
                })
                .collect();
        }
        EventKind::Modify(_) => vec![ChangeKind::Modified],
        _ => return Vec::new(),
    };

    // A `Both` rename carries [from, to]; other events share one kind.
    event
        .paths
        .iter()
        .enumerate()
        .filter(|(_, path)| filter.is_source(path))
        .map(|(i, path)| {
            let kind = kinds.get(i).or(kinds.last()).copied().unwrap_or(ChangeKind::Modified);
            SourceChange::new(path.clone(), kind)
        })
        .collect()
}

use std::any::Any;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// New or modified files under the watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderChange {
    pub paths: Vec<PathBuf>,
}

/// Live subscription; dropping it stops the underlying watcher.
pub struct WatchSubscription {
    _guard: Box<dyn Any + Send>,
    pub events: mpsc::UnboundedReceiver<FolderChange>,
}

impl WatchSubscription {
    pub fn new(guard: impl Any + Send, events: mpsc::UnboundedReceiver<FolderChange>) -> Self {
        Self {
            _guard: Box::new(guard),
            events,
        }
    }
}

pub trait FolderWatcher: Send + Sync {
    fn watch(&self, root: &Path, recursive: bool) -> Result<WatchSubscription, WatchError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyFolderWatcher;

impl FolderWatcher for NotifyFolderWatcher {
    fn watch(&self, root: &Path, recursive: bool) -> Result<WatchSubscription, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watch_root = root.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res
                && let Some(change) = map_event(&watch_root, event)
            {
                let _ = tx.send(change);
            }
        })
        .map_err(|source| WatchError::Notify {
            path: root.to_path_buf(),
            source,
        })?;
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(root, mode)
            .map_err(|source| WatchError::Notify {
                path: root.to_path_buf(),
                source,
            })?;
        Ok(WatchSubscription::new(watcher, rx))
    }
}

fn map_event(root: &Path, event: Event) -> Option<FolderChange> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            let paths: Vec<PathBuf> = event
                .paths
                .into_iter()
                .filter(|path| is_relevant(root, path))
                .collect();
            (!paths.is_empty()).then_some(FolderChange { paths })
        }
        _ => None,
    }
}

fn is_relevant(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    !relative
        .components()
        .any(|component| component.as_os_str().to_string_lossy().starts_with('.'))
}

/// Trailing-edge debounce: every poke pushes the deadline out by `window`.
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn poke(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarms and returns true once the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

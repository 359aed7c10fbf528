pub mod coordinator;
pub mod download;
pub mod duplicates;
pub mod error;
pub mod history;
pub mod index;
pub mod local_watcher;
pub mod paths;
pub mod probe;
pub mod progress;
pub mod retry;
pub mod throttle;
pub mod transfer;
pub mod upload;

pub(crate) fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

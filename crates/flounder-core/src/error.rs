use crate::watcher::WatcherState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{method}() requires watcher state {expected:?}, but the watcher is {actual:?}")]
    InvalidState {
        method: &'static str,
        expected: WatcherState,
        actual: WatcherState,
    },

    #[error("cannot nudge sentinel scroll offsets: the watcher subtree has no path to the document root")]
    NotAttached,
}

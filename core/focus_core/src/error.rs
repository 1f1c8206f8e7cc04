use crate::tracker::TabId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The tab closed (or was never seen) between the event and the lookup.
    #[error("tab {tab_id} could not be resolved")]
    TabResolution { tab_id: TabId },

    #[error("url has no usable hostname: {url}")]
    MalformedUrl { url: String },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("site is empty after normalization")]
    InvalidSite,
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

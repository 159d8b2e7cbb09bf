use crate::{metadata::MetadataError, storage::ZipStoreCreateError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing `{0}` query parameter")]
    MissingLocator(String),
    #[error("invalid source locator: {0}")]
    InvalidLocator(String),
    #[error("could not open archive: {0}")]
    ArchiveOpen(#[from] ZipStoreCreateError),
    #[error("could not resolve root group: {0}")]
    MetadataResolution(#[from] MetadataError),
    #[error("display element `{0}` does not exist")]
    MissingElement(String),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_locator(message: impl Into<String>) -> Self {
        Self::InvalidLocator(message.into())
    }
}

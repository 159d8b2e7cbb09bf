//! A synchronous HTTP store.

use std::{collections::HashMap, str::FromStr, time::Duration};

use reqwest::{
    StatusCode, Url,
    blocking::{Client, Response},
    header::{CONTENT_LENGTH, HeaderValue, RANGE},
};
use parking_lot::Mutex;
use thiserror::Error;
use zarrs::storage::{
    Bytes, MaybeBytes, MaybeBytesIterator, ReadableStorageTraits, StorageError, StoreKey,
    byte_range::{ByteRange, ByteRangeIterator, InvalidByteRangeError},
};

/// Default timeout applied to each request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for [`HttpStore`].
#[derive(Debug, Clone)]
pub struct HttpStoreOptions {
    timeout: Option<Duration>,
}

impl Default for HttpStoreOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl HttpStoreOptions {
    /// Set the per-request timeout. [`None`] waits indefinitely.
    pub fn timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A synchronous, read-only HTTP store.
///
/// Keys are resolved relative to the path of the base URL; any query on the base URL
/// (e.g. a presigned signature) is kept on every request.
/// Partial reads are served with one `Range` request per byte range.
/// Value sizes are requested once with `HEAD` and then reused.
#[derive(Debug)]
pub struct HttpStore {
    base_url: Url,
    client: Client,
    sizes: Mutex<HashMap<String, u64>>,
}

impl HttpStore {
    /// Create a new HTTP store at a given `base_url`.
    ///
    /// # Errors
    /// Returns a [`HttpStoreCreateError`] if `base_url` is not a valid URL.
    pub fn new(base_url: &str) -> Result<Self, HttpStoreCreateError> {
        Self::new_with_options(base_url, &HttpStoreOptions::default())
    }

    /// Create a new HTTP store at a given `base_url` with non-default options.
    ///
    /// # Errors
    /// Returns a [`HttpStoreCreateError`] if `base_url` is not a valid URL
    /// or the HTTP client cannot be initialised.
    pub fn new_with_options(
        base_url: &str,
        options: &HttpStoreOptions,
    ) -> Result<Self, HttpStoreCreateError> {
        let url = Url::from_str(base_url)
            .map_err(|_| HttpStoreCreateError::InvalidBaseUrl(base_url.into()))?;
        Self::from_url(url, options)
    }

    /// Create a new HTTP store from a parsed base URL.
    ///
    /// # Errors
    /// Returns a [`HttpStoreCreateError`] if the URL cannot have a path
    /// or the HTTP client cannot be initialised.
    pub fn from_url(base_url: Url, options: &HttpStoreOptions) -> Result<Self, HttpStoreCreateError> {
        if base_url.cannot_be_a_base() {
            return Err(HttpStoreCreateError::InvalidBaseUrl(base_url.into()));
        }
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self {
            base_url,
            client,
            sizes: Mutex::default(),
        })
    }

    /// Split the URL of a single resource into a store rooted at its parent and the key of the resource.
    ///
    /// # Errors
    /// Returns a [`HttpStoreCreateError`] if the URL has no final path segment.
    pub fn for_resource(
        url: &Url,
        options: &HttpStoreOptions,
    ) -> Result<(Self, StoreKey), HttpStoreCreateError> {
        let path = url.path();
        let (parent, name) = path
            .rsplit_once('/')
            .filter(|(_, name)| !name.is_empty())
            .ok_or_else(|| HttpStoreCreateError::NoResource(url.to_string()))?;
        let key = StoreKey::new(name)
            .map_err(|_| HttpStoreCreateError::NoResource(url.to_string()))?;
        let mut base_url = url.clone();
        base_url.set_path(parent);
        Ok((Self::from_url(base_url, options)?, key))
    }

    /// Maps a [`StoreKey`] to a HTTP [`Url`].
    #[must_use]
    pub fn key_to_url(&self, key: &StoreKey) -> Url {
        let mut url = self.base_url.clone();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), key.as_str());
        url.set_path(&path);
        url
    }

    fn get_range(&self, url: &Url, byte_range: ByteRange, size: u64) -> Result<Bytes, StorageError> {
        let start = byte_range.start(size);
        let end = byte_range.end(size);
        if end > size || start > end {
            return Err(InvalidByteRangeError::new(byte_range, size).into());
        }
        if start == end {
            return Ok(Bytes::new());
        }
        let range = HeaderValue::from_str(&format!("bytes={start}-{}", end - 1))
            .map_err(|err| StorageError::Other(err.to_string()))?;
        log::debug!("GET {url} {range:?}");
        let response = self
            .client
            .get(url.clone())
            .header(RANGE, range)
            .send()
            .map_err(request_error)?;
        let expected = usize::try_from(end - start)
            .map_err(|_| StorageError::Other("byte range exceeds usize::MAX".into()))?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let bytes = response.bytes().map_err(request_error)?;
                if bytes.len() == expected {
                    Ok(bytes)
                } else {
                    Err(StorageError::Other(format!(
                        "http partial content response for {url} has {} bytes, expected {expected}",
                        bytes.len()
                    )))
                }
            }
            StatusCode::OK => {
                // The server ignored the range header
                let bytes = response.bytes().map_err(request_error)?;
                let start = usize::try_from(start)
                    .map_err(|_| StorageError::Other("byte range exceeds usize::MAX".into()))?;
                if bytes.len() < start + expected {
                    return Err(InvalidByteRangeError::new(byte_range, bytes.len() as u64).into());
                }
                Ok(bytes.slice(start..start + expected))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                Err(InvalidByteRangeError::new(byte_range, size).into())
            }
            status => Err(unexpected_status(url, status)),
        }
    }
}

fn request_error(err: reqwest::Error) -> StorageError {
    StorageError::Other(err.to_string())
}

fn unexpected_status(url: &Url, status: StatusCode) -> StorageError {
    StorageError::Other(format!("the http server responded with status {status} for {url}"))
}

fn content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|header_value| header_value.to_str().ok())
        .and_then(|header_str| u64::from_str(header_str).ok())
}

impl ReadableStorageTraits for HttpStore {
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        let url = self.key_to_url(key);
        log::debug!("GET {url}");
        let response = self.client.get(url.clone()).send().map_err(request_error)?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.bytes().map_err(request_error)?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(unexpected_status(&url, status)),
        }
    }

    fn get_partial_many<'a>(
        &'a self,
        key: &StoreKey,
        byte_ranges: ByteRangeIterator<'a>,
    ) -> Result<MaybeBytesIterator<'a>, StorageError> {
        let Some(size) = self.size_key(key)? else {
            return Ok(None);
        };
        let url = self.key_to_url(key);
        let out = byte_ranges
            .map(|byte_range| self.get_range(&url, byte_range, size))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Box::new(out.into_iter().map(Ok::<_, StorageError>))))
    }

    fn get_partial(&self, key: &StoreKey, byte_range: ByteRange) -> Result<MaybeBytes, StorageError> {
        let Some(size) = self.size_key(key)? else {
            return Ok(None);
        };
        let url = self.key_to_url(key);
        self.get_range(&url, byte_range, size).map(Some)
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        if let Some(size) = self.sizes.lock().get(key.as_str()) {
            return Ok(Some(*size));
        }
        let url = self.key_to_url(key);
        log::debug!("HEAD {url}");
        let response = self.client.head(url.clone()).send().map_err(request_error)?;
        match response.status() {
            StatusCode::OK => {
                let size = content_length(&response).ok_or_else(|| {
                    StorageError::Other(format!("content length response for {url} is invalid"))
                })?;
                self.sizes.lock().insert(key.as_str().to_string(), size);
                Ok(Some(size))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(unexpected_status(&url, status)),
        }
    }

    fn supports_get_partial(&self) -> bool {
        true
    }
}

/// A HTTP store creation error.
#[derive(Debug, Error)]
pub enum HttpStoreCreateError {
    /// The URL is not valid.
    #[error("base URL {0} is not valid")]
    InvalidBaseUrl(String),
    /// The URL does not name a resource.
    #[error("URL {0} does not name a resource")]
    NoResource(String),
    /// The HTTP client could not be built.
    #[error(transparent)]
    Client(#[from] reqwest::Error),
}

//! Locating the archive to open.
//!
//! The viewer is driven by a page query string such as
//! `?url=https://example.com/data.ozx`; the value of the `url` parameter is
//! the [`SourceLocator`].

use std::{fmt, path::PathBuf};

use url::{Url, form_urlencoded};

use crate::{Error, Result};

/// Query parameter holding the archive locator.
pub const LOCATOR_PARAM: &str = "url";

/// Where an archive lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// A remote archive read with HTTP range requests.
    Http(Url),
    /// A local archive.
    File(PathBuf),
}

impl SourceLocator {
    /// Read the locator from the `url` parameter of a query.
    ///
    /// `query` may be a bare query (`url=...`, optionally with a leading `?`)
    /// or a full page URL carrying the query.
    ///
    /// # Errors
    /// Returns [`Error::MissingLocator`] if the parameter is absent,
    /// or [`Error::InvalidLocator`] if its value cannot be interpreted.
    pub fn from_query(query: &str) -> Result<Self> {
        let value = query_param(query, LOCATOR_PARAM)
            .ok_or_else(|| Error::MissingLocator(LOCATOR_PARAM.to_string()))?;
        Self::parse(&value)
    }

    /// Interpret a locator string.
    ///
    /// `http` and `https` URLs are remote, `file` URLs and anything without a
    /// scheme are local paths.
    ///
    /// # Errors
    /// Returns [`Error::InvalidLocator`] for empty values, malformed URLs and unsupported schemes.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::invalid_locator("empty locator"));
        }
        match Url::parse(value) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Self::Http(url)),
                "file" => url
                    .to_file_path()
                    .map(Self::File)
                    .map_err(|()| Error::invalid_locator(format!("{value} is not a file path"))),
                // windows drive letter
                scheme if scheme.len() == 1 => Ok(Self::File(PathBuf::from(value))),
                scheme => Err(Error::invalid_locator(format!(
                    "unsupported scheme `{scheme}` in {value}"
                ))),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Self::File(PathBuf::from(value))),
            Err(e) => Err(Error::invalid_locator(format!("{value}: {e}"))),
        }
    }

    /// The final path component, if any.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::Http(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty()),
            Self::File(path) => path.file_name().and_then(|name| name.to_str()),
        }
    }

    /// Everything before the final path component.
    pub fn parent(&self) -> String {
        match self {
            Self::Http(url) => {
                let path = url.path();
                let parent = path.rsplit_once('/').map_or("", |(parent, _)| parent);
                format!("{}{parent}", url.origin().ascii_serialization())
            }
            Self::File(path) => path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(url) => write!(f, "{url}"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

fn query_param(input: &str, key: &str) -> Option<String> {
    let input = input.trim();
    let query = match Url::parse(input) {
        Ok(page) => page.query().unwrap_or_default().to_string(),
        Err(_) => input.strip_prefix('?').unwrap_or(input).to_string(),
    };
    form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_query() {
        let locator = SourceLocator::from_query("url=https://example.com/data.zarr.zip").unwrap();
        assert_eq!(
            locator,
            SourceLocator::Http(Url::parse("https://example.com/data.zarr.zip").unwrap())
        );
    }

    #[test]
    fn page_url() {
        let locator = SourceLocator::from_query(
            "http://localhost:5173/?theme=dark&url=https%3A%2F%2Fexample.com%2Fa%2Fimage.ozx",
        )
        .unwrap();
        assert_eq!(locator.file_name(), Some("image.ozx"));
        assert_eq!(locator.parent(), "https://example.com/a");
    }

    #[test]
    fn leading_question_mark() {
        let locator = SourceLocator::from_query("?url=/tmp/x/image.ozx").unwrap();
        assert_eq!(locator, SourceLocator::File(PathBuf::from("/tmp/x/image.ozx")));
        assert_eq!(locator.parent(), "/tmp/x");
    }

    #[test]
    fn missing_parameter() {
        for query in ["", "?", "foo=bar", "http://localhost/?uri=x", "http://localhost/"] {
            let err = SourceLocator::from_query(query).unwrap_err();
            assert!(matches!(err, Error::MissingLocator(ref k) if k == "url"), "{query}");
        }
    }

    #[test]
    fn empty_value() {
        assert!(matches!(
            SourceLocator::from_query("url="),
            Err(Error::InvalidLocator(_))
        ));
    }

    #[test]
    fn unsupported_scheme() {
        assert!(matches!(
            SourceLocator::parse("ftp://example.com/data.ozx"),
            Err(Error::InvalidLocator(_))
        ));
    }

    #[test]
    fn file_url() {
        let locator = SourceLocator::parse("file:///data/image.ozx").unwrap();
        assert_eq!(locator, SourceLocator::File(PathBuf::from("/data/image.ozx")));
    }

    #[test]
    fn relative_path() {
        let locator = SourceLocator::parse("image.ozx").unwrap();
        assert_eq!(locator.file_name(), Some("image.ozx"));
        assert_eq!(locator.parent(), "");
    }
}

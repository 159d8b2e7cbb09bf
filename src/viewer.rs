//! Rendering the root group attributes of an archive into a page element.

use std::time::Duration;

use crate::{
    Error, Result,
    locator::SourceLocator,
    metadata::{Attributes, RootGroup},
    storage::{ArchiveHandle, DEFAULT_TIMEOUT, HttpStoreOptions, ZipStoreCreateError, open_archive},
};

/// Identifier of the element the viewer writes into by default.
pub const DEFAULT_ELEMENT_ID: &str = "app";

/// Serialize attributes as JSON indented with two spaces.
///
/// # Errors
/// Returns [`Error::SerdeJson`] if serialization fails.
pub fn render_attributes(attributes: &Attributes) -> Result<String> {
    Ok(serde_json::to_string_pretty(attributes)?)
}

/// Escape text for inclusion in HTML element content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Something holding elements whose inner HTML can be replaced, addressed by id.
pub trait DisplaySink {
    /// Mutable access to the inner HTML of element `id`, if it exists.
    fn element_mut(&mut self, id: &str) -> Option<&mut String>;
}

/// A minimal HTML page made of `<div>` elements addressed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlPage {
    title: String,
    elements: Vec<(String, String)>,
}

impl HtmlPage {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            elements: Vec::new(),
        }
    }

    /// A page with a single empty element `element_id`.
    #[must_use]
    pub fn viewer(element_id: &str) -> Self {
        Self::new("zarrs_ozx").with_element(element_id, "")
    }

    /// Add an element; an existing element with the same id is replaced.
    #[must_use]
    pub fn with_element(mut self, id: impl Into<String>, inner_html: impl Into<String>) -> Self {
        let id = id.into();
        let inner_html = inner_html.into();
        match self.element_mut(&id) {
            Some(existing) => *existing = inner_html,
            None => self.elements.push((id, inner_html)),
        }
        self
    }

    /// The inner HTML of element `id`.
    pub fn element(&self, id: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|(element_id, _)| element_id == id)
            .map(|(_, inner_html)| inner_html.as_str())
    }

    /// Render the whole document.
    pub fn to_html(&self) -> String {
        let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str(&format!("<title>{}</title>\n", escape_html(&self.title)));
        html.push_str("</head>\n<body>\n");
        for (id, inner_html) in &self.elements {
            html.push_str(&format!(
                "<div id=\"{}\">{inner_html}</div>\n",
                escape_html(id).replace('"', "&quot;")
            ));
        }
        html.push_str("</body>\n</html>\n");
        html
    }
}

impl DisplaySink for HtmlPage {
    fn element_mut(&mut self, id: &str) -> Option<&mut String> {
        self.elements
            .iter_mut()
            .find(|(element_id, _)| element_id == id)
            .map(|(_, inner_html)| inner_html)
    }
}

/// Options for [`MetadataViewer`].
#[derive(Debug, Clone)]
pub struct ViewerOptions {
    element_id: String,
    timeout: Option<Duration>,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            element_id: DEFAULT_ELEMENT_ID.to_string(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl ViewerOptions {
    /// Set the id of the element receiving the rendered attributes.
    pub fn element_id(&mut self, element_id: impl Into<String>) -> &mut Self {
        self.element_id = element_id.into();
        self
    }

    /// Set the timeout of each HTTP request. [`None`] waits indefinitely.
    pub fn timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn get_element_id(&self) -> &str {
        &self.element_id
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn http_options(&self) -> HttpStoreOptions {
        let mut options = HttpStoreOptions::default();
        options.timeout(self.timeout);
        options
    }
}

/// Opens the archive a locator points to.
pub trait ArchiveOpener {
    /// Open a read-only handle on the archive at `locator`.
    ///
    /// # Errors
    /// Returns a [`ZipStoreCreateError`] if the archive cannot be reached or is not a zip archive.
    fn open(&self, locator: &SourceLocator) -> Result<ArchiveHandle, ZipStoreCreateError>;
}

/// Opens HTTP(S) locators with range requests and local paths from the filesystem.
#[derive(Debug, Clone, Default)]
pub struct DefaultArchiveOpener {
    http_options: HttpStoreOptions,
}

impl DefaultArchiveOpener {
    pub fn new(http_options: HttpStoreOptions) -> Self {
        Self { http_options }
    }
}

impl ArchiveOpener for DefaultArchiveOpener {
    fn open(&self, locator: &SourceLocator) -> Result<ArchiveHandle, ZipStoreCreateError> {
        open_archive(locator, &self.http_options)
    }
}

/// Renders the root group attributes of an archive into a [`DisplaySink`].
///
/// Each render opens its own archive handle, resolves the root group once and
/// writes the result once. Nothing is written unless every step succeeds.
#[derive(Debug, Clone)]
pub struct MetadataViewer<O = DefaultArchiveOpener> {
    options: ViewerOptions,
    opener: O,
}

impl MetadataViewer {
    #[must_use]
    pub fn new(options: ViewerOptions) -> Self {
        let opener = DefaultArchiveOpener::new(options.http_options());
        Self { options, opener }
    }
}

impl Default for MetadataViewer {
    fn default() -> Self {
        Self::new(ViewerOptions::default())
    }
}

impl<O: ArchiveOpener> MetadataViewer<O> {
    /// Create a viewer opening archives with `opener`.
    pub fn with_opener(options: ViewerOptions, opener: O) -> Self {
        Self { options, opener }
    }

    pub fn options(&self) -> &ViewerOptions {
        &self.options
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Render the archive named by the `url` parameter of `query` into `sink`.
    ///
    /// Returns the rendered (unescaped) attribute text.
    ///
    /// # Errors
    /// Returns an [`Error`] if the locator is missing or invalid, the archive cannot be opened,
    /// the root group cannot be resolved, or the display element does not exist.
    /// `sink` is left untouched on error.
    pub fn render(&self, query: &str, sink: &mut impl DisplaySink) -> Result<String> {
        let locator = SourceLocator::from_query(query)?;
        self.render_locator(&locator, sink)
    }

    /// Render the archive at `locator` into `sink`.
    ///
    /// # Errors
    /// See [`MetadataViewer::render`].
    pub fn render_locator(
        &self,
        locator: &SourceLocator,
        sink: &mut impl DisplaySink,
    ) -> Result<String> {
        let archive = self.opener.open(locator)?;
        let root = RootGroup::open(&*archive)?;
        log::info!(
            "resolved root group of {locator} with {} attributes",
            root.attributes().len()
        );
        let text = render_attributes(root.attributes())?;

        let element_id = self.options.get_element_id();
        let element = sink
            .element_mut(element_id)
            .ok_or_else(|| Error::MissingElement(element_id.to_string()))?;
        *element = format!("<pre><code>{}</code></pre>", escape_html(&text));
        Ok(text)
    }
}

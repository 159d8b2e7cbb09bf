//! Validation of an archive as a zipped OME-Zarr hierarchy (`.ozx`).
//!
//! Checks follow the requirements and recommendations of
//! <https://ngff.openmicroscopy.org/rfc/9/index.html>.

use std::{collections::BTreeSet, fmt};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use zarrs::storage::{ListableStorageTraits, ReadableStorageTraits, StorePrefix};
use zip::CompressionMethod;

use crate::{
    locator::SourceLocator,
    metadata::{NodeKind, NodeMetadata, ZARR_JSON},
    storage::{ZipEntry, ZipStore},
};

/// Name of the codec that should be used by arrays in an archive.
pub const SHARDING_CODEC: &str = "sharding_indexed";
/// Preferred file extension of zipped OME-Zarr hierarchies.
pub const OZX_EXTENSION: &str = "ozx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    SingleHierarchy,
    NotEmbedded,
    NotSplit,
    Zip64,
    Stored,
    Sharding,
    MetadataFirst,
    Comment,
    Extension,
}

impl Check {
    pub const ALL: [Self; 9] = [
        Self::SingleHierarchy,
        Self::NotEmbedded,
        Self::NotSplit,
        Self::Zip64,
        Self::Stored,
        Self::Sharding,
        Self::MetadataFirst,
        Self::Comment,
        Self::Extension,
    ];

    pub fn level(self) -> Level {
        match self {
            Self::SingleHierarchy | Self::NotEmbedded | Self::NotSplit => Level::Requirement,
            _ => Level::Recommendation,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SingleHierarchy => "single_hierarchy",
            Self::NotEmbedded => "not_embedded",
            Self::NotSplit => "not_split",
            Self::Zip64 => "zip64",
            Self::Stored => "stored",
            Self::Sharding => "sharding",
            Self::MetadataFirst => "metadata_first",
            Self::Comment => "comment",
            Self::Extension => "extension",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// MUST / SHALL NOT.
    Requirement,
    /// SHOULD.
    Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    /// The check could not be evaluated, e.g. because the root metadata is unreadable.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub check: Check,
    pub level: Level,
    pub outcome: Outcome,
    pub message: String,
}

impl Finding {
    fn new(check: Check, outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            check,
            level: check.level(),
            outcome,
            message: message.into(),
        }
    }

    fn pass(check: Check, message: impl Into<String>) -> Self {
        Self::new(check, Outcome::Pass, message)
    }

    fn fail(check: Check, message: impl Into<String>) -> Self {
        Self::new(check, Outcome::Fail, message)
    }

    fn skipped(check: Check, message: impl Into<String>) -> Self {
        Self::new(check, Outcome::Skipped, message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub archive: String,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    /// True if no requirement failed. Recommendations do not affect validity.
    pub fn is_valid(&self) -> bool {
        !self
            .findings
            .iter()
            .any(|f| f.level == Level::Requirement && f.outcome == Outcome::Fail)
    }

    pub fn finding(&self, check: Check) -> Option<&Finding> {
        self.findings.iter().find(|f| f.check == check)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.outcome == Outcome::Fail)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.archive)?;
        for finding in &self.findings {
            let outcome = match finding.outcome {
                Outcome::Pass => "pass",
                Outcome::Fail => "FAIL",
                Outcome::Skipped => "skip",
            };
            let level = match finding.level {
                Level::Requirement => "MUST",
                Level::Recommendation => "SHOULD",
            };
            writeln!(
                f,
                "  [{outcome}] {level:<6} {:<16} {}",
                finding.check, finding.message
            )?;
        }
        let verdict = if self.is_valid() { "valid" } else { "invalid" };
        write!(f, "{verdict}")
    }
}

/// Validate the archive at `locator`, already opened as `store`.
pub fn validate<TStorage>(locator: &SourceLocator, store: &ZipStore<TStorage>) -> ValidationReport
where
    TStorage: ?Sized + ReadableStorageTraits,
{
    let root = NodeMetadata::open(store, &StorePrefix::root());
    if let Err(err) = &root {
        log::warn!("could not read root metadata of {locator}: {err}");
    }
    let root = root.ok();

    let findings = Check::ALL
        .into_iter()
        .map(|check| {
            let finding = match check {
                Check::SingleHierarchy => check_single_hierarchy(store, root.as_ref()),
                Check::NotEmbedded => check_not_embedded(locator),
                Check::NotSplit => check_not_split(locator),
                Check::Zip64 => check_zip64(store.is_zip64()),
                Check::Stored => check_stored(store.entries()),
                Check::Sharding => check_sharding(store, root.as_ref()),
                Check::MetadataFirst => check_metadata_first(store.entries()),
                Check::Comment => check_comment(store.comment()),
                Check::Extension => check_extension(locator),
            };
            log::debug!("{check}: {:?} {}", finding.outcome, finding.message);
            finding
        })
        .collect();

    ValidationReport {
        archive: locator.to_string(),
        findings,
    }
}

/// Names of the child nodes of the root, i.e. root-level directories with a node metadata document.
fn root_children<TStorage>(store: &ZipStore<TStorage>) -> Vec<(String, Option<NodeMetadata>)>
where
    TStorage: ?Sized + ReadableStorageTraits,
{
    let prefixes = match store.list_dir(&StorePrefix::root()) {
        Ok(list) => list.prefixes().clone(),
        Err(err) => {
            log::warn!("could not list archive root: {err}");
            Vec::new()
        }
    };
    prefixes
        .iter()
        .map(|prefix| {
            let name = prefix.as_str().trim_end_matches('/').to_string();
            (name, NodeMetadata::open(store, prefix).ok())
        })
        .collect()
}

fn check_single_hierarchy<TStorage>(
    store: &ZipStore<TStorage>,
    root: Option<&NodeMetadata>,
) -> Finding
where
    TStorage: ?Sized + ReadableStorageTraits,
{
    let check = Check::SingleHierarchy;
    let Some(root) = root else {
        return Finding::fail(check, format!("no readable root-level {ZARR_JSON}"));
    };
    if root.kind != NodeKind::Group {
        return Finding::fail(check, format!("the root node is an {}, not a group", root.kind));
    }
    if !root.attributes.contains_key("ome") {
        return Finding::fail(check, "the root group has no `ome` attribute");
    }

    let mut expected: BTreeSet<String> = root_children(store)
        .into_iter()
        .filter(|(_, node)| node.is_some())
        .map(|(name, _)| name)
        .collect();
    expected.insert(ZARR_JSON.to_string());
    let found: BTreeSet<String> = store
        .entries()
        .iter()
        .map(|entry| {
            let name = entry.name.trim_end_matches('/');
            name.split_once('/').map_or(name, |(first, _)| first).to_string()
        })
        .collect();

    if expected == found {
        Finding::pass(check, "the archive root is the root of one OME-Zarr hierarchy")
    } else {
        let extra = found.difference(&expected).join(", ");
        let missing = expected.difference(&found).join(", ");
        let mut message = String::from("root-level entries do not match the hierarchy");
        if !extra.is_empty() {
            message.push_str(&format!("; not part of the hierarchy: {extra}"));
        }
        if !missing.is_empty() {
            message.push_str(&format!("; missing: {missing}"));
        }
        Finding::fail(check, message)
    }
}

fn check_not_embedded(locator: &SourceLocator) -> Finding {
    let check = Check::NotEmbedded;
    let parent = locator.parent();
    if parent.to_lowercase().contains(".zar") {
        Finding::fail(check, format!("the archive is inside a zarr hierarchy: {parent}"))
    } else {
        Finding::pass(check, "the archive is not inside a zarr hierarchy")
    }
}

fn extension(locator: &SourceLocator) -> Option<&str> {
    let name = locator.file_name()?;
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

fn check_not_split(locator: &SourceLocator) -> Finding {
    let check = Check::NotSplit;
    match extension(locator) {
        Some(ext) if ext.bytes().all(|b| b.is_ascii_digit()) => Finding::fail(
            check,
            format!("`.{ext}` is the extension of one part of a multi-part archive"),
        ),
        _ => Finding::pass(check, "the archive is a single part"),
    }
}

fn check_zip64(zip64: bool) -> Finding {
    let check = Check::Zip64;
    if zip64 {
        Finding::pass(check, "the ZIP64 format extension is used")
    } else {
        Finding::fail(check, "the ZIP64 format extension is not used")
    }
}

fn check_stored(entries: &[ZipEntry]) -> Finding {
    let check = Check::Stored;
    let compressed: Vec<&str> = entries
        .iter()
        .filter(|entry| !entry.is_dir && entry.compression != CompressionMethod::Stored)
        .map(|entry| entry.name.as_str())
        .collect();
    match compressed.as_slice() {
        [] => Finding::pass(check, "zip-level compression is disabled"),
        [first, ..] => Finding::fail(
            check,
            format!(
                "{} entries use zip-level compression, starting with {first}",
                compressed.len()
            ),
        ),
    }
}

fn check_sharding<TStorage>(store: &ZipStore<TStorage>, root: Option<&NodeMetadata>) -> Finding
where
    TStorage: ?Sized + ReadableStorageTraits,
{
    let check = Check::Sharding;
    if root.is_none() {
        return Finding::skipped(check, "the root metadata is unreadable");
    }
    let arrays: Vec<(String, NodeMetadata)> = root_children(store)
        .into_iter()
        .filter_map(|(name, node)| Some((name, node?)))
        .filter(|(_, node)| node.kind == NodeKind::Array)
        .collect();
    if arrays.is_empty() {
        return Finding::skipped(check, "there are no arrays at the root level");
    }
    let unsharded: Vec<&str> = arrays
        .iter()
        .filter(|(_, node)| !node.codecs.iter().any(|codec| codec == SHARDING_CODEC))
        .map(|(name, _)| name.as_str())
        .collect();
    if unsharded.is_empty() {
        Finding::pass(check, "arrays use the sharding codec")
    } else {
        Finding::fail(
            check,
            format!("arrays without the sharding codec: {}", unsharded.iter().join(", ")),
        )
    }
}

fn check_metadata_first(entries: &[ZipEntry]) -> Finding {
    let check = Check::MetadataFirst;
    let files: Vec<&ZipEntry> = entries.iter().filter(|entry| !entry.is_dir).collect();
    match files.first() {
        Some(first) if first.name == ZARR_JSON => {}
        Some(first) => {
            return Finding::fail(
                check,
                format!("the first entry is {}, not {ZARR_JSON}", first.name),
            );
        }
        None => return Finding::fail(check, "the archive is empty"),
    }

    let mut seen_other: Option<&str> = None;
    let mut depth = 0;
    for entry in files {
        if entry.base_name() != ZARR_JSON {
            seen_other.get_or_insert(&entry.name);
            continue;
        }
        if let Some(other) = seen_other {
            return Finding::fail(check, format!("{} follows {other}", entry.name));
        }
        if entry.depth() < depth {
            return Finding::fail(
                check,
                format!("{} is not in breadth-first order", entry.name),
            );
        }
        depth = entry.depth();
    }
    Finding::pass(check, format!("{ZARR_JSON} entries come first, in breadth-first order"))
}

#[derive(Deserialize)]
struct ArchiveComment {
    ome: OmeComment,
}

#[derive(Deserialize)]
struct OmeComment {
    version: serde_json::Value,
}

fn check_comment(comment: &[u8]) -> Finding {
    let check = Check::Comment;
    let comment = match std::str::from_utf8(comment) {
        Ok(comment) => comment.trim_end_matches('\0'),
        Err(_) => return Finding::fail(check, "the archive comment is not UTF-8"),
    };
    if comment.is_empty() {
        return Finding::fail(check, "the archive has no comment");
    }
    // single-quoted pseudo-JSON is seen in the wild
    let parsed: ArchiveComment = match serde_json::from_str(&comment.replace('\'', "\"")) {
        Ok(parsed) => parsed,
        Err(err) => {
            return Finding::fail(
                check,
                format!("the archive comment is not {{\"ome\": {{\"version\": ...}}}}: {err}"),
            );
        }
    };
    match parsed.ome.version.as_str() {
        Some(version) if is_version(version) => {
            Finding::pass(check, format!("the archive comment declares OME-Zarr {version}"))
        }
        _ => Finding::fail(
            check,
            format!(
                "expected a \"major.minor\" version string in the archive comment, found {}",
                parsed.ome.version
            ),
        ),
    }
}

fn is_version(version: &str) -> bool {
    version.split_once('.').is_some_and(|(major, minor)| {
        [major, minor]
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
    })
}

fn check_extension(locator: &SourceLocator) -> Finding {
    let check = Check::Extension;
    match extension(locator) {
        Some(OZX_EXTENSION) => Finding::pass(check, "the file name ends with .ozx"),
        Some(ext) => Finding::fail(check, format!("the file name ends with .{ext}, not .ozx")),
        None => Finding::fail(check, "the file name has no extension"),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn entry(name: &str, compression: CompressionMethod) -> ZipEntry {
        ZipEntry {
            name: name.to_string(),
            compression,
            compressed_size: 0,
            size: 0,
            is_dir: name.ends_with('/'),
        }
    }

    fn stored(names: &[&str]) -> Vec<ZipEntry> {
        names
            .iter()
            .map(|name| entry(name, CompressionMethod::Stored))
            .collect()
    }

    fn file(path: &str) -> SourceLocator {
        SourceLocator::File(PathBuf::from(path))
    }

    #[test]
    fn comment() {
        let pass = |c: &[u8]| check_comment(c).outcome == Outcome::Pass;
        assert!(pass(br#"{"ome": {"version": "0.5"}}"#));
        assert!(pass(b"{\"ome\": {\"version\": \"0.5\"}}\0"));
        assert!(pass(br#"{'ome': {'version': '10.12'}}"#));
        assert!(!pass(b""));
        assert!(!pass(br#"{"ome": {"version": 0.5}}"#));
        assert!(!pass(br#"{"ome": {"version": "0.5.1"}}"#));
        assert!(!pass(br#"{"ome": {}}"#));
        assert!(!pass(b"zipped with love"));
        assert!(!pass(&[0xff, 0xfe]));
    }

    #[test]
    fn metadata_first() {
        let outcome = |names: &[&str]| check_metadata_first(&stored(names)).outcome;
        assert_eq!(
            outcome(&["zarr.json", "0/zarr.json", "1/zarr.json", "0/1/zarr.json", "0/c/0"]),
            Outcome::Pass
        );
        assert_eq!(
            outcome(&["zarr.json", "0/", "0/zarr.json", "0/c/0"]),
            Outcome::Pass
        );
        assert_eq!(outcome(&["0/zarr.json", "zarr.json"]), Outcome::Fail);
        assert_eq!(
            outcome(&["zarr.json", "0/c/0", "1/zarr.json"]),
            Outcome::Fail
        );
        assert_eq!(
            outcome(&["zarr.json", "0/1/zarr.json", "0/zarr.json"]),
            Outcome::Fail
        );
        assert_eq!(outcome(&[]), Outcome::Fail);
    }

    #[test]
    fn stored_entries() {
        let mut entries = stored(&["zarr.json", "0/"]);
        assert_eq!(check_stored(&entries).outcome, Outcome::Pass);
        entries.push(entry("0/c/0", CompressionMethod::Deflated));
        let finding = check_stored(&entries);
        assert_eq!(finding.outcome, Outcome::Fail);
        assert!(finding.message.contains("0/c/0"));
    }

    #[test]
    fn locator_checks() {
        let locator = file("/data/image.ozx");
        assert_eq!(check_extension(&locator).outcome, Outcome::Pass);
        assert_eq!(check_not_split(&locator).outcome, Outcome::Pass);
        assert_eq!(check_not_embedded(&locator).outcome, Outcome::Pass);

        assert_eq!(check_extension(&file("/data/image.zip")).outcome, Outcome::Fail);
        assert_eq!(check_extension(&file("/data/image")).outcome, Outcome::Fail);
        assert_eq!(check_not_split(&file("/data/image.z01")).outcome, Outcome::Pass);
        assert_eq!(check_not_split(&file("/data/image.001")).outcome, Outcome::Fail);
        assert_eq!(
            check_not_embedded(&file("/data/plate.ZARR/image.ozx")).outcome,
            Outcome::Fail
        );
    }

    #[test]
    fn version() {
        assert!(is_version("0.5"));
        assert!(is_version("12.34"));
        assert!(!is_version("0"));
        assert!(!is_version(".5"));
        assert!(!is_version("a.b"));
    }

    #[test]
    fn report_validity() {
        let report = ValidationReport {
            archive: "image.ozx".to_string(),
            findings: vec![
                Finding::pass(Check::SingleHierarchy, ""),
                Finding::fail(Check::Zip64, ""),
            ],
        };
        assert!(report.is_valid());
        assert_eq!(report.failures().count(), 1);

        let report = ValidationReport {
            findings: vec![Finding::fail(Check::NotSplit, "")],
            ..report
        };
        assert!(!report.is_valid());
        assert!(report.to_string().ends_with("invalid"));
    }

    #[test]
    fn serialize() {
        let finding = Finding::skipped(Check::MetadataFirst, "x");
        assert_eq!(
            serde_json::to_value(&finding).unwrap(),
            serde_json::json!({
                "check": "metadata_first",
                "level": "recommendation",
                "outcome": "skipped",
                "message": "x",
            })
        );
    }
}

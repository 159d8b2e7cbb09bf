use std::fmt;

use serde::{Deserialize, Serialize};
use zarrs::{
    metadata::v3::NodeMetadataV3,
    storage::{ReadableStorageTraits, StorageError, StoreKey, StoreKeyError, StorePrefix},
};

/// Zarr V3 node metadata document.
pub const ZARR_JSON: &str = "zarr.json";
const ZGROUP: &str = ".zgroup";
const ZARRAY: &str = ".zarray";
const ZATTRS: &str = ".zattrs";

/// JSON attributes of a node.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Group,
    Array,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => f.write_str("group"),
            Self::Array => f.write_str("array"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZarrFormat {
    V2,
    V3,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("no zarr metadata found at `{0}`")]
    MissingMetadata(String),
    #[error("expected a group at `{path}`, found an {found}")]
    NodeKindMismatch { path: String, found: NodeKind },
    #[error("invalid metadata in {key}: {source}")]
    Invalid {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported zarr_format {zarr_format} in {key}")]
    UnsupportedFormat { key: String, zarr_format: u64 },
    #[error(transparent)]
    InvalidKey(#[from] StoreKeyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Zarr V2 `.zgroup` document.
#[derive(Debug, Deserialize)]
struct ZGroup {
    zarr_format: u64,
}

/// The parts of a Zarr V2 `.zarray` document naming its codecs.
#[derive(Debug, Deserialize)]
struct ZArray {
    #[serde(default)]
    compressor: Option<CodecId>,
    #[serde(default)]
    filters: Option<Vec<CodecId>>,
}

#[derive(Debug, Deserialize)]
struct CodecId {
    id: String,
}

/// Metadata of a single node, of either kind and either format.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMetadata {
    pub format: ZarrFormat,
    pub kind: NodeKind,
    /// Names of the codecs of an array, outermost first. Empty for groups.
    pub codecs: Vec<String>,
    pub attributes: Attributes,
}

fn node_key(prefix: &StorePrefix, name: &str) -> Result<StoreKey, StoreKeyError> {
    StoreKey::new(format!("{}{name}", prefix.as_str()))
}

fn read_json<T, TStorage>(storage: &TStorage, key: &StoreKey) -> Result<Option<T>, MetadataError>
where
    T: serde::de::DeserializeOwned,
    TStorage: ?Sized + ReadableStorageTraits,
{
    let Some(bytes) = storage.get(key)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| MetadataError::Invalid {
            key: key.as_str().to_string(),
            source,
        })
}

impl NodeMetadata {
    /// Read the metadata of the node at `prefix`.
    ///
    /// `zarr.json` is preferred; otherwise the Zarr V2 documents are read.
    ///
    /// # Errors
    /// Returns [`MetadataError::MissingMetadata`] if the prefix holds no node,
    /// or another [`MetadataError`] if the metadata cannot be read or parsed.
    pub fn open<TStorage: ?Sized + ReadableStorageTraits>(
        storage: &TStorage,
        prefix: &StorePrefix,
    ) -> Result<Self, MetadataError> {
        if let Some(node) = Self::open_v3(storage, prefix)? {
            return Ok(node);
        }
        if let Some(node) = Self::open_v2(storage, prefix)? {
            return Ok(node);
        }
        Err(MetadataError::MissingMetadata(node_path(prefix)))
    }

    fn open_v3<TStorage: ?Sized + ReadableStorageTraits>(
        storage: &TStorage,
        prefix: &StorePrefix,
    ) -> Result<Option<Self>, MetadataError> {
        let key = node_key(prefix, ZARR_JSON)?;
        let Some(metadata) = read_json::<NodeMetadataV3, _>(storage, &key)? else {
            return Ok(None);
        };
        log::debug!("read zarr v3 metadata from {}", key.as_str());
        let node = match metadata {
            NodeMetadataV3::Group(group) => Self {
                format: ZarrFormat::V3,
                kind: NodeKind::Group,
                codecs: Vec::new(),
                attributes: group.attributes,
            },
            NodeMetadataV3::Array(array) => Self {
                format: ZarrFormat::V3,
                kind: NodeKind::Array,
                codecs: array
                    .codecs
                    .iter()
                    .map(|codec| codec.name().to_string())
                    .collect(),
                attributes: array.attributes,
            },
        };
        Ok(Some(node))
    }

    fn open_v2<TStorage: ?Sized + ReadableStorageTraits>(
        storage: &TStorage,
        prefix: &StorePrefix,
    ) -> Result<Option<Self>, MetadataError> {
        let attributes_key = node_key(prefix, ZATTRS)?;
        let group_key = node_key(prefix, ZGROUP)?;
        if let Some(group) = read_json::<ZGroup, _>(storage, &group_key)? {
            if group.zarr_format != 2 {
                return Err(MetadataError::UnsupportedFormat {
                    key: group_key.as_str().to_string(),
                    zarr_format: group.zarr_format,
                });
            }
            log::debug!("read zarr v2 metadata from {}", group_key.as_str());
            return Ok(Some(Self {
                format: ZarrFormat::V2,
                kind: NodeKind::Group,
                codecs: Vec::new(),
                attributes: read_json(storage, &attributes_key)?.unwrap_or_default(),
            }));
        }

        let array_key = node_key(prefix, ZARRAY)?;
        if let Some(array) = read_json::<ZArray, _>(storage, &array_key)? {
            log::debug!("read zarr v2 metadata from {}", array_key.as_str());
            let codecs = array
                .filters
                .into_iter()
                .flatten()
                .chain(array.compressor)
                .map(|codec| codec.id)
                .collect();
            return Ok(Some(Self {
                format: ZarrFormat::V2,
                kind: NodeKind::Array,
                codecs,
                attributes: read_json(storage, &attributes_key)?.unwrap_or_default(),
            }));
        }
        Ok(None)
    }
}

fn node_path(prefix: &StorePrefix) -> String {
    format!("/{}", prefix.as_str().trim_end_matches('/'))
}

/// The root group of a hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct RootGroup {
    format: ZarrFormat,
    attributes: Attributes,
}

impl RootGroup {
    /// Resolve the root group of the hierarchy in `storage`.
    ///
    /// # Errors
    /// Returns [`MetadataError::NodeKindMismatch`] if the root is an array,
    /// or another [`MetadataError`] if there is no valid root metadata.
    pub fn open<TStorage: ?Sized + ReadableStorageTraits>(
        storage: &TStorage,
    ) -> Result<Self, MetadataError> {
        let root = StorePrefix::root();
        let node = NodeMetadata::open(storage, &root)?;
        match node.kind {
            NodeKind::Group => Ok(Self {
                format: node.format,
                attributes: node.attributes,
            }),
            NodeKind::Array => Err(MetadataError::NodeKindMismatch {
                path: node_path(&root),
                found: NodeKind::Array,
            }),
        }
    }

    pub fn format(&self) -> ZarrFormat {
        self.format
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

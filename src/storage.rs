use std::{
    collections::BTreeSet,
    io::Read,
    path::Path,
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use zarrs::{
    filesystem::FilesystemStore,
    storage::{
        ListableStorageTraits, MaybeBytes, MaybeBytesIterator, ReadableStorage,
        ReadableStorageTraits, StorageError, StoreKey, StoreKeys, StoreKeysPrefixes, StorePrefix,
        byte_range::{ByteRange, ByteRangeIterator, InvalidByteRangeError},
    },
};
use zip::{CompressionMethod, ZipArchive, result::ZipError};

use crate::locator::SourceLocator;

mod http;
mod io;

pub use http::{DEFAULT_TIMEOUT, HttpStore, HttpStoreCreateError, HttpStoreOptions};
pub use io::StorageValueReader;

/// A read-only handle on an opened archive, whatever store it was read from.
pub type ArchiveHandle = Arc<ZipStore<dyn ReadableStorageTraits>>;

/// Signature of the ZIP64 end of central directory locator.
const ZIP64_EOCD_LOCATOR_SIGNATURE: [u8; 4] = *b"PK\x06\x07";
/// Signature of the end of central directory record.
const EOCD_SIGNATURE: [u8; 4] = *b"PK\x05\x06";
const EOCD_SIZE: usize = 22;
const ZIP64_EOCD_LOCATOR_SIZE: usize = 20;
/// Bytes at the end of an archive which can hold the EOCD record, its comment and a ZIP64 locator.
const TAIL_SIZE: u64 = (ZIP64_EOCD_LOCATOR_SIZE + EOCD_SIZE + u16::MAX as usize) as u64;

/// An entry of the zip central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    /// Full name within the archive; directories end with `/`.
    pub name: String,
    pub compression: CompressionMethod,
    pub compressed_size: u64,
    pub size: u64,
    pub is_dir: bool,
}

impl ZipEntry {
    /// The final component of the entry name.
    pub fn base_name(&self) -> &str {
        let name = self.name.trim_end_matches('/');
        name.rsplit_once('/').map_or(name, |(_, base)| base)
    }

    /// Number of `/`-separated components above the entry.
    pub fn depth(&self) -> usize {
        self.name.trim_end_matches('/').matches('/').count()
    }
}

/// A read-only store over the entries of a zip archive.
///
/// The archive is itself a value in another readable store,
/// which only has to support byte range reads.
/// The central directory is read once on creation;
/// entry values are read (and decompressed) on request.
pub struct ZipStore<TStorage: ?Sized> {
    size: u64,
    zip64: bool,
    comment: Vec<u8>,
    entries: Vec<ZipEntry>,
    zip_archive: Mutex<ZipArchive<StorageValueReader<TStorage>>>,
    zip_path: String,
}

impl<TStorage: ?Sized + ReadableStorageTraits> ZipStore<TStorage> {
    /// Open the zip archive at `key` in `storage`.
    ///
    /// # Errors
    /// Returns a [`ZipStoreCreateError`] if the value does not exist or is not a valid zip archive.
    pub fn new(storage: Arc<TStorage>, key: StoreKey) -> Result<Self, ZipStoreCreateError> {
        Self::new_with_path(storage, key, "")
    }

    /// Open the zip archive at `key` in `storage`, exposing only the entries under `path`.
    ///
    /// # Errors
    /// Returns a [`ZipStoreCreateError`] if the value does not exist or is not a valid zip archive.
    pub fn new_with_path(
        storage: Arc<TStorage>,
        key: StoreKey,
        path: impl Into<String>,
    ) -> Result<Self, ZipStoreCreateError> {
        let mut zip_path: String = path.into();
        if !zip_path.is_empty() && !zip_path.ends_with('/') {
            zip_path.push('/');
        }
        let size = storage
            .size_key(&key)?
            .ok_or_else(|| ZipStoreCreateError::NotFound(key.as_str().to_string()))?;
        log::debug!("opening zip archive {} ({size} bytes)", key.as_str());

        let zip64 = if size == 0 {
            false
        } else {
            let tail = storage
                .get_partial(&key, ByteRange::Suffix(size.min(TAIL_SIZE)))?
                .ok_or_else(|| ZipStoreCreateError::NotFound(key.as_str().to_string()))?;
            has_zip64_locator(&tail)
        };

        let reader = StorageValueReader::new(storage, key, size);
        let mut zip_archive = ZipArchive::new(reader)?;
        let comment = zip_archive.comment().to_vec();
        let mut entries = Vec::with_capacity(zip_archive.len());
        for index in 0..zip_archive.len() {
            let file = zip_archive.by_index_raw(index)?;
            entries.push(ZipEntry {
                name: file.name().to_string(),
                compression: file.compression(),
                compressed_size: file.compressed_size(),
                size: file.size(),
                is_dir: file.is_dir(),
            });
        }
        log::debug!("zip archive has {} entries, zip64: {zip64}", entries.len());

        Ok(Self {
            size,
            zip64,
            comment,
            entries,
            zip_archive: Mutex::new(zip_archive),
            zip_path,
        })
    }
}

impl<TStorage: ?Sized> ZipStore<TStorage> {
    /// The size of the archive in bytes.
    pub fn archive_size(&self) -> u64 {
        self.size
    }

    /// Whether the archive has a ZIP64 end of central directory locator.
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    /// The raw archive comment.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// All entries, in central directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    fn strip_zip_path<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.zip_path.as_str())
            .filter(|name| !name.is_empty())
    }

    fn entry(&self, key: &StoreKey) -> Option<&ZipEntry> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_dir)
            .find(|entry| self.strip_zip_path(&entry.name) == Some(key.as_str()))
    }

    fn file_keys(&self) -> impl Iterator<Item = (StoreKey, u64)> + '_ {
        self.entries
            .iter()
            .filter(|entry| !entry.is_dir)
            .filter_map(|entry| {
                let name = self.strip_zip_path(&entry.name)?;
                let key = StoreKey::new(name).ok()?;
                Some((key, entry.size))
            })
    }
}

impl<TStorage: ?Sized + ReadableStorageTraits> ZipStore<TStorage> {
    fn read_entry(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        let Some(entry) = self.entry(key) else {
            return Ok(None);
        };
        let mut zip_archive = self.zip_archive.lock();
        let mut file = match zip_archive.by_name(&entry.name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(StorageError::Other(err.to_string())),
        };
        let mut buffer = Vec::with_capacity(usize::try_from(entry.size).unwrap_or_default());
        file.read_to_end(&mut buffer)
            .map_err(|err| StorageError::Other(err.to_string()))?;
        Ok(Some(Bytes::from(buffer)))
    }
}

impl<TStorage: ?Sized + ReadableStorageTraits> ReadableStorageTraits for ZipStore<TStorage> {
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        self.read_entry(key)
    }

    fn get_partial_many<'a>(
        &'a self,
        key: &StoreKey,
        byte_ranges: ByteRangeIterator<'a>,
    ) -> Result<MaybeBytesIterator<'a>, StorageError> {
        let Some(bytes) = self.read_entry(key)? else {
            return Ok(None);
        };
        let out = Box::new(byte_ranges.map(move |byte_range| extract(&bytes, byte_range)));
        Ok(Some(out))
    }

    fn get_partial(&self, key: &StoreKey, byte_range: ByteRange) -> Result<MaybeBytes, StorageError> {
        let Some(bytes) = self.read_entry(key)? else {
            return Ok(None);
        };
        extract(&bytes, byte_range).map(Some)
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        Ok(self.entry(key).map(|entry| entry.size))
    }

    /// Entries are decompressed in full to serve a partial read.
    fn supports_get_partial(&self) -> bool {
        false
    }
}

impl<TStorage: ?Sized + ReadableStorageTraits> ListableStorageTraits for ZipStore<TStorage> {
    fn list(&self) -> Result<StoreKeys, StorageError> {
        let keys: BTreeSet<StoreKey> = self.file_keys().map(|(key, _)| key).collect();
        Ok(keys.into_iter().collect())
    }

    fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        let keys: BTreeSet<StoreKey> = self
            .file_keys()
            .map(|(key, _)| key)
            .filter(|key| key.has_prefix(prefix))
            .collect();
        Ok(keys.into_iter().collect())
    }

    fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        let mut keys: BTreeSet<StoreKey> = BTreeSet::new();
        let mut prefixes: BTreeSet<StorePrefix> = BTreeSet::new();
        for (key, _) in self.file_keys() {
            let Some(rest) = key.as_str().strip_prefix(prefix.as_str()) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    prefixes.insert(StorePrefix::new(format!("{}{child}/", prefix.as_str()))?);
                }
                None => {
                    keys.insert(key);
                }
            }
        }
        Ok(StoreKeysPrefixes::new(
            keys.into_iter().collect(),
            prefixes.into_iter().collect(),
        ))
    }

    fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError> {
        Ok(self
            .file_keys()
            .filter(|(key, _)| key.has_prefix(prefix))
            .map(|(_, size)| size)
            .sum())
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.file_keys().map(|(_, size)| size).sum())
    }
}

fn extract(bytes: &Bytes, byte_range: ByteRange) -> Result<Bytes, StorageError> {
    let len = bytes.len() as u64;
    let valid = match byte_range {
        ByteRange::FromStart(offset, length) => offset
            .checked_add(length.unwrap_or(0))
            .is_some_and(|end| end <= len),
        ByteRange::Suffix(length) => length <= len,
    };
    if !valid {
        return Err(InvalidByteRangeError::new(byte_range, len).into());
    }
    let start = usize::try_from(byte_range.start(len))
        .map_err(|_| StorageError::Other("byte range exceeds usize::MAX".into()))?;
    let end = usize::try_from(byte_range.end(len))
        .map_err(|_| StorageError::Other("byte range exceeds usize::MAX".into()))?;
    Ok(bytes.slice(start..end))
}

/// Whether the tail of an archive holds a ZIP64 end of central directory locator.
///
/// The locator immediately precedes the end of central directory record,
/// which is found by scanning backwards for a signature whose comment length reaches the end of `tail`.
pub fn has_zip64_locator(tail: &[u8]) -> bool {
    if tail.len() < EOCD_SIZE {
        return false;
    }
    let eocd = (0..=tail.len() - EOCD_SIZE).rev().find(|&pos| {
        tail[pos..pos + 4] == EOCD_SIGNATURE && {
            let comment_len = usize::from(u16::from_le_bytes([tail[pos + 20], tail[pos + 21]]));
            pos + EOCD_SIZE + comment_len == tail.len()
        }
    });
    match eocd {
        Some(pos) if pos >= ZIP64_EOCD_LOCATOR_SIZE => {
            let locator = pos - ZIP64_EOCD_LOCATOR_SIZE;
            tail[locator..locator + 4] == ZIP64_EOCD_LOCATOR_SIGNATURE
        }
        _ => false,
    }
}

/// Open the archive at `locator`.
///
/// HTTP(S) locators are read with range requests; local paths through the filesystem.
///
/// # Errors
/// Returns a [`ZipStoreCreateError`] if the archive cannot be reached or is not a valid zip archive.
pub fn open_archive(
    locator: &SourceLocator,
    options: &HttpStoreOptions,
) -> Result<ArchiveHandle, ZipStoreCreateError> {
    log::info!("opening {locator}");
    let (storage, key): (ReadableStorage, StoreKey) = match locator {
        SourceLocator::Http(url) => {
            let (store, key) = HttpStore::for_resource(url, options)?;
            (Arc::new(store), key)
        }
        SourceLocator::File(path) => {
            let (dir, name) = split_path(path)
                .ok_or_else(|| ZipStoreCreateError::NotFound(path.display().to_string()))?;
            let store = FilesystemStore::new(dir)
                .map_err(|err| ZipStoreCreateError::Storage(StorageError::Other(err.to_string())))?;
            let key = StoreKey::new(name)
                .map_err(|_| ZipStoreCreateError::NotFound(path.display().to_string()))?;
            (Arc::new(store), key)
        }
    };
    Ok(Arc::new(ZipStore::new(storage, key)?))
}

fn split_path(path: &Path) -> Option<(&Path, &str)> {
    let name = path.file_name()?.to_str()?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Some((dir, name))
}

/// A zip store creation error.
#[derive(Debug, Error)]
pub enum ZipStoreCreateError {
    /// The archive does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// An error reading the archive.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The archive is not a valid zip archive.
    #[error(transparent)]
    Zip(#[from] ZipError),
    /// The HTTP store could not be created.
    #[error(transparent)]
    Http(#[from] HttpStoreCreateError),
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use zarrs::storage::{WritableStorageTraits, store::MemoryStore};
    use zip::{ZipWriter, write::SimpleFileOptions};

    use super::*;

    fn archive(entries: &[(&str, &[u8])], comment: &str) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, value) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(value).unwrap();
            }
        }
        writer.set_comment(comment);
        writer.finish().unwrap().into_inner()
    }

    fn zip_store(bytes: Vec<u8>) -> ZipStore<MemoryStore> {
        let key = StoreKey::new("test.zip").unwrap();
        let store = MemoryStore::new();
        store.set(&key, bytes.into()).unwrap();
        ZipStore::new(Arc::new(store), key).unwrap()
    }

    fn key(s: &str) -> StoreKey {
        StoreKey::new(s).unwrap()
    }

    fn prefix(s: &str) -> StorePrefix {
        StorePrefix::new(s).unwrap()
    }

    #[test]
    fn zip_root() -> Result<(), Box<dyn std::error::Error>> {
        let store = zip_store(archive(
            &[
                ("c", b""),
                ("a/", b""),
                ("a/b", &[0, 1, 2, 3]),
                ("a/c", b""),
                ("a/d/e", b""),
                ("a/f/g", b""),
                ("a/f/h", b""),
                ("b/c/d", b""),
            ],
            "",
        ));

        assert_eq!(
            store.list()?,
            &[
                key("a/b"),
                key("a/c"),
                key("a/d/e"),
                key("a/f/g"),
                key("a/f/h"),
                key("b/c/d"),
                key("c"),
            ]
        );
        assert_eq!(
            store.list_prefix(&prefix("a/"))?,
            &[key("a/b"), key("a/c"), key("a/d/e"), key("a/f/g"), key("a/f/h")]
        );
        assert_eq!(store.list_prefix(&prefix("a/d/"))?, &[key("a/d/e")]);

        let list = store.list_dir(&prefix("a/"))?;
        assert_eq!(list.keys(), &[key("a/b"), key("a/c")]);
        assert_eq!(list.prefixes(), &[prefix("a/d/"), prefix("a/f/")]);

        let list = store.list_dir(&StorePrefix::root())?;
        assert_eq!(list.keys(), &[key("c")]);
        assert_eq!(list.prefixes(), &[prefix("a/"), prefix("b/")]);

        assert_eq!(store.get(&key("a/b"))?.unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(store.get(&key("a/c"))?.unwrap(), Vec::<u8>::new());
        assert!(store.get(&key("a/x"))?.is_none());
        assert_eq!(store.size_key(&key("a/b"))?, Some(4));
        assert_eq!(store.size_prefix(&prefix("a/"))?, 4);
        assert_eq!(
            store.get_partial(&key("a/b"), ByteRange::Suffix(2))?.unwrap(),
            vec![2, 3]
        );
        assert!(
            store
                .get_partial(&key("a/b"), ByteRange::FromStart(2, Some(5)))
                .is_err()
        );

        assert_eq!(store.entries()[0].name, "c");
        assert!(store.entries()[1].is_dir);
        assert!(!store.is_zip64());
        Ok(())
    }

    #[test]
    fn byte_range_out_of_bounds() {
        let bytes = Bytes::from_static(b"abcd");
        assert_eq!(
            extract(&bytes, ByteRange::FromStart(1, Some(2))).unwrap(),
            Bytes::from_static(b"bc")
        );
        assert_eq!(extract(&bytes, ByteRange::FromStart(4, None)).unwrap(), Bytes::new());
        assert!(matches!(
            extract(&bytes, ByteRange::FromStart(u64::MAX, Some(2))),
            Err(StorageError::InvalidByteRangeError(_))
        ));
        assert!(extract(&bytes, ByteRange::FromStart(5, None)).is_err());
        assert!(extract(&bytes, ByteRange::Suffix(5)).is_err());

        let store = zip_store(archive(&[("a", b"abcd")], ""));
        assert!(
            store
                .get_partial(&key("a"), ByteRange::FromStart(u64::MAX, Some(1)))
                .is_err()
        );
    }

    #[test]
    fn zip_path() -> Result<(), Box<dyn std::error::Error>> {
        let key_zip = StoreKey::new("test.zip")?;
        let memory = MemoryStore::new();
        memory.set(
            &key_zip,
            archive(&[("a/b", &[0, 1, 2, 3]), ("a/d/e", b""), ("c", b"")], "").into(),
        )?;
        let store = ZipStore::new_with_path(Arc::new(memory), key_zip, "a")?;

        assert_eq!(store.list()?, &[key("b"), key("d/e")]);
        assert_eq!(store.get(&key("b"))?.unwrap(), vec![0, 1, 2, 3]);
        assert!(store.get(&key("c"))?.is_none());
        Ok(())
    }

    #[test]
    fn comment() {
        let store = zip_store(archive(&[("zarr.json", b"{}")], "{\"ome\": {\"version\": \"0.5\"}}"));
        assert_eq!(store.comment(), b"{\"ome\": {\"version\": \"0.5\"}}");
    }

    #[test]
    fn not_a_zip() {
        let key = StoreKey::new("test.zip").unwrap();
        let store = MemoryStore::new();
        store
            .set(&key, Bytes::from_static(b"this is plain text, not a zip archive"))
            .unwrap();
        assert!(matches!(
            ZipStore::new(Arc::new(store), key),
            Err(ZipStoreCreateError::Zip(_))
        ));
    }

    #[test]
    fn missing_archive() {
        let store = MemoryStore::new();
        assert!(matches!(
            ZipStore::new(Arc::new(store), StoreKey::new("test.zip").unwrap()),
            Err(ZipStoreCreateError::NotFound(_))
        ));
    }

    fn eocd(comment: &[u8]) -> Vec<u8> {
        let mut record = EOCD_SIGNATURE.to_vec();
        record.extend_from_slice(&[0; 16]);
        record.extend_from_slice(&u16::try_from(comment.len()).unwrap().to_le_bytes());
        record.extend_from_slice(comment);
        record
    }

    #[test]
    fn zip64_locator() {
        let mut tail = vec![0; 8];
        tail.extend_from_slice(&ZIP64_EOCD_LOCATOR_SIGNATURE);
        tail.extend_from_slice(&[0; 16]);
        tail.extend(eocd(b"comment"));
        assert!(has_zip64_locator(&tail));
    }

    #[test]
    fn zip64_locator_absent() {
        let mut tail = vec![0; 20];
        tail.extend(eocd(b""));
        assert!(!has_zip64_locator(&tail));
        assert!(!has_zip64_locator(&eocd(b"")));
        assert!(!has_zip64_locator(b"PK\x06\x07"));
    }

    #[test]
    fn zip64_locator_signature_in_comment() {
        // a locator signature inside the comment is not a locator
        let mut tail = vec![0; 20];
        tail.extend(eocd(b"PK\x06\x07 and more text to pad it out"));
        assert!(!has_zip64_locator(&tail));
    }

    #[test]
    fn split_relative_path() {
        let (dir, name) = split_path(Path::new("image.ozx")).unwrap();
        assert_eq!(dir, Path::new("."));
        assert_eq!(name, "image.ozx");
        assert!(split_path(Path::new("/")).is_none());
    }
}

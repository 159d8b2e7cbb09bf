#![allow(dead_code)]

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use url::form_urlencoded;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

pub fn init_logger() {
    env_logger::try_init().ok();
}

/// Write a zip archive at `dir/name` holding `entries` in order.
///
/// Names ending in `/` become directory entries.
pub fn write_archive(
    dir: &Path,
    name: &str,
    entries: &[(&str, &[u8])],
    method: CompressionMethod,
    comment: &str,
) -> PathBuf {
    init_logger();
    let path = dir.join(name);
    let mut writer = ZipWriter::new(File::create(&path).expect("create archive"));
    let options = SimpleFileOptions::default().compression_method(method);
    for (name, value) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).expect("add directory");
        } else {
            writer.start_file(*name, options).expect("start file");
            writer.write_all(value).expect("write entry");
        }
    }
    writer.set_comment(comment);
    writer.finish().expect("finish archive");
    path
}

/// Root group metadata with the given attributes.
pub fn group_json(attributes: &str) -> Vec<u8> {
    format!(r#"{{"zarr_format": 3, "node_type": "group", "attributes": {attributes}}}"#).into_bytes()
}

/// Metadata of a small uint8 array encoded with `codecs`.
pub fn array_json(codecs: &str) -> Vec<u8> {
    format!(
        r#"{{
            "zarr_format": 3,
            "node_type": "array",
            "shape": [4, 4],
            "data_type": "uint8",
            "chunk_grid": {{"name": "regular", "configuration": {{"chunk_shape": [4, 4]}}}},
            "chunk_key_encoding": {{"name": "default", "configuration": {{"separator": "/"}}}},
            "fill_value": 0,
            "codecs": {codecs}
        }}"#
    )
    .into_bytes()
}

pub const SHARDED_CODECS: &str = r#"[{
    "name": "sharding_indexed",
    "configuration": {
        "chunk_shape": [2, 2],
        "codecs": [{"name": "bytes"}],
        "index_codecs": [{"name": "bytes", "configuration": {"endian": "little"}}, {"name": "crc32c"}]
    }
}]"#;

pub const OME_ATTRIBUTES: &str = r#"{"ome": {"version": "0.5", "multiscales": [{"datasets": [{"path": "0"}]}]}}"#;

pub const OME_COMMENT: &str = r#"{"ome": {"version": "0.5"}}"#;

/// A page query carrying `path` as the `url` parameter.
pub fn query_for(path: &Path) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair("url", &path.to_string_lossy())
        .finish()
}

/// A conforming ozx archive at `dir/name`.
pub fn write_ozx(dir: &Path, name: &str) -> PathBuf {
    write_archive(
        dir,
        name,
        &[
            ("zarr.json", &group_json(OME_ATTRIBUTES)),
            ("0/zarr.json", &array_json(SHARDED_CODECS)),
            ("0/c/0/0", &[0; 16 + 4 * 16 + 4]),
        ],
        CompressionMethod::Stored,
        OME_COMMENT,
    )
}

//! Whole-database snapshot encoding and file I/O.
//!
//! The snapshot is one codec-encoded record and nothing else:
//!
//! ```text
//! (id: u32, name: bytes, root_page: u32, next_page_id: u32,
//!  pages: seq<(page_id: u32, parent_id: u32, is_leaf: bool, key_count: u32,
//!              prev: u32, next: u32, keys: seq<bytes>, values: seq<bytes>)>)
//! ```
//!
//! All scalars little-endian, all sequences 8-byte length prefixed, exactly
//! as the typed codec writes them. Internal pages serialize one empty value
//! slot per key so the parallel arrays stay aligned. Pages are emitted in
//! ascending id order so identical trees produce identical files.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{bail, ensure, Result};

use super::database::Tree;
use crate::codec::{decode, encode, Field, Shape, Value};
use crate::error::EngineError;

/// Where commits persist the database, and whether they fsync.
#[derive(Debug, Clone)]
pub(crate) struct DiskTarget {
    pub path: PathBuf,
    pub sync_on_commit: bool,
}

#[derive(Debug)]
pub(crate) struct SnapshotPage {
    pub page_id: u32,
    pub parent_id: u32,
    pub is_leaf: bool,
    pub key_count: u32,
    pub prev: u32,
    pub next: u32,
    pub keys: Vec<Vec<u8>>,
    pub values: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub(crate) struct SnapshotDatabase {
    pub id: u32,
    pub name: Vec<u8>,
    pub root_page: u32,
    pub next_page_id: u32,
    pub pages: Vec<SnapshotPage>,
}

fn page_shape() -> Shape {
    Shape::record(vec![
        Field::new("page_id", Shape::u32()),
        Field::new("parent_id", Shape::u32()),
        Field::new("is_leaf", Shape::Bool),
        Field::new("key_count", Shape::u32()),
        Field::new("prev", Shape::u32()),
        Field::new("next", Shape::u32()),
        Field::new("keys", Shape::seq(Shape::bytes())),
        Field::new("values", Shape::seq(Shape::bytes())),
    ])
}

pub(crate) fn snapshot_shape() -> Shape {
    Shape::record(vec![
        Field::new("id", Shape::u32()),
        Field::new("name", Shape::bytes()),
        Field::new("root_page", Shape::u32()),
        Field::new("next_page_id", Shape::u32()),
        Field::new("pages", Shape::seq(page_shape())),
    ])
}

pub(crate) fn encode_snapshot(id: u32, name: &str, tree: &Tree) -> Result<Vec<u8>> {
    let mut page_ids: Vec<u32> = tree.pages.keys().copied().collect();
    page_ids.sort_unstable();

    let mut pages = Vec::with_capacity(page_ids.len());
    for page_id in page_ids {
        let page = tree.page(page_id)?;
        let keys = page
            .keys
            .iter()
            .map(|key| Value::Bytes(key.clone()))
            .collect();
        let values = page
            .values
            .iter()
            .map(|value| Value::Bytes(value.clone()))
            .collect();
        pages.push(Value::Record(vec![
            Value::U32(page.id()),
            Value::U32(page.parent()),
            Value::Bool(page.is_leaf()),
            Value::U32(page.key_count() as u32),
            Value::U32(page.prev()),
            Value::U32(page.next()),
            Value::Seq(keys),
            Value::Seq(values),
        ]));
    }

    let record = Value::Record(vec![
        Value::U32(id),
        Value::Bytes(name.as_bytes().to_vec()),
        Value::U32(tree.root),
        Value::U32(tree.next_page_id),
        Value::Seq(pages),
    ]);
    encode(&snapshot_shape(), &record)
}

pub(crate) fn decode_snapshot(bytes: &[u8]) -> Result<SnapshotDatabase> {
    let value = decode(&snapshot_shape(), bytes)?;
    let [id, name, root_page, next_page_id, pages] = take_record(value)?;
    let pages = take_seq(pages)?
        .into_iter()
        .map(decode_page)
        .collect::<Result<Vec<_>>>()?;
    Ok(SnapshotDatabase {
        id: take_u32(id)?,
        name: take_bytes(name)?,
        root_page: take_u32(root_page)?,
        next_page_id: take_u32(next_page_id)?,
        pages,
    })
}

fn decode_page(value: Value) -> Result<SnapshotPage> {
    let [page_id, parent_id, is_leaf, key_count, prev, next, keys, values] = take_record(value)?;
    let page = SnapshotPage {
        page_id: take_u32(page_id)?,
        parent_id: take_u32(parent_id)?,
        is_leaf: take_bool(is_leaf)?,
        key_count: take_u32(key_count)?,
        prev: take_u32(prev)?,
        next: take_u32(next)?,
        keys: take_byte_seq(keys)?,
        values: take_byte_seq(values)?,
    };
    ensure!(
        page.keys.len() == page.key_count as usize,
        "snapshot page {} declares {} keys but carries {}",
        page.page_id,
        page.key_count,
        page.keys.len()
    );
    ensure!(
        page.values.len() == page.keys.len(),
        "snapshot page {} has mismatched key/value arrays",
        page.page_id
    );
    Ok(page)
}

fn take_record<const N: usize>(value: Value) -> Result<[Value; N]> {
    let Value::Record(fields) = value else {
        bail!("snapshot field is not a record");
    };
    match <[Value; N]>::try_from(fields) {
        Ok(array) => Ok(array),
        Err(fields) => bail!("snapshot record has {} fields, expected {N}", fields.len()),
    }
}

fn take_seq(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Seq(items) => Ok(items),
        other => bail!("snapshot field is {}, expected seq", other.kind()),
    }
}

fn take_u32(value: Value) -> Result<u32> {
    match value {
        Value::U32(v) => Ok(v),
        other => bail!("snapshot field is {}, expected u32", other.kind()),
    }
}

fn take_bool(value: Value) -> Result<bool> {
    match value {
        Value::Bool(v) => Ok(v),
        other => bail!("snapshot field is {}, expected bool", other.kind()),
    }
}

fn take_bytes(value: Value) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        other => bail!("snapshot field is {}, expected bytes", other.kind()),
    }
}

fn take_byte_seq(value: Value) -> Result<Vec<Vec<u8>>> {
    take_seq(value)?.into_iter().map(take_bytes).collect()
}

/// Writes the encoded snapshot, fsyncing when asked. Failures surface as
/// `DiskWriteError`.
pub(crate) fn write_file(path: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    let mut file = File::create(path).map_err(EngineError::DiskWriteError)?;
    file.write_all(bytes).map_err(EngineError::DiskWriteError)?;
    if sync {
        file.sync_all().map_err(EngineError::DiskWriteError)?;
    }
    Ok(())
}

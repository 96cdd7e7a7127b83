//! Shareable text form of routes and records.
//!
//! `prefix ++ base64(zip(deflate(msgpack(value))))`. The prefix names the
//! payload kind and format version.

use crate::error::{RaceError, Result};
use crate::record::Record;
use crate::route::{Route, RouteDocument};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const ROUTE_PREFIX: &str = "RTE1:";
pub const RECORD_PREFIX: &str = "REC1:";

const ENTRY_NAME: &str = "payload.msgpack";

/// Encode a route's definition (triggers, flags, retention; no records).
pub fn export_route(route: &Route) -> Result<String> {
    pack(ROUTE_PREFIX, &route.to_document())
}

pub fn import_route(text: &str) -> Result<RouteDocument> {
    unpack(ROUTE_PREFIX, text)
}

pub fn export_record(record: &Record) -> Result<String> {
    pack(RECORD_PREFIX, record)
}

pub fn import_record(text: &str) -> Result<Record> {
    unpack(RECORD_PREFIX, text)
}

/// Check that an imported record belongs on `route`.
///
/// Rejects a record captured against different trigger geometry and a
/// record the route already holds.
pub fn verify_record(route: &Route, record: &Record) -> Result<()> {
    if record.geometry_hash != route.geometry_hash() {
        return Err(RaceError::HashMismatch {
            record: record.geometry_hash.clone(),
            route: route.geometry_hash().to_string(),
        });
    }
    if route.has_record(record.id) {
        return Err(RaceError::DuplicateRecord(record.id));
    }
    Ok(())
}

fn pack<T: Serialize>(prefix: &str, value: &T) -> Result<String> {
    let bytes = rmp_serde::to_vec_named(value).map_err(|e| RaceError::Export(e.to_string()))?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(ENTRY_NAME, options)
        .map_err(|e| RaceError::Export(format!("zip entry: {}", e)))?;
    zip.write_all(&bytes)
        .map_err(|e| RaceError::Export(format!("zip write: {}", e)))?;
    let archive = zip
        .finish()
        .map_err(|e| RaceError::Export(format!("zip finish: {}", e)))?
        .into_inner();

    Ok(format!("{}{}", prefix, STANDARD.encode(archive)))
}

fn unpack<T: DeserializeOwned>(prefix: &str, text: &str) -> Result<T> {
    let body = text
        .trim()
        .strip_prefix(prefix)
        .ok_or_else(|| RaceError::Import(format!("expected a {} payload", prefix)))?;

    let archive = STANDARD
        .decode(body)
        .map_err(|e| RaceError::Import(format!("base64: {}", e)))?;

    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| RaceError::Import(format!("zip: {}", e)))?;
    let mut entry = zip
        .by_index(0)
        .map_err(|e| RaceError::Import(format!("zip entry: {}", e)))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| RaceError::Import(format!("inflate: {}", e)))?;

    rmp_serde::from_slice(&bytes).map_err(|e| RaceError::Import(format!("decode: {}", e)))
}

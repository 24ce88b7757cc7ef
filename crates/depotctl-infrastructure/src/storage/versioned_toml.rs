//! Versioned TOML documents read and written through a migrator.

use super::AtomicTomlFile;
use crate::dto::check_schema_version;
use depotctl_core::{DepotError, Result};
use semver::Version;
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use version_migrate::Migrator;

const VERSION_KEY: &str = "version";

/// Which migrator handles a document, and the version it writes.
#[derive(Clone, Copy)]
pub struct Schema {
    pub entity: &'static str,
    pub version: &'static str,
    pub migrator: fn() -> Result<Migrator>,
}

/// An atomic TOML file whose contents are a domain value `D`.
///
/// A document from a newer minor release of a known major version is read
/// as the current layout; a newer major is `CorruptStore`.
pub struct VersionedTomlFile<D> {
    file: AtomicTomlFile<toml::Value>,
    schema: Schema,
    _domain: PhantomData<fn() -> D>,
}

impl<D> VersionedTomlFile<D>
where
    D: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf, schema: Schema) -> Self {
        Self {
            file: AtomicTomlFile::new(path),
            schema,
            _domain: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn quarantine(&self) -> Result<Option<PathBuf>> {
        self.file.quarantine()
    }

    /// `Ok(None)` when the file doesn't exist or is empty.
    pub fn load(&self) -> Result<Option<D>> {
        match self.file.load()? {
            Some(raw) => self.decode(raw).map(Some),
            None => Ok(None),
        }
    }

    /// Read-modify-write under the file lock. Nothing is written when `f`
    /// returns an error.
    pub fn update<F, R>(&self, default_value: D, f: F) -> Result<R>
    where
        F: FnOnce(&mut D) -> Result<R>,
    {
        self.file
            .update(toml::Value::Table(toml::map::Map::new()), |raw| {
                let mut data = match &*raw {
                    toml::Value::Table(table) if table.is_empty() => default_value,
                    _ => self.decode(raw.clone())?,
                };
                let out = f(&mut data)?;
                *raw = self.encode(&data)?;
                Ok(out)
            })
    }

    fn decode(&self, raw: toml::Value) -> Result<D> {
        let raw = self.normalize(raw)?;
        let migrator = (self.schema.migrator)()?;
        migrator
            .load_flat_from(self.schema.entity, raw)
            .map_err(|e| {
                DepotError::corrupt_store(
                    self.path(),
                    format!("cannot read {} document: {}", self.schema.entity, e),
                )
            })
    }

    fn encode(&self, data: &D) -> Result<toml::Value> {
        let migrator = (self.schema.migrator)()?;
        let json = migrator
            .save_domain_flat(self.schema.entity, data)
            .map_err(|e| {
                DepotError::internal(format!(
                    "cannot serialize {} document: {}",
                    self.schema.entity, e
                ))
            })?;
        let value: serde_json::Value = serde_json::from_str(&json)
            .map_err(|e| DepotError::internal(format!("migrator produced invalid JSON: {}", e)))?;
        json_to_toml(&value)
            .ok_or_else(|| DepotError::internal("migrator produced an empty document"))
    }

    /// Fills in a missing version and maps newer minor releases onto the
    /// version this build reads.
    fn normalize(&self, raw: toml::Value) -> Result<toml::Value> {
        let toml::Value::Table(mut table) = raw else {
            return Err(DepotError::corrupt_store(self.path(), "not a TOML table"));
        };
        let current = self.schema.version;
        let found = match table.get(VERSION_KEY) {
            None => current.to_string(),
            Some(toml::Value::String(v)) => v.clone(),
            Some(other) => {
                return Err(DepotError::corrupt_store(
                    self.path(),
                    format!("schema version must be a string, found {}", other),
                ));
            }
        };
        check_schema_version(self.path(), &found, current)?;

        let newer = match (Version::parse(&found), Version::parse(current)) {
            (Ok(found_v), Ok(current_v)) => found_v > current_v,
            _ => false,
        };
        if newer {
            tracing::debug!(
                "[Storage] Reading {} schema {} as {}",
                self.schema.entity,
                found,
                current
            );
        }
        if newer || !table.contains_key(VERSION_KEY) {
            table.insert(
                VERSION_KEY.to_string(),
                toml::Value::String(current.to_string()),
            );
        }
        Ok(toml::Value::Table(table))
    }
}

/// Converts migrator output to TOML. TOML has no null, so null members are
/// dropped.
fn json_to_toml(json: &serde_json::Value) -> Option<toml::Value> {
    match json {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(toml::Value::Boolean(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(toml::Value::Integer)
            .or_else(|| n.as_f64().map(toml::Value::Float)),
        serde_json::Value::String(s) => Some(toml::Value::String(s.clone())),
        serde_json::Value::Array(items) => Some(toml::Value::Array(
            items.iter().filter_map(json_to_toml).collect(),
        )),
        serde_json::Value::Object(members) => {
            let mut table = toml::map::Map::new();
            for (key, value) in members {
                if let Some(value) = json_to_toml(value) {
                    table.insert(key.clone(), value);
                }
            }
            Some(toml::Value::Table(table))
        }
    }
}

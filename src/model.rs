//! Persistence of computed cluster sets.
//!
//! A model file is the 4-byte magic `KMCS` followed by a bincode-encoded
//! [`ModelFile`]. The file records the source table and its column names so a
//! model can be checked against the dataset it is reloaded with.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::process;

use bincode::config::{Configuration, LittleEndian, Limit, Varint};
use bincode::{Decode, Encode};

use crate::cluster::{Cluster, ClusterSet};
use crate::dataset::{Dataset, Value};
use crate::error::{KMeansError, Result};
use crate::item::Item;
use crate::tuple::Tuple;

pub const MAGIC: &[u8; 4] = b"KMCS";
pub const VERSION: u32 = 1;

/// Upper bound on the decoded size of a model body.
pub const MAX_MODEL_BYTES: usize = 256 << 20;

const CONFIG: Configuration<LittleEndian, Varint, Limit<MAX_MODEL_BYTES>> =
    bincode::config::standard().with_limit::<MAX_MODEL_BYTES>();

/// Suffix counter for in-progress model writes.
static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct StoredCluster {
    pub centroid: Vec<Value>,
    pub members: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ModelFile {
    pub version: u32,
    pub database: Option<String>,
    pub table: String,
    pub k: u32,
    pub columns: Vec<String>,
    pub clusters: Vec<StoredCluster>,
}

/// `<table>_<k>.dat`, or `<database>-<table>-<k>.dat` when a database is named.
pub fn model_file_name(database: Option<&str>, table: &str, k: usize) -> String {
    match database {
        Some(database) if !database.is_empty() => format!("{}-{}-{}.dat", database, table, k),
        _ => format!("{}_{}.dat", table, k),
    }
}

fn format_error(path: &Path, reason: impl ToString) -> KMeansError {
    KMeansError::ModelFormat {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl ModelFile {
    /// Snapshot `clusters`, computed on `dataset`.
    pub fn new(database: Option<&str>, dataset: &Dataset, clusters: &ClusterSet) -> Self {
        Self {
            version: VERSION,
            database: database.map(str::to_string),
            table: dataset.table().to_string(),
            k: clusters.len() as u32,
            columns: dataset
                .attributes()
                .iter()
                .map(|attribute| attribute.name().to_string())
                .collect(),
            clusters: clusters
                .iter()
                .map(|cluster| StoredCluster {
                    centroid: cluster.centroid().values(),
                    members: cluster.members().iter().map(|&row| row as u32).collect(),
                })
                .collect(),
        }
    }

    /// Write the model to `path`, creating its parent directory if needed.
    ///
    /// The body goes to a sibling temporary file that is renamed over `path`
    /// once complete, so readers see either the old model or the new one.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let staging = staging_path(path);
        let written = self.write_body(&staging, path).and_then(|()| {
            fs::rename(&staging, path)?;
            Ok(())
        });
        if written.is_err() {
            let _ = fs::remove_file(&staging);
        }
        written
    }

    fn write_body(&self, staging: &Path, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(staging)?);
        writer.write_all(MAGIC)?;
        bincode::encode_into_std_write(self, &mut writer, CONFIG)
            .map_err(|e| format_error(path, e))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Read a model from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist ([`KMeansError::ModelNotFound`])
    /// - The magic, the version or the body is invalid ([`KMeansError::ModelFormat`])
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => KMeansError::ModelNotFound {
                path: path.to_path_buf(),
            },
            _ => KMeansError::Io(e),
        })?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => format_error(path, "file is truncated"),
            _ => KMeansError::Io(e),
        })?;
        if &magic != MAGIC {
            return Err(format_error(path, "not a cluster model file"));
        }

        let model: ModelFile =
            bincode::decode_from_std_read(&mut reader, CONFIG).map_err(|e| format_error(path, e))?;
        if model.version != VERSION {
            return Err(format_error(
                path,
                format!("unsupported version {} (expected {})", model.version, VERSION),
            ));
        }
        Ok(model)
    }

    /// Rebuild the cluster set against `dataset`.
    ///
    /// Fails with [`KMeansError::ModelMismatch`] when the dataset has a
    /// different layout than the one the model was computed on, or when a
    /// stored member row does not exist in it.
    pub fn into_cluster_set(self, dataset: &Dataset) -> Result<ClusterSet> {
        let attributes = dataset.attributes();
        if self.columns.len() != attributes.len() {
            return Err(KMeansError::ModelMismatch(format!(
                "model has {} columns, table {} has {}",
                self.columns.len(),
                dataset.table(),
                attributes.len()
            )));
        }
        for (stored, attribute) in self.columns.iter().zip(attributes) {
            if stored != attribute.name() {
                return Err(KMeansError::ModelMismatch(format!(
                    "model column {} does not match table column {}",
                    stored,
                    attribute.name()
                )));
            }
        }
        if self.clusters.len() != self.k as usize {
            return Err(KMeansError::ModelMismatch(format!(
                "model declares {} clusters but stores {}",
                self.k,
                self.clusters.len()
            )));
        }

        let mut clusters = Vec::with_capacity(self.clusters.len());
        for (index, stored) in self.clusters.into_iter().enumerate() {
            if stored.centroid.len() != attributes.len() {
                return Err(KMeansError::ModelMismatch(format!(
                    "centroid {} has {} values, expected {}",
                    index,
                    stored.centroid.len(),
                    attributes.len()
                )));
            }

            let mut items = Vec::with_capacity(attributes.len());
            for (value, attribute) in stored.centroid.into_iter().zip(attributes) {
                if value.kind() != attribute.kind() {
                    return Err(KMeansError::ModelMismatch(format!(
                        "centroid {} holds a {} value for column {}",
                        index,
                        value.kind(),
                        attribute.name()
                    )));
                }
                items.push(Item::new(Arc::clone(attribute), value));
            }

            let mut members = BTreeSet::new();
            for row in stored.members {
                let row = row as usize;
                if row >= dataset.len() {
                    return Err(KMeansError::ModelMismatch(format!(
                        "cluster {} references row {} but the table has {} rows",
                        index,
                        row,
                        dataset.len()
                    )));
                }
                members.insert(row);
            }

            clusters.push(Cluster::with_members(Tuple::new(items), members));
        }

        Ok(ClusterSet::from_clusters(clusters))
    }
}

/// `.<name>.<pid>-<n>.tmp` next to `path`, unique per write.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}-{}.tmp", name, process::id(), n))
}

/// Location of a model inside `models_dir`.
pub fn model_path(models_dir: &Path, database: Option<&str>, table: &str, k: usize) -> PathBuf {
    models_dir.join(model_file_name(database, table, k))
}

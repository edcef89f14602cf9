use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::algorithm::kmeans;
use crate::cluster::ClusterSet;
use crate::config::KMeansConfig;
use crate::dataset::Dataset;
use crate::error::{KMeansError, Result};
use crate::model::ModelFile;
use crate::tuple::Tuple;

/// K-means clustering over a [`Dataset`] of mixed continuous and discrete
/// attributes.
///
/// A miner owns the cluster set of its last run (or of the model it was
/// loaded from). The dataset is borrowed by every call, never stored.
///
/// # Example
///
/// ```
/// use kmeans_server::{Dataset, KMeansConfig, KMeansMiner, Value};
///
/// let rows = [1.0, 2.0, 3.0, 40.0, 41.0, 42.0]
///     .into_iter()
///     .map(|x| vec![Value::from(x)])
///     .collect();
/// let dataset = Dataset::from_rows(vec!["x".into()], rows).unwrap();
///
/// let mut miner = KMeansMiner::with_config(KMeansConfig::new(2).with_seed(42));
/// let iterations = miner.run(&dataset).unwrap();
///
/// assert!(iterations >= 2);
/// assert_eq!(miner.cluster_set().unwrap().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct KMeansMiner {
    /// Run configuration
    config: KMeansConfig,

    /// Computed or loaded clusters (None before the first run)
    clusters: Option<ClusterSet>,

    /// Passes executed by the last run
    n_iterations: usize,

    converged: bool,
}

impl KMeansMiner {
    /// Create a miner for `k` clusters with the default configuration.
    pub fn new(k: usize) -> Self {
        Self::with_config(KMeansConfig::new(k))
    }

    /// Create a miner with a custom configuration.
    pub fn with_config(config: KMeansConfig) -> Self {
        Self {
            config,
            clusters: None,
            n_iterations: 0,
            converged: false,
        }
    }

    /// Cluster the rows of `dataset` and return the number of passes.
    ///
    /// The centroids are seeded from `config.seed`, or from the operating
    /// system when no seed is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `k` is 0 or larger than the number of rows
    /// - The dataset holds fewer than `k` value-distinct rows
    pub fn run(&mut self, dataset: &Dataset) -> Result<usize> {
        let mut rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        self.run_with_rng(dataset, &mut rng)
    }

    /// Like [`run`](Self::run), drawing the initial centroids from `rng`.
    pub fn run_with_rng<R: Rng + ?Sized>(
        &mut self,
        dataset: &Dataset,
        rng: &mut R,
    ) -> Result<usize> {
        let result = kmeans(dataset, &self.config, rng)?;

        self.clusters = Some(result.clusters);
        self.n_iterations = result.n_iterations;
        self.converged = result.converged;
        Ok(result.n_iterations)
    }

    /// Run and return `&mut Self` for method chaining.
    pub fn fit(&mut self, dataset: &Dataset) -> Result<&mut Self> {
        self.run(dataset)?;
        Ok(self)
    }

    /// Index of the cluster whose centroid is nearest to `tuple`.
    ///
    /// # Errors
    ///
    /// Returns [`KMeansError::NotFitted`] before the first run or load.
    pub fn predict(&self, tuple: &Tuple) -> Result<usize> {
        let clusters = self.clusters.as_ref().ok_or(KMeansError::NotFitted)?;
        Ok(clusters.nearest_cluster(tuple))
    }

    /// Full text report of the last run on `dataset`: the iteration count,
    /// one centroid summary per cluster, then the per-cluster details.
    pub fn report(&self, dataset: &Dataset) -> Result<String> {
        let clusters = self.clusters.as_ref().ok_or(KMeansError::NotFitted)?;
        Ok(format!(
            "\nNumber of iterations: {}\n{}\n{}",
            self.n_iterations,
            clusters,
            clusters.describe(dataset)
        ))
    }

    /// Per-cluster details only (the report of a loaded model).
    pub fn describe(&self, dataset: &Dataset) -> Result<String> {
        let clusters = self.clusters.as_ref().ok_or(KMeansError::NotFitted)?;
        Ok(clusters.describe(dataset))
    }

    /// Persist the clusters computed on `dataset` to `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Destination file; its directory is created if missing
    /// * `dataset` - The dataset the clusters were computed on
    /// * `database` - Source database name recorded in the file, if any
    pub fn save(&self, path: &Path, dataset: &Dataset, database: Option<&str>) -> Result<()> {
        let clusters = self.clusters.as_ref().ok_or(KMeansError::NotFitted)?;
        ModelFile::new(database, dataset, clusters).write(path)
    }

    /// Load a model from `path` and bind it to `dataset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist ([`KMeansError::ModelNotFound`])
    /// - The file is not a valid model ([`KMeansError::ModelFormat`])
    /// - The model does not fit `dataset` ([`KMeansError::ModelMismatch`])
    pub fn load(path: &Path, dataset: &Dataset) -> Result<Self> {
        Self::from_model(ModelFile::read(path)?, dataset)
    }

    /// Bind an already decoded model to `dataset`.
    pub fn from_model(model: ModelFile, dataset: &Dataset) -> Result<Self> {
        let clusters = model.into_cluster_set(dataset)?;
        Ok(Self {
            config: KMeansConfig::new(clusters.len()),
            clusters: Some(clusters),
            n_iterations: 0,
            converged: true,
        })
    }

    /// Get the clusters of the last run or load.
    pub fn cluster_set(&self) -> Option<&ClusterSet> {
        self.clusters.as_ref()
    }

    /// Passes executed by the last run (0 for a loaded model).
    pub fn n_iterations(&self) -> usize {
        self.n_iterations
    }

    /// Whether the last run reached a stable assignment before `max_iters`.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Get the number of clusters.
    pub fn k(&self) -> usize {
        self.config.k
    }

    /// Get the configuration.
    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }
}

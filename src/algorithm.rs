use crate::cluster::ClusterSet;
use crate::config::KMeansConfig;
use crate::dataset::Dataset;
use crate::error::{KMeansError, Result};
use rand::Rng;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of the k-means algorithm
#[derive(Debug, Clone)]
pub struct KMeansResult {
    pub clusters: ClusterSet,
    pub n_iterations: usize,
    /// False when `max_iters` passes ran without a stable assignment
    pub converged: bool,
}

/// Run batch k-means over the rows of `dataset`.
///
/// Each pass assigns every row to its nearest centroid, then recomputes all
/// centroids as the prototypes of their members. The run stops after the
/// first pass in which no row changes cluster, or after `config.max_iters`
/// passes.
pub fn kmeans<R: Rng + ?Sized>(
    dataset: &Dataset,
    config: &KMeansConfig,
    rng: &mut R,
) -> Result<KMeansResult> {
    if config.max_iters == 0 {
        return Err(KMeansError::InvalidConfig(
            "max_iters must be greater than 0".to_string(),
        ));
    }

    let mut clusters = ClusterSet::initialize(dataset, config.k, rng)?;

    debug!(
        rows = dataset.len(),
        attributes = dataset.n_attributes(),
        k = config.k,
        "training k-means"
    );

    let mut n_iterations = 0;
    let mut converged = false;

    for iteration in 0..config.max_iters {
        let iter_start = Instant::now();
        n_iterations = iteration + 1;

        let changes = assign_rows(dataset, &mut clusters);
        clusters.update_centroids(dataset);

        debug!(
            iteration = n_iterations,
            max_iters = config.max_iters,
            changes,
            elapsed_ms = iter_start.elapsed().as_secs_f64() * 1000.0,
            "k-means pass"
        );

        if changes == 0 {
            converged = true;
            break;
        }
    }

    if converged {
        info!(iterations = n_iterations, k = config.k, "k-means converged");
    } else {
        warn!(
            iterations = n_iterations,
            k = config.k,
            "k-means stopped at max_iters without converging"
        );
    }

    Ok(KMeansResult {
        clusters,
        n_iterations,
        converged,
    })
}

/// Move every row to its nearest cluster; returns the number of rows that
/// gained a new membership.
fn assign_rows(dataset: &Dataset, clusters: &mut ClusterSet) -> usize {
    let mut changes = 0;
    for row in 0..dataset.len() {
        let nearest = clusters.nearest_cluster(&dataset.item_set(row));
        let previous = clusters.current_cluster(row);

        if clusters.get_mut(nearest).add_data(row) {
            changes += 1;
            if let Some(previous) = previous {
                clusters.get_mut(previous).remove(row);
            }
        }
    }
    changes
}

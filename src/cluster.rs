use std::collections::BTreeSet;
use std::fmt;

use rand::Rng;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::tuple::Tuple;

/// A centroid and the set of dataset rows currently assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    centroid: Tuple,
    members: BTreeSet<usize>,
}

impl Cluster {
    /// An empty cluster around `centroid`.
    pub fn new(centroid: Tuple) -> Self {
        Self {
            centroid,
            members: BTreeSet::new(),
        }
    }

    pub(crate) fn with_members(centroid: Tuple, members: BTreeSet<usize>) -> Self {
        Self { centroid, members }
    }

    pub fn centroid(&self) -> &Tuple {
        &self.centroid
    }

    /// Member row indices, ascending.
    pub fn members(&self) -> &BTreeSet<usize> {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Add `row`; returns true if it was not already a member.
    pub fn add_data(&mut self, row: usize) -> bool {
        self.members.insert(row)
    }

    pub fn contains(&self, row: usize) -> bool {
        self.members.contains(&row)
    }

    pub fn remove(&mut self, row: usize) {
        self.members.remove(&row);
    }

    /// Move the centroid to the prototype of the current members.
    pub fn compute_centroid(&mut self, dataset: &Dataset) {
        self.centroid.update(dataset, &self.members);
    }

    /// Centroid, member rows with their distance to it, and the mean distance.
    pub fn describe(&self, dataset: &Dataset) -> String {
        let mut out = format!("Centroid=({})\nExamples:\n", self.centroid.summary());
        for &row in &self.members {
            let tuple = dataset.item_set(row);
            out.push_str(&format!("[{}] dist={:?}\n", tuple, self.centroid.distance(&tuple)));
        }
        out.push_str(&format!(
            "AvgDistance={:?}\n",
            self.centroid.avg_distance(dataset, &self.members)
        ));
        out
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Centroid=({})", self.centroid.summary())
    }
}

/// Exactly `k` clusters, created together at initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSet {
    clusters: Vec<Cluster>,
}

impl ClusterSet {
    /// Seed `k` empty clusters on `k` sampled, value-distinct rows.
    ///
    /// # Errors
    ///
    /// Propagates the sampling errors of [`Dataset::sample`].
    pub fn initialize<R: Rng + ?Sized>(dataset: &Dataset, k: usize, rng: &mut R) -> Result<Self> {
        let clusters = dataset
            .sample(k, rng)?
            .into_iter()
            .map(|row| Cluster::new(dataset.item_set(row)))
            .collect();
        Ok(Self { clusters })
    }

    pub(crate) fn from_clusters(clusters: Vec<Cluster>) -> Self {
        Self { clusters }
    }

    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn get(&self, index: usize) -> &Cluster {
        &self.clusters[index]
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut Cluster {
        &mut self.clusters[index]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cluster> {
        self.clusters.iter()
    }

    /// Index of the cluster whose centroid is closest to `tuple`.
    ///
    /// Only a strictly smaller distance replaces the current best, so the
    /// earliest cluster wins ties.
    pub fn nearest_cluster(&self, tuple: &Tuple) -> usize {
        let mut nearest = 0;
        let mut min_distance = f64::INFINITY;
        for (index, cluster) in self.clusters.iter().enumerate() {
            let distance = cluster.centroid().distance(tuple);
            if distance < min_distance {
                min_distance = distance;
                nearest = index;
            }
        }
        nearest
    }

    /// Index of the cluster `row` currently belongs to.
    pub fn current_cluster(&self, row: usize) -> Option<usize> {
        self.clusters.iter().position(|cluster| cluster.contains(row))
    }

    pub fn update_centroids(&mut self, dataset: &Dataset) {
        for cluster in &mut self.clusters {
            cluster.compute_centroid(dataset);
        }
    }

    /// Per-cluster blocks, `<index>:` followed by [`Cluster::describe`] and a
    /// blank line.
    pub fn describe(&self, dataset: &Dataset) -> String {
        self.clusters
            .iter()
            .enumerate()
            .map(|(index, cluster)| format!("{}:{}\n", index, cluster.describe(dataset)))
            .collect()
    }
}

impl<'a> IntoIterator for &'a ClusterSet {
    type Item = &'a Cluster;
    type IntoIter = std::slice::Iter<'a, Cluster>;

    fn into_iter(self) -> Self::IntoIter {
        self.clusters.iter()
    }
}

/// One centroid summary per line.
impl fmt::Display for ClusterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for cluster in &self.clusters {
            writeln!(f, "{}", cluster)?;
        }
        Ok(())
    }
}

//! EpisodeClusterer - topical and temporal grouping
//!
//! `TigerStyle`: Synchronous, deterministic, single pass.
//!
//! Items are visited in `(timestamp, id)` order. An item joins the cluster
//! with the highest Jaccard similarity between its terms and the cluster's
//! term union, provided the cluster's newest member is within the time
//! window and the similarity meets the threshold. Ties go to the cluster
//! whose newest member is most recent. Otherwise the item opens a new
//! cluster, so every cluster is non-empty and every item lands in exactly
//! one cluster.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::config::ClusterConfig;
use crate::constants::CLUSTER_TERM_CHARS_MIN;
use crate::storage::{Episode, Fact};

const STOPWORDS: &[&str] = &[
    "about", "after", "all", "also", "and", "any", "are", "because", "been", "but", "can", "could",
    "did", "does", "for", "from", "had", "has", "have", "her", "his", "how", "into", "its", "just",
    "more", "not", "now", "one", "our", "out", "over", "she", "should", "some", "than", "that",
    "the", "their", "them", "then", "there", "they", "this", "was", "were", "what", "when",
    "which", "who", "will", "with", "would", "you", "your",
];

/// Lowercased alphanumeric terms of at least `CLUSTER_TERM_CHARS_MIN` chars,
/// minus stopwords.
#[must_use]
pub fn normalized_terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= CLUSTER_TERM_CHARS_MIN)
        .map(str::to_lowercase)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}

/// |a ∩ b| / |a ∪ b|, 0 when both are empty.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Something the clusterer can group.
pub trait ClusterItem {
    /// Stable id, used to break timestamp ties.
    fn item_id(&self) -> &str;
    /// When the item was observed.
    fn timestamp(&self) -> DateTime<Utc>;
    /// Terms compared between items.
    fn terms(&self) -> BTreeSet<String>;
}

impl ClusterItem for Fact {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.observed_at
    }

    fn terms(&self) -> BTreeSet<String> {
        normalized_terms(&self.content)
    }
}

impl ClusterItem for Episode {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.observed_at
    }

    fn terms(&self) -> BTreeSet<String> {
        let mut terms = normalized_terms(&self.summary);
        for entity in &self.entities {
            terms.extend(normalized_terms(entity));
        }
        terms
    }
}

/// Errors from clustering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// A cluster with no members
    #[error("cluster {index} is empty")]
    EmptyCluster {
        /// Cluster position
        index: usize,
    },

    /// An item placed in two clusters
    #[error("item {item} assigned more than once")]
    DuplicateAssignment {
        /// Item position
        item: usize,
    },

    /// An item placed in no cluster, or an index past the input
    #[error("item {item} not assigned")]
    Unassigned {
        /// Item position
        item: usize,
    },
}

/// One group of items, as positions into the clustered slice, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Member positions
    pub members: Vec<usize>,
}

struct OpenCluster {
    members: Vec<usize>,
    terms: BTreeSet<String>,
    newest: DateTime<Utc>,
}

/// Groups facts or episodes by topical and temporal proximity.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeClusterer {
    config: ClusterConfig,
}

impl EpisodeClusterer {
    /// Create a clusterer.
    #[must_use]
    pub fn new(config: ClusterConfig) -> Self {
        assert!(config.members_max > 0, "members_max must be positive");
        Self { config }
    }

    /// Partition `items` into clusters.
    ///
    /// # Errors
    /// Returns `ClusterError` if the result is not a partition of `items`
    /// into non-empty clusters.
    pub fn cluster<T: ClusterItem>(&self, items: &[T]) -> Result<Vec<Cluster>, ClusterError> {
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|&a, &b| {
            (items[a].timestamp(), items[a].item_id()).cmp(&(items[b].timestamp(), items[b].item_id()))
        });

        let window = chrono::Duration::from_std(self.config.time_window)
            .unwrap_or(chrono::Duration::MAX);
        let mut open: Vec<OpenCluster> = Vec::new();

        for index in order {
            let item = &items[index];
            let terms = item.terms();
            let at = item.timestamp();

            let mut best: Option<(usize, f64)> = None;
            for (position, cluster) in open.iter().enumerate() {
                if cluster.members.len() >= self.config.members_max {
                    continue;
                }
                if at.signed_duration_since(cluster.newest) > window {
                    continue;
                }
                let similarity = jaccard(&terms, &cluster.terms);
                if similarity < self.config.similarity_threshold || similarity == 0.0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((current, best_similarity)) => {
                        similarity > best_similarity
                            || (similarity == best_similarity
                                && cluster.newest > open[current].newest)
                    }
                };
                if better {
                    best = Some((position, similarity));
                }
            }

            match best {
                Some((position, _)) => {
                    let cluster = &mut open[position];
                    cluster.members.push(index);
                    cluster.terms.extend(terms);
                    cluster.newest = cluster.newest.max(at);
                }
                None => open.push(OpenCluster {
                    members: vec![index],
                    terms,
                    newest: at,
                }),
            }
        }

        let clusters: Vec<Cluster> = open
            .into_iter()
            .map(|c| Cluster { members: c.members })
            .collect();
        validate_partition(&clusters, items.len())?;
        Ok(clusters)
    }
}

/// Check that `clusters` partition `0..item_count` into non-empty groups.
///
/// # Errors
/// Returns the first violation found.
pub fn validate_partition(clusters: &[Cluster], item_count: usize) -> Result<(), ClusterError> {
    let mut seen = vec![false; item_count];
    for (index, cluster) in clusters.iter().enumerate() {
        if cluster.members.is_empty() {
            return Err(ClusterError::EmptyCluster { index });
        }
        for &item in &cluster.members {
            match seen.get_mut(item) {
                None => return Err(ClusterError::Unassigned { item }),
                Some(true) => return Err(ClusterError::DuplicateAssignment { item }),
                Some(slot) => *slot = true,
            }
        }
    }
    match seen.iter().position(|assigned| !assigned) {
        Some(item) => Err(ClusterError::Unassigned { item }),
        None => Ok(()),
    }
}

//! Event clustering over embedding vectors
//!
//! # Algorithms
//!
//! - **k-means**: k-means++ initialisation from a seeded ChaCha RNG, then
//!   Lloyd iterations until assignments stop changing. `k` is picked by the
//!   best mean silhouette over `2..=min(max_clusters, n/2)`.
//! - **DBSCAN**: density clustering on cosine distance; points without a
//!   dense neighbourhood are noise and belong to no cluster.
//!
//! Everything here is synchronous and CPU-bound; callers run it on the
//! blocking pool.

use std::collections::{BTreeMap, VecDeque};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::domain::embedding::{cosine_similarity, euclidean_distance};
use crate::domain::event::Event;

/// Clustering algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMethod {
    #[default]
    Kmeans,
    Dbscan,
}

impl ClusterMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kmeans => "kmeans",
            Self::Dbscan => "dbscan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "kmeans" | "k-means" | "k_means" => Some(Self::Kmeans),
            "dbscan" => Some(Self::Dbscan),
            _ => None,
        }
    }
}

/// Shared traits of a cluster's members
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterAttributes {
    /// Most frequent event type
    pub dominant_type: Option<String>,
    /// event type → member count
    pub type_distribution: BTreeMap<String, usize>,
    /// Up to five most frequent entities
    pub common_entities: Vec<String>,
    pub avg_importance: f32,
    /// Sample standard deviation; 0 with fewer than two scores
    pub importance_std: f32,
}

/// A group of semantically similar events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCluster {
    pub cluster_id: usize,
    /// `cluster_{id}_{dominant type}` or `cluster_{id}_mixed`
    pub label: String,
    pub events: Vec<Event>,
    pub centroid: Vec<f32>,
    /// Mean cosine similarity of members to the centroid
    pub intra_cluster_similarity: f32,
    /// Member nearest to the centroid
    pub representative: Event,
    pub common_attributes: ClusterAttributes,
}

impl EventCluster {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ========== k-means ==========

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_distance(point, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn kmeans_plus_plus_init(points: &[Vec<f32>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f32>> {
    let mut chosen: Vec<usize> = vec![rng.gen_range(0..points.len())];

    while chosen.len() < k {
        let weights: Vec<f32> = points
            .iter()
            .map(|p| {
                chosen
                    .iter()
                    .map(|&c| squared_distance(p, &points[c]))
                    .fold(f32::INFINITY, f32::min)
            })
            .collect();
        let total: f32 = weights.iter().sum();

        let next = if total > 0.0 {
            let mut target = rng.gen_range(0.0..total);
            let mut pick = points.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    pick = i;
                    break;
                }
                target -= w;
            }
            pick
        } else {
            // Every point coincides with a chosen centroid
            match (0..points.len()).find(|i| !chosen.contains(i)) {
                Some(i) => i,
                None => break,
            }
        };
        chosen.push(next);
    }

    chosen.into_iter().map(|i| points[i].clone()).collect()
}

fn compute_centroids(points: &[Vec<f32>], labels: &[usize], previous: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let dim = points.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![vec![0.0f32; dim]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (point, &label) in points.iter().zip(labels) {
        counts[label] += 1;
        for (s, v) in sums[label].iter_mut().zip(point) {
            *s += v;
        }
    }

    sums.into_iter()
        .zip(counts)
        .enumerate()
        .map(|(i, (sum, count))| {
            if count == 0 {
                previous[i].clone()
            } else {
                sum.into_iter().map(|s| s / count as f32).collect()
            }
        })
        .collect()
}

/// Partition `points` into at most `k` clusters
///
/// Returns one label per point. Deterministic for a given seed.
pub fn kmeans(points: &[Vec<f32>], k: usize, max_iterations: usize, seed: u64) -> Vec<usize> {
    if points.is_empty() {
        return Vec::new();
    }
    let k = k.clamp(1, points.len());
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut centroids = kmeans_plus_plus_init(points, k, &mut rng);
    let mut labels: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();

    for _ in 0..max_iterations.max(1) {
        centroids = compute_centroids(points, &labels, &centroids);
        let next: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();
        if next == labels {
            break;
        }
        labels = next;
    }
    labels
}

/// Mean silhouette coefficient (Euclidean)
///
/// `None` unless there are at least two distinct labels.
pub fn silhouette_score(points: &[Vec<f32>], labels: &[usize]) -> Option<f32> {
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        members.entry(label).or_default().push(i);
    }
    if members.len() < 2 || points.is_empty() {
        return None;
    }

    let mean_distance = |i: usize, group: &[usize]| -> f32 {
        let others: Vec<f32> = group
            .iter()
            .filter(|&&j| j != i)
            .map(|&j| euclidean_distance(&points[i], &points[j]))
            .collect();
        if others.is_empty() {
            0.0
        } else {
            others.iter().sum::<f32>() / others.len() as f32
        }
    };

    let mut total = 0.0;
    for (i, &label) in labels.iter().enumerate() {
        let own = &members[&label];
        if own.len() < 2 {
            continue;
        }
        let a = mean_distance(i, own);
        let b = members
            .iter()
            .filter(|(other, _)| **other != label)
            .map(|(_, group)| mean_distance(i, group))
            .fold(f32::INFINITY, f32::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }
    Some(total / points.len() as f32)
}

/// Pick k by silhouette over `2..=min(max_clusters, n/2)`
///
/// Falls back to a single cluster when that range is empty or no candidate
/// separates the data (silhouette ≤ 0).
pub fn choose_k(points: &[Vec<f32>], max_clusters: usize, max_iterations: usize, seed: u64) -> usize {
    let max_k = max_clusters.min(points.len() / 2);
    if max_k < 2 {
        return 1;
    }

    let mut best = (1, 0.0f32);
    for k in 2..=max_k {
        let labels = kmeans(points, k, max_iterations, seed);
        if let Some(score) = silhouette_score(points, &labels)
            && score > best.1
        {
            best = (k, score);
        }
    }
    best.0
}

// ========== DBSCAN ==========

/// Density clustering on cosine distance
///
/// A point is a core point when at least `min_samples` points (itself
/// included) lie within `eps`. Noise points are labelled `None`.
pub fn dbscan(points: &[Vec<f32>], eps: f32, min_samples: usize) -> Vec<Option<usize>> {
    let n = points.len();
    let region = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| 1.0 - cosine_similarity(&points[i], &points[j]) <= eps)
            .collect()
    };

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let neighbours = region(i);
        if neighbours.len() < min_samples.max(1) {
            continue;
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = Some(cluster);

        let mut queue: VecDeque<usize> = neighbours.into_iter().collect();
        while let Some(j) = queue.pop_front() {
            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;
            let expansion = region(j);
            if expansion.len() >= min_samples.max(1) {
                queue.extend(expansion);
            }
        }
    }
    labels
}

// ========== Cluster summaries ==========

fn centroid_of(vectors: &[&Vec<f32>]) -> Vec<f32> {
    let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
    let mut centroid = vec![0.0f32; dim];
    for v in vectors {
        for (c, x) in centroid.iter_mut().zip(v.iter()) {
            *c += x;
        }
    }
    let n = vectors.len().max(1) as f32;
    centroid.iter_mut().for_each(|c| *c /= n);
    centroid
}

fn common_attributes(events: &[&Event]) -> ClusterAttributes {
    let mut type_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut entity_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut importances = Vec::new();

    for event in events {
        if let Some(t) = event.event_type.as_deref().filter(|t| !t.is_empty()) {
            *type_distribution.entry(t.to_string()).or_insert(0) += 1;
        }
        for entity in &event.entities {
            *entity_counts.entry(entity.as_str()).or_insert(0) += 1;
        }
        if let Some(score) = event.importance_score {
            importances.push(score);
        }
    }

    let dominant_type = type_distribution
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(t, _)| t.clone());

    let mut entities: Vec<(&str, usize)> = entity_counts.into_iter().collect();
    entities.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let common_entities = entities.into_iter().take(5).map(|(e, _)| e.to_string()).collect();

    let avg_importance = if importances.is_empty() {
        0.0
    } else {
        importances.iter().sum::<f32>() / importances.len() as f32
    };
    let importance_std = if importances.len() < 2 {
        0.0
    } else {
        let var = importances
            .iter()
            .map(|s| (s - avg_importance).powi(2))
            .sum::<f32>()
            / (importances.len() - 1) as f32;
        var.sqrt()
    };

    ClusterAttributes {
        dominant_type,
        type_distribution,
        common_entities,
        avg_importance,
        importance_std,
    }
}

/// Summarise labelled points into clusters of at least `min_cluster_size`
///
/// Cluster ids follow label order. Unlabelled points are ignored.
pub fn build_clusters(
    events: &[Event],
    vectors: &[Vec<f32>],
    labels: &[Option<usize>],
    min_cluster_size: usize,
) -> Vec<EventCluster> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        if let Some(label) = label {
            groups.entry(*label).or_default().push(i);
        }
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() >= min_cluster_size.max(1))
        .map(|(cluster_id, members)| {
            let member_vectors: Vec<&Vec<f32>> = members.iter().map(|&i| &vectors[i]).collect();
            let member_events: Vec<&Event> = members.iter().map(|&i| &events[i]).collect();
            let centroid = centroid_of(&member_vectors);

            let intra_cluster_similarity = (member_vectors
                .iter()
                .map(|v| cosine_similarity(v, &centroid))
                .sum::<f32>()
                / member_vectors.len() as f32)
                .clamp(0.0, 1.0);

            let representative_index = members
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    euclidean_distance(&vectors[a], &centroid)
                        .total_cmp(&euclidean_distance(&vectors[b], &centroid))
                })
                .unwrap_or(members[0]);

            let common_attributes = common_attributes(&member_events);
            let label = match &common_attributes.dominant_type {
                Some(t) if common_attributes.type_distribution[t] * 2 > members.len() => {
                    format!("cluster_{}_{}", cluster_id, t)
                }
                _ => format!("cluster_{}_mixed", cluster_id),
            };

            EventCluster {
                cluster_id,
                label,
                events: member_events.into_iter().cloned().collect(),
                centroid,
                intra_cluster_similarity,
                representative: events[representative_index].clone(),
                common_attributes,
            }
        })
        .collect()
}

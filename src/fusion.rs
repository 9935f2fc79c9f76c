//! Detection fusion.
//!
//! Merges UI-element, OCR, and object detections that overlap the same
//! screen region into a single ranked entity list.
//!
//! Algorithm:
//! 1. Compute IoU between every pair of detections from different sources.
//! 2. Cluster transitively (connected components) above the IoU threshold;
//!    a box overlapping two disjoint clusters merges them.
//! 3. Each cluster becomes one entity: union bounds, UI label when present
//!    (ground truth), maximum member confidence, distinct source set.
//! 4. Singletons pass through unmodified.
//! 5. Output ordered by confidence descending, ties by y then x ascending
//!    (top-left reading order), for deterministic results.

use crate::config::FusionConfig;
use crate::types::{Detection, DetectionSource, FusedEntity};

/// Fusion policy knobs
#[derive(Debug, Clone, Copy)]
pub struct FusionOptions {
    /// Minimum IoU for two detections to be considered the same thing
    pub iou_threshold: f32,
    /// Treat UI-element labels as ground truth within a cluster
    pub prefer_ui_labels: bool,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            prefer_ui_labels: true,
        }
    }
}

impl From<&FusionConfig> for FusionOptions {
    fn from(config: &FusionConfig) -> Self {
        Self {
            iou_threshold: config.iou_threshold,
            prefer_ui_labels: config.prefer_ui_labels,
        }
    }
}

/// Union-find over detection indices
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Attach to the smaller root so cluster identity follows the
            // earliest member, keeping output order input-driven.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Merge overlapping detections into a ranked entity list
pub fn fuse(detections: Vec<Detection>, opts: &FusionOptions) -> Vec<FusedEntity> {
    if detections.is_empty() {
        return Vec::new();
    }

    let mut sets = DisjointSet::new(detections.len());

    // Only cross-source overlaps merge; two OCR spans on top of each other
    // are still two findings.
    for i in 0..detections.len() {
        for j in (i + 1)..detections.len() {
            if detections[i].source == detections[j].source {
                continue;
            }
            if detections[i].bounds.iou(&detections[j].bounds) >= opts.iou_threshold {
                sets.union(i, j);
            }
        }
    }

    // Gather clusters keyed by root, ordered by earliest member index
    let mut cluster_order: Vec<usize> = Vec::new();
    let mut clusters: std::collections::HashMap<usize, Vec<usize>> =
        std::collections::HashMap::new();

    for i in 0..detections.len() {
        let root = sets.find(i);
        let members = clusters.entry(root).or_insert_with(|| {
            cluster_order.push(root);
            Vec::new()
        });
        members.push(i);
    }

    let mut entities: Vec<FusedEntity> = cluster_order
        .into_iter()
        .map(|root| merge_cluster(&detections, &clusters[&root], opts))
        .collect();

    // Stable sort keeps equal-key entities in cluster order
    entities.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.bounds.y.cmp(&b.bounds.y))
            .then(a.bounds.x.cmp(&b.bounds.x))
    });

    entities
}

/// Collapse one cluster of detection indices into a single entity
fn merge_cluster(detections: &[Detection], members: &[usize], opts: &FusionOptions) -> FusedEntity {
    let mut bounds = detections[members[0]].bounds;
    let mut confidence = 0.0f32;
    let mut sources: Vec<DetectionSource> = Vec::new();

    for &i in members {
        let det = &detections[i];
        bounds = bounds.union(&det.bounds);
        confidence = confidence.max(det.confidence);
        if !sources.contains(&det.source) {
            sources.push(det.source);
        }
    }
    sources.sort();

    let label = pick_label(detections, members, opts);

    FusedEntity {
        label,
        bounds,
        confidence,
        sources,
        merged: members.len(),
    }
}

/// UI-element labels win when present (OS ground truth); otherwise the
/// highest-confidence member names the entity. First member wins ties so the
/// choice is deterministic.
fn pick_label(detections: &[Detection], members: &[usize], opts: &FusionOptions) -> String {
    if opts.prefer_ui_labels {
        let ui_label = members
            .iter()
            .map(|&i| &detections[i])
            .find(|d| d.source == DetectionSource::UiElement)
            .map(|d| d.label.clone());
        if let Some(label) = ui_label {
            return label;
        }
    }

    let mut best = &detections[members[0]];
    for &i in &members[1..] {
        if detections[i].confidence > best.confidence {
            best = &detections[i];
        }
    }
    best.label.clone()
}

//! 4.E — semantic retrieval: cosine similarity over embeddings, with optional
//! structural-prior weighting and attention reranking over the task graph.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::embedding::cosine_similarity;
use crate::repository::models::{LinkKind, Task, TaskStatus, TaskType};

#[derive(Debug, Clone, Copy)]
pub struct StructuralWeights {
    pub requires: f64,
    pub refers: f64,
    pub sibling: f64,
    pub parent: f64,
    pub child: f64,
    pub distance_decay: f64,
}

impl Default for StructuralWeights {
    fn default() -> Self {
        Self {
            requires: 0.8,
            refers: 0.4,
            sibling: 0.3,
            parent: 0.5,
            child: 0.6,
            distance_decay: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttentionWeights {
    pub requires: f64,
    pub refers: f64,
    pub sibling: f64,
    pub parent: f64,
    pub child: f64,
}

impl Default for AttentionWeights {
    fn default() -> Self {
        Self {
            requires: 1.0,
            refers: 0.6,
            sibling: 0.4,
            parent: 0.7,
            child: 0.8,
        }
    }
}

/// A candidate task with its embedding, as fetched from the repository.
pub struct Candidate {
    pub task: Task,
    pub vector: Vec<f32>,
}

/// A local graph edge used for structural weighting and reranking.
#[derive(Debug, Clone, Copy)]
pub enum EdgeKind {
    Requires,
    Refers,
    Parent,
    Child,
    Sibling,
}

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub task_id: i64,
    pub similarity: f64,
    pub structural_weight: Option<f64>,
    pub attention_score: Option<f64>,
    pub combined_score: f64,
}

pub struct RetrievalRequest<'a> {
    pub query_vector: &'a [f32],
    pub query_task: Option<&'a Task>,
    pub k: usize,
    pub min_similarity: f64,
    pub structural: Option<StructuralWeights>,
    pub attention_alpha: Option<f64>,
    /// Edges among `{query} ∪ candidates`, keyed by `(from, to)`.
    pub edges: &'a HashMap<(i64, i64), EdgeKind>,
}

/// Runs the full retrieval pipeline (SPEC_FULL.md §4.E). `candidates` need
/// not be pre-filtered; invalid vectors are skipped and logged, never fatal.
pub fn retrieve(req: &RetrievalRequest, candidates: &[Candidate]) -> Vec<RetrievalResult> {
    let dim = req.query_vector.len();
    let mut scored: Vec<(i64, f64)> = Vec::with_capacity(candidates.len());

    for c in candidates {
        if c.vector.len() != dim || c.vector.iter().any(|x| x.is_nan()) {
            tracing::warn!(task_id = c.task.id, "skipping candidate with invalid embedding");
            continue;
        }
        let sim = cosine_similarity(req.query_vector, &c.vector).clamp(-1.0, 1.0);
        if sim >= req.min_similarity {
            scored.push((c.task.id, sim));
        }
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
    scored.truncate(req.k.saturating_mul(2).max(req.k));

    let by_id: HashMap<i64, &Candidate> = candidates.iter().map(|c| (c.task.id, c)).collect();

    let mut results: Vec<RetrievalResult> = scored
        .into_iter()
        .map(|(task_id, similarity)| RetrievalResult {
            task_id,
            similarity,
            structural_weight: None,
            attention_score: None,
            combined_score: similarity,
        })
        .collect();

    if let Some(weights) = req.structural {
        let anchor = find_anchor(&results, req.edges, req.query_task.map(|t| t.id));
        apply_structural_prior(&mut results, req.edges, weights, anchor);
    }

    if let (Some(query_task), Some(alpha)) = (req.query_task, req.attention_alpha) {
        apply_attention_rerank(&mut results, query_task, &by_id, req.edges, alpha);
    }

    results.sort_by(|a, b| b.combined_score.partial_cmp(&a.combined_score).unwrap().then(a.task_id.cmp(&b.task_id)));
    results.truncate(req.k);
    results
}

fn edge_weight(kind: &EdgeKind, w: StructuralWeights) -> f64 {
    match kind {
        EdgeKind::Requires => w.requires,
        EdgeKind::Refers => w.refers,
        EdgeKind::Sibling => w.sibling,
        EdgeKind::Parent => w.parent,
        EdgeKind::Child => w.child,
    }
}

/// Picks the node the local subgraph is centered on: the caller's query
/// task if known, otherwise whichever edge endpoint isn't itself a
/// candidate (the implicit query node in `{query} ∪ top-2k`).
fn find_anchor(results: &[RetrievalResult], edges: &HashMap<(i64, i64), EdgeKind>, query_task_id: Option<i64>) -> Option<i64> {
    if query_task_id.is_some() {
        return query_task_id;
    }
    let candidate_ids: HashSet<i64> = results.iter().map(|r| r.task_id).collect();
    for &(from, to) in edges.keys() {
        if !candidate_ids.contains(&from) {
            return Some(from);
        }
        if !candidate_ids.contains(&to) {
            return Some(to);
        }
    }
    None
}

fn build_adjacency(edges: &HashMap<(i64, i64), EdgeKind>) -> HashMap<i64, HashSet<i64>> {
    let mut adj: HashMap<i64, HashSet<i64>> = HashMap::new();
    for &(from, to) in edges.keys() {
        adj.entry(from).or_default().insert(to);
        adj.entry(to).or_default().insert(from);
    }
    adj
}

fn bfs_distances(adj: &HashMap<i64, HashSet<i64>>, start: i64) -> HashMap<i64, usize> {
    let mut dist = HashMap::new();
    dist.insert(start, 0);
    let mut queue = VecDeque::new();
    queue.push_back(start);
    while let Some(node) = queue.pop_front() {
        let d = dist[&node];
        if let Some(neighbors) = adj.get(&node) {
            for &next in neighbors {
                if !dist.contains_key(&next) {
                    dist.insert(next, d + 1);
                    queue.push_back(next);
                }
            }
        }
    }
    dist
}

fn common_neighbor_score(adj: &HashMap<i64, HashSet<i64>>, a: i64, b: i64) -> f64 {
    let empty = HashSet::new();
    let na = adj.get(&a).unwrap_or(&empty);
    let nb = adj.get(&b).unwrap_or(&empty);
    let union = na.union(nb).count();
    if union == 0 {
        return 0.0;
    }
    na.intersection(nb).count() as f64 / union as f64
}

/// Builds a local subgraph over `{anchor} ∪ candidates` and, per candidate,
/// sums four weighted components: the direct edge weight to the anchor
/// (covering both dependency and hierarchy link kinds), a BFS-distance
/// decay term, and a common-neighbor overlap score (SPEC_FULL.md §4.E
/// step 4).
fn apply_structural_prior(
    results: &mut [RetrievalResult],
    edges: &HashMap<(i64, i64), EdgeKind>,
    w: StructuralWeights,
    anchor: Option<i64>,
) {
    let alpha = 0.3;
    let adj = build_adjacency(edges);
    let distances = anchor.map(|a| bfs_distances(&adj, a));

    for r in results.iter_mut() {
        let mut weight = 0.0f64;

        if let Some(anchor_id) = anchor {
            if let Some(kind) = edges
                .get(&(anchor_id, r.task_id))
                .or_else(|| edges.get(&(r.task_id, anchor_id)))
            {
                weight += edge_weight(kind, w);
            }

            if let Some(&distance) = distances.as_ref().and_then(|d| d.get(&r.task_id)) {
                if distance > 0 {
                    weight += (-w.distance_decay * distance as f64).exp();
                }
            }

            weight += w.distance_decay * common_neighbor_score(&adj, anchor_id, r.task_id);
        }

        r.structural_weight = Some(weight);
        r.combined_score = (1.0 - alpha) * r.similarity + alpha * weight;
    }
}

fn node_features(task: &Task, embedding: &[f32]) -> Vec<f64> {
    let status_code = match task.status {
        TaskStatus::Pending => 0.0,
        TaskStatus::Running => 0.5,
        TaskStatus::Done => 1.0,
        TaskStatus::NeedsReview => 0.5,
        TaskStatus::Failed => 0.0,
    };
    let type_code = match task.task_type {
        TaskType::Atomic => 0.0,
        TaskType::Composite => 1.0,
        TaskType::Root => 1.0,
    };
    let has_parent = if task.parent_id.is_some() { 1.0 } else { 0.0 };
    let normalized_priority = (task.priority as f64 / 100.0).clamp(0.0, 1.0);
    let normalized_depth = (task.path.matches('/').count() as f64 / 16.0).clamp(0.0, 1.0);

    let mut features: Vec<f64> = embedding.iter().map(|x| *x as f64).collect();
    features.push(normalized_priority);
    features.push(normalized_depth);
    features.push(status_code);
    features.push(has_parent);
    features.push(type_code);
    features
}

fn apply_attention_rerank(
    results: &mut [RetrievalResult],
    query_task: &Task,
    by_id: &HashMap<i64, &Candidate>,
    edges: &HashMap<(i64, i64), EdgeKind>,
    alpha: f64,
) {
    let w = AttentionWeights::default();
    let query_features = match by_id.get(&query_task.id) {
        Some(c) => node_features(query_task, &c.vector),
        None => return,
    };

    for r in results.iter_mut() {
        let Some(c) = by_id.get(&r.task_id) else { continue };
        let candidate_features = node_features(&c.task, &c.vector);
        let feat_sim = cosine_similarity_f64(&query_features, &candidate_features);

        let mut adjacency = 0.0f64;
        if let Some(kind) = edges.get(&(query_task.id, r.task_id)).or_else(|| edges.get(&(r.task_id, query_task.id))) {
            adjacency = match kind {
                EdgeKind::Requires => w.requires,
                EdgeKind::Refers => w.refers,
                EdgeKind::Sibling => w.sibling,
                EdgeKind::Parent => w.parent,
                EdgeKind::Child => w.child,
            };
        }

        let attention = 0.7 * feat_sim + 0.3 * adjacency;
        r.attention_score = Some(attention);
        r.combined_score = (1.0 - alpha) * r.combined_score + alpha * attention;
    }
}

fn cosine_similarity_f64(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(id: i64) -> Task {
        Task {
            id,
            parent_id: None,
            root_id: id,
            workflow_id: "wf_1".into(),
            session_id: None,
            path: id.to_string(),
            name: "T".into(),
            status: TaskStatus::Done,
            priority: 0,
            task_type: TaskType::Atomic,
            input_prompt: None,
            output_content: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn ranks_by_similarity_descending_with_id_tiebreak() {
        let candidates = vec![
            Candidate { task: task(1), vector: vec![1.0, 0.0] },
            Candidate { task: task(2), vector: vec![0.9, 0.1] },
            Candidate { task: task(3), vector: vec![0.0, 1.0] },
        ];
        let edges = HashMap::new();
        let req = RetrievalRequest {
            query_vector: &[1.0, 0.0],
            query_task: None,
            k: 2,
            min_similarity: 0.0,
            structural: None,
            attention_alpha: None,
            edges: &edges,
        };
        let results = retrieve(&req, &candidates);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].task_id, 1);
        assert_eq!(results[1].task_id, 2);
    }

    #[test]
    fn invalid_vector_is_skipped_not_fatal() {
        let candidates = vec![
            Candidate { task: task(1), vector: vec![1.0, f32::NAN] },
            Candidate { task: task(2), vector: vec![1.0, 0.0] },
        ];
        let edges = HashMap::new();
        let req = RetrievalRequest {
            query_vector: &[1.0, 0.0],
            query_task: None,
            k: 5,
            min_similarity: 0.0,
            structural: None,
            attention_alpha: None,
            edges: &edges,
        };
        let results = retrieve(&req, &candidates);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].task_id, 2);
    }

    #[test]
    fn below_min_similarity_is_excluded() {
        let candidates = vec![Candidate { task: task(1), vector: vec![0.0, 1.0] }];
        let edges = HashMap::new();
        let req = RetrievalRequest {
            query_vector: &[1.0, 0.0],
            query_task: None,
            k: 5,
            min_similarity: 0.5,
            structural: None,
            attention_alpha: None,
            edges: &edges,
        };
        assert!(retrieve(&req, &candidates).is_empty());
    }

    #[test]
    fn structural_prior_weighs_distance_and_common_neighbors() {
        // anchor=100 -> 1 (direct `requires`); 1 -> 2 (so 2 is two hops from
        // the anchor, with 1 as a shared neighbor of both).
        let candidates = vec![
            Candidate { task: task(1), vector: vec![0.9, 0.1] },
            Candidate { task: task(2), vector: vec![0.9, 0.1] },
        ];
        let mut edges = HashMap::new();
        edges.insert((100i64, 1i64), EdgeKind::Requires);
        edges.insert((1i64, 2i64), EdgeKind::Refers);
        let req = RetrievalRequest {
            query_vector: &[1.0, 0.0],
            query_task: None,
            k: 2,
            min_similarity: 0.0,
            structural: Some(StructuralWeights::default()),
            attention_alpha: None,
            edges: &edges,
        };
        let results = retrieve(&req, &candidates);
        let w1 = results.iter().find(|r| r.task_id == 1).unwrap().structural_weight.unwrap();
        let w2 = results.iter().find(|r| r.task_id == 2).unwrap().structural_weight.unwrap();
        // candidate 1 is a direct `requires` neighbor of the anchor; candidate
        // 2 is two hops away with no direct edge, so it must score lower even
        // though it picks up a common-neighbor contribution via candidate 1.
        assert!(w1 > w2);
        assert!(w2 > 0.0);
    }

    #[test]
    fn structural_prior_boosts_requires_edge() {
        let candidates = vec![
            Candidate { task: task(1), vector: vec![0.9, 0.1] },
            Candidate { task: task(2), vector: vec![0.9, 0.1] },
        ];
        let mut edges = HashMap::new();
        edges.insert((100i64, 1i64), EdgeKind::Requires);
        let req = RetrievalRequest {
            query_vector: &[1.0, 0.0],
            query_task: None,
            k: 2,
            min_similarity: 0.0,
            structural: Some(StructuralWeights::default()),
            attention_alpha: None,
            edges: &edges,
        };
        let results = retrieve(&req, &candidates);
        assert_eq!(results[0].task_id, 1);
        assert!(results[0].structural_weight.unwrap() > 0.0);
    }
}

//! Shared views over the interaction log used by the algorithm trainers:
//! per-user event streams, session splits, and sparse weight vectors.

use std::collections::HashMap;

use rec_types::{Interaction, ItemId, UserId};

/// Group interactions by user, each stream sorted by timestamp.
pub fn by_user(interactions: &[Interaction]) -> HashMap<UserId, Vec<&Interaction>> {
    let mut users: HashMap<UserId, Vec<&Interaction>> = HashMap::new();
    for inter in interactions {
        users.entry(inter.user_id).or_default().push(inter);
    }
    for events in users.values_mut() {
        events.sort_by_key(|e| (e.timestamp, e.item_id));
    }
    users
}

/// Split one user's time-sorted events into sessions. A new session
/// starts when the explicit session id changes or when the gap between
/// consecutive events exceeds the window. Consecutive repeats of the
/// same item are collapsed.
pub fn sessions(events: &[&Interaction], window_secs: i64) -> Vec<Vec<ItemId>> {
    let mut out: Vec<Vec<ItemId>> = Vec::new();
    let mut current: Vec<ItemId> = Vec::new();
    let mut last_ts: Option<i64> = None;
    let mut last_session: Option<&str> = None;

    for event in events {
        let session = event.session_id.as_deref();
        let gap_break = last_ts.is_some_and(|ts| event.timestamp - ts > window_secs);
        let session_break = match (last_session, session) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        };
        if (gap_break || session_break) && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if current.last() != Some(&event.item_id) {
            current.push(event.item_id);
        }
        last_ts = Some(event.timestamp);
        last_session = session;
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Sparse user -> (item -> summed weight) matrix.
pub fn user_item_weights(interactions: &[Interaction]) -> HashMap<UserId, HashMap<ItemId, f64>> {
    let mut rows: HashMap<UserId, HashMap<ItemId, f64>> = HashMap::new();
    for inter in interactions {
        *rows
            .entry(inter.user_id)
            .or_default()
            .entry(inter.item_id)
            .or_insert(0.0) += inter.weight;
    }
    rows
}

/// Sparse item -> (user -> summed weight) matrix.
pub fn item_user_weights(interactions: &[Interaction]) -> HashMap<ItemId, HashMap<UserId, f64>> {
    let mut rows: HashMap<ItemId, HashMap<UserId, f64>> = HashMap::new();
    for inter in interactions {
        *rows
            .entry(inter.item_id)
            .or_default()
            .entry(inter.user_id)
            .or_insert(0.0) += inter.weight;
    }
    rows
}

/// The user's most recent distinct items, newest first, capped at `n`.
pub fn recent_items(events: &[&Interaction], n: usize) -> Vec<ItemId> {
    let mut seen = std::collections::HashSet::new();
    let mut recent = Vec::new();
    for event in events.iter().rev() {
        if seen.insert(event.item_id) {
            recent.push(event.item_id);
            if recent.len() == n {
                break;
            }
        }
    }
    recent
}

/// Cosine similarity between two sparse vectors, counting only shared
/// keys. Returns 0 when fewer than `min_overlap` keys are shared.
pub fn cosine<K: std::hash::Hash + Eq>(
    a: &HashMap<K, f64>,
    b: &HashMap<K, f64>,
    min_overlap: usize,
) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut dot = 0.0;
    let mut overlap = 0usize;
    for (key, &va) in small {
        if let Some(&vb) = large.get(key) {
            dot += va * vb;
            overlap += 1;
        }
    }
    if overlap < min_overlap || dot == 0.0 {
        return 0.0;
    }
    let norm_a: f64 = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

//! Reciprocal rank fusion: score = Σ 1/(k + rank) over both lists.
//!
//! Merges two ranked lists without normalizing their engine-native
//! scores against each other; only the ranks matter.

use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub struct RankFusion {
    /// Smoothing constant. Higher k flattens the influence of top ranks.
    k: f32,
}

impl RankFusion {
    #[must_use]
    pub fn new(k: f32) -> Self {
        Self { k }
    }

    /// Fuse two ranked lists of (id, engine score), descending rank
    /// order, into a single list of (id, fused score).
    ///
    /// Ids appearing in only one list still merge. The output is ordered
    /// by fused score descending, ties broken by id ascending, and
    /// capped at `top_n`.
    #[must_use]
    pub fn fuse<I: Clone + Ord>(
        &self,
        first: &[(I, f32)],
        second: &[(I, f32)],
        top_n: usize,
    ) -> Vec<(I, f64)> {
        let mut scores: BTreeMap<I, f64> = BTreeMap::new();
        for list in [first, second] {
            for (rank, (id, _)) in list.iter().enumerate() {
                let contribution = 1.0 / (f64::from(self.k) + rank as f64 + 1.0);
                *scores.entry(id.clone()).or_default() += contribution;
            }
        }

        let mut fused: Vec<(I, f64)> = scores.into_iter().collect();
        fused.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        fused.truncate(top_n);
        fused
    }
}

impl Default for RankFusion {
    fn default() -> Self {
        Self::new(60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn ranked(ids: &[&str]) -> Vec<(String, f32)> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), 10.0 - i as f32))
            .collect()
    }

    #[test]
    fn ids_in_both_lists_rank_first() {
        let fusion = RankFusion::default();
        let fused = fusion.fuse(&ranked(&["a", "b", "c"]), &ranked(&["c", "a", "d"]), 10);

        let ids: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn single_list_ids_still_merge() {
        let fusion = RankFusion::default();
        let fused = fusion.fuse(&ranked(&["a"]), &[], 10);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn equal_contributions_tie_break_by_id() {
        let fusion = RankFusion::default();
        // "b" and "a" each hold rank 1 in exactly one list
        let fused = fusion.fuse(&ranked(&["b"]), &ranked(&["a"]), 10);
        assert_eq!(fused[0].0, "a");
        assert_eq!(fused[1].0, "b");
        assert_eq!(fused[0].1, fused[1].1);
    }

    #[test]
    fn top_n_caps_the_output() {
        let fusion = RankFusion::default();
        let fused = fusion.fuse(&ranked(&["a", "b", "c"]), &ranked(&["d", "e"]), 2);
        assert_eq!(fused.len(), 2);
    }

    proptest! {
        #[test]
        fn disjoint_lists_fuse_to_the_exact_union(
            first_len in 0usize..20,
            second_len in 0usize..20,
        ) {
            let first: Vec<(String, f32)> = (0..first_len)
                .map(|i| (format!("a{i:02}"), 5.0))
                .collect();
            let second: Vec<(String, f32)> = (0..second_len)
                .map(|i| (format!("b{i:02}"), 5.0))
                .collect();

            let fused = RankFusion::default().fuse(&first, &second, usize::MAX);

            // union of ids, each exactly once
            prop_assert_eq!(fused.len(), first_len + second_len);
            let mut seen: Vec<&String> = fused.iter().map(|(id, _)| id).collect();
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), fused.len());

            // descending score, ties by id ascending
            for pair in fused.windows(2) {
                prop_assert!(pair[0].1 >= pair[1].1);
                if pair[0].1 == pair[1].1 {
                    prop_assert!(pair[0].0 < pair[1].0);
                }
            }
        }
    }
}

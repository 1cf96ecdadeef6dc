//! Reciprocal Rank Fusion (RRF).
//!
//! Combines multiple ranked lists into a single fused ranking.
//! Based on: Cormack, Clarke, Buettcher (2009) - "Reciprocal Rank Fusion
//! outperforms Condorcet and individual Rank Learning Methods"

use std::collections::HashMap;

/// Configuration for the RRF algorithm.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// The k parameter dampens the contribution of lower ranks. Higher
    /// k flattens the curve. 60 is the value recommended in the
    /// original paper.
    pub k: u32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: 60 }
    }
}

impl RrfConfig {
    /// Creates a new RRF config with the specified k value.
    #[must_use]
    pub const fn new(k: u32) -> Self {
        Self { k }
    }
}

/// One fused candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    /// Item id.
    pub id: i64,
    /// Fused RRF score (higher is better).
    pub score: f64,
    /// 1-based rank of the item in each input list; `None` when absent.
    pub ranks: Vec<Option<usize>>,
}

/// Performs weighted Reciprocal Rank Fusion over ranked lists.
///
/// The score of item `d` is `Σᵢ wᵢ / (k + rankᵢ(d))` over the lists
/// containing it (1-based ranks; an absent list contributes nothing).
/// The result is sorted by score descending; exact ties break toward
/// the lower sum of present ranks, then toward the lower id.
///
/// # Arguments
///
/// * `lists` - `(ranked ids, weight)` pairs, most relevant id first.
/// * `config` - RRF configuration (k parameter).
#[must_use]
pub fn reciprocal_rank_fusion(lists: &[(&[i64], f64)], config: &RrfConfig) -> Vec<FusedHit> {
    let mut ranks_by_id: HashMap<i64, Vec<Option<usize>>> = HashMap::new();

    for (list_idx, (list, _)) in lists.iter().enumerate() {
        for (pos, id) in list.iter().enumerate() {
            let entry = ranks_by_id
                .entry(*id)
                .or_insert_with(|| vec![None; lists.len()]);
            // First occurrence wins if a list repeats an id.
            if entry[list_idx].is_none() {
                entry[list_idx] = Some(pos + 1);
            }
        }
    }

    let mut fused: Vec<FusedHit> = ranks_by_id
        .into_iter()
        .map(|(id, ranks)| {
            let mut score = 0.0;
            for (rank, (_, weight)) in ranks.iter().zip(lists.iter()) {
                if let Some(rank) = rank {
                    #[allow(clippy::cast_precision_loss)]
                    let rank = *rank as f64;
                    score += weight / (f64::from(config.k) + rank);
                }
            }
            FusedHit { id, score, ranks }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| combined_rank(a).cmp(&combined_rank(b)))
            .then_with(|| a.id.cmp(&b.id))
    });

    fused
}

/// Sum of present ranks; the tie-break after score.
fn combined_rank(hit: &FusedHit) -> usize {
    hit.ranks.iter().flatten().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fuse(lists: &[(&[i64], f64)]) -> Vec<FusedHit> {
        reciprocal_rank_fusion(lists, &RrfConfig::default())
    }

    #[test]
    fn test_rrf_single_list() {
        let list = vec![1, 2, 3];
        let results = fuse(&[(&list, 1.0)]);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, 1);
        assert!(results[0].score > results[1].score);
        assert!(results[1].score > results[2].score);
    }

    #[test]
    fn test_rrf_score_formula() {
        let list = vec![7];
        let results = fuse(&[(&list, 1.0)]);

        // Score is 1 / (60 + 1).
        assert!((results[0].score - 1.0 / 61.0).abs() < f64::EPSILON);
        assert_eq!(results[0].ranks, vec![Some(1)]);
    }

    #[test]
    fn test_rrf_combines_lists() {
        let list1 = vec![7];
        let list2 = vec![7];
        let results = fuse(&[(&list1, 1.0), (&list2, 1.0)]);

        assert!((results[0].score - 2.0 / 61.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_weighted() {
        let list1 = vec![1, 2];
        let list2 = vec![2, 1];

        // Double weight on list1 should put item 1 first.
        let results = reciprocal_rank_fusion(&[(&list1, 2.0), (&list2, 1.0)], &RrfConfig::new(60));
        assert_eq!(results[0].id, 1);
    }

    #[test]
    fn test_rrf_hybrid_fixture_ordering() {
        // BM25 ranks A:1 B:3 C:2; vector ranks A:5 B:1 C:3.
        // With k=60 and unit weights the fused order is [B, C, A].
        let (a, b, c) = (10, 20, 30);
        let bm25 = vec![a, c, b];
        let vector = vec![b, 91, c, 92, a];

        let results = fuse(&[(&bm25, 1.0), (&vector, 1.0)]);
        let top: Vec<i64> = results.iter().take(3).map(|h| h.id).collect();
        assert_eq!(top, vec![b, c, a]);

        // Per-list ranks are carried through.
        assert_eq!(results[0].ranks, vec![Some(3), Some(1)]);
    }

    #[test]
    fn test_rrf_absent_contributes_nothing() {
        let list1 = vec![1, 2];
        let list2 = vec![3];
        let results = fuse(&[(&list1, 1.0), (&list2, 1.0)]);

        let item3 = results.iter().find(|h| h.id == 3).unwrap();
        assert_eq!(item3.ranks, vec![None, Some(1)]);
        assert!((item3.score - 1.0 / 61.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_tie_breaks_by_combined_rank_then_id() {
        // Items 1 and 2 have symmetric ranks (1st in one list, 2nd in the
        // other): identical scores and combined ranks, so the lower id
        // wins.
        let list1 = vec![1, 2];
        let list2 = vec![2, 1];
        let results = fuse(&[(&list1, 1.0), (&list2, 1.0)]);

        assert_eq!(results[0].id, 1);
        assert_eq!(results[1].id, 2);
    }

    #[test]
    fn test_rrf_empty_lists() {
        let empty: Vec<i64> = Vec::new();
        let results = fuse(&[(&empty, 1.0)]);
        assert!(results.is_empty());
    }

    #[test]
    fn test_rrf_k_parameter_flattens() {
        let list = vec![1, 2];
        let low = reciprocal_rank_fusion(&[(&list, 1.0)], &RrfConfig::new(1));
        let high = reciprocal_rank_fusion(&[(&list, 1.0)], &RrfConfig::new(100));

        let diff_low = low[0].score - low[1].score;
        let diff_high = high[0].score - high[1].score;
        assert!(diff_low > diff_high);
    }

    proptest! {
        /// Worsening an item's rank in one list can never increase its
        /// fused score (RRF monotonicity).
        #[test]
        fn prop_rrf_monotonic_in_rank(
            rank in 1usize..50,
            degrade in 1usize..50,
            k in 1u32..200,
        ) {
            // Item 0 sits at `rank`, then at `rank + degrade`, in a list
            // of filler ids; the other list is fixed.
            let config = RrfConfig::new(k);
            let fixed: Vec<i64> = vec![0, 1, 2];

            let make_list = |pos: usize| -> Vec<i64> {
                let mut list: Vec<i64> = (1..=(pos + degrade + 1) as i64).map(|i| 1000 + i).collect();
                list.insert(pos - 1, 0);
                list
            };

            let better = make_list(rank);
            let worse = make_list(rank + degrade);

            let score_of = |list: &[i64]| {
                reciprocal_rank_fusion(&[(list, 1.0), (&fixed, 1.0)], &config)
                    .into_iter()
                    .find(|h| h.id == 0)
                    .map(|h| h.score)
                    .unwrap_or(0.0)
            };

            prop_assert!(score_of(&better) >= score_of(&worse));
        }
    }
}

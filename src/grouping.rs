// 👥 Grouping engine - multi-phase heuristic partition of the roster
// Phases: even split → leftover placement → undersize rebalance →
// residual merge → local search → strict size normalization

use std::collections::HashMap;

use tracing::debug;

use crate::affinity::AffinityMatrix;
use crate::db::{Rating, Student};

/// Smallest group size allowed in a final partition.
pub const MIN_GROUP_SIZE: usize = 4;

/// Largest group size allowed in a final partition.
pub const MAX_GROUP_SIZE: usize = 5;

/// Pass ceiling shared by the rebalance and local-search loops.
pub const DEFAULT_PASS_LIMIT: usize = 50;

/// A grouping result: disjoint groups of students covering the roster.
pub type Partition = Vec<Vec<Student>>;

/// Baseline group size for a roster of `n` students.
pub fn determine_target_size(n: usize) -> usize {
    if n < 50 {
        3
    } else if n < 80 {
        4
    } else if n < 120 {
        5
    } else {
        6
    }
}

// ============================================================================
// GROUPING ENGINE
// ============================================================================

/// Heuristic partition engine.
///
/// Groups are built around the baseline target size `T` from
/// [`determine_target_size`], with `T+1` acting as the soft capacity cap
/// during every affinity-driven phase. The pass ceilings bound the two
/// iterative loops; exhausting a ceiling yields a valid but possibly
/// suboptimal partition, never an error.
pub struct GroupingEngine {
    /// Smallest acceptable final group size
    pub min_group_size: usize,

    /// Largest acceptable final group size
    pub max_group_size: usize,

    /// Pass ceiling for the undersize rebalance loop
    pub rebalance_passes: usize,

    /// Pass ceiling for the local-search improvement loop
    pub local_search_passes: usize,
}

impl GroupingEngine {
    pub fn new() -> Self {
        GroupingEngine {
            min_group_size: MIN_GROUP_SIZE,
            max_group_size: MAX_GROUP_SIZE,
            rebalance_passes: DEFAULT_PASS_LIMIT,
            local_search_passes: DEFAULT_PASS_LIMIT,
        }
    }

    pub fn with_bounds(min_group_size: usize, max_group_size: usize) -> Self {
        GroupingEngine {
            min_group_size,
            max_group_size,
            ..Self::new()
        }
    }

    pub fn with_pass_limits(rebalance_passes: usize, local_search_passes: usize) -> Self {
        GroupingEngine {
            rebalance_passes,
            local_search_passes,
            ..Self::new()
        }
    }

    /// Compute a grouping for the given roster and rating snapshot.
    ///
    /// The matrix is rebuilt from the snapshot on every call, so the result
    /// always reflects the latest submitted ratings. `anchor_id` is accepted
    /// so callers pinning one student keep a stable signature; it does not
    /// influence placement.
    pub fn compute_grouping(
        &self,
        roster: &[Student],
        ratings: &[Rating],
        anchor_id: Option<&str>,
    ) -> Partition {
        let _ = anchor_id;

        if roster.is_empty() {
            return Vec::new();
        }

        let matrix = AffinityMatrix::build(roster, ratings);
        let optimized = self.optimize(&matrix);
        let normalized = self.normalize_sizes(optimized);

        debug!(
            students = matrix.len(),
            groups = normalized.len(),
            "grouping computed"
        );

        self.materialize(&matrix, roster, normalized)
    }

    /// Run the affinity-driven phases (even split through local search)
    /// over matrix indices. Group sizes here may still fall outside the
    /// final bounds; [`normalize_sizes`](Self::normalize_sizes) enforces
    /// the strict window.
    pub fn optimize(&self, matrix: &AffinityMatrix) -> Vec<Vec<usize>> {
        let n = matrix.len();
        if n == 0 {
            return Vec::new();
        }

        let target = determine_target_size(n);
        let (groups, leftovers) = self.even_split(n, target);
        let groups = self.place_leftovers(matrix, groups, &leftovers, target);
        let groups = self.rebalance_undersized(matrix, groups, target);
        let groups = self.merge_residual(groups);
        self.local_search(matrix, groups, target)
    }

    // ------------------------------------------------------------------
    // Phase A: even split
    // ------------------------------------------------------------------

    /// Cut the sorted roster into `n / target` consecutive groups of
    /// exactly `target` members; the remainder is held aside.
    fn even_split(&self, n: usize, target: usize) -> (Vec<Vec<usize>>, Vec<usize>) {
        let k = n / target;
        let mut groups = Vec::with_capacity(k);
        for g in 0..k {
            groups.push((g * target..(g + 1) * target).collect());
        }
        let leftovers = (k * target..n).collect();
        (groups, leftovers)
    }

    // ------------------------------------------------------------------
    // Phase B: leftover placement
    // ------------------------------------------------------------------

    /// Place each leftover into the group (below `target + 1`) with the
    /// highest average affinity, first group winning ties. When every
    /// group is capped, the leftover starts a new singleton group.
    fn place_leftovers(
        &self,
        matrix: &AffinityMatrix,
        mut groups: Vec<Vec<usize>>,
        leftovers: &[usize],
        target: usize,
    ) -> Vec<Vec<usize>> {
        let cap = target + 1;

        for &member in leftovers {
            let mut best_group: Option<usize> = None;
            let mut best_avg = -1.0;

            for (gi, group) in groups.iter().enumerate() {
                if group.len() >= cap {
                    continue;
                }
                let avg = matrix.average_affinity(member, group);
                if avg > best_avg {
                    best_avg = avg;
                    best_group = Some(gi);
                }
            }

            match best_group {
                Some(gi) => groups[gi].push(member),
                None => groups.push(vec![member]),
            }
        }

        groups
    }

    // ------------------------------------------------------------------
    // Phase C: undersize rebalance
    // ------------------------------------------------------------------

    /// Greedy hill-climb: members of groups below the minimum move to the
    /// uncapped group with the highest total affinity. No backtracking;
    /// the pass ceiling guarantees termination. Groups that remain
    /// undersized because every candidate is capped are left for the
    /// residual merge.
    fn rebalance_undersized(
        &self,
        matrix: &AffinityMatrix,
        mut groups: Vec<Vec<usize>>,
        target: usize,
    ) -> Vec<Vec<usize>> {
        let cap = target + 1;
        let mut passes = 0;
        let mut changed = true;

        while changed && passes < self.rebalance_passes {
            passes += 1;
            changed = false;

            for gi in 0..groups.len() {
                if groups[gi].len() >= self.min_group_size {
                    continue;
                }

                let members = groups[gi].clone();
                for member in members {
                    let mut best_dest: Option<usize> = None;
                    let mut best_synergy = -1;

                    for gj in 0..groups.len() {
                        if gj == gi || groups[gj].len() >= cap {
                            continue;
                        }
                        let synergy = matrix.synergy(member, &groups[gj]);
                        if synergy > best_synergy {
                            best_synergy = synergy;
                            best_dest = Some(gj);
                        }
                    }

                    if let Some(dest) = best_dest {
                        groups[gi].retain(|&m| m != member);
                        groups[dest].push(member);
                        changed = true;
                    }
                }
            }

            groups.retain(|g| !g.is_empty());
        }

        debug!(passes, "undersize rebalance finished");
        groups
    }

    // ------------------------------------------------------------------
    // Phase D: residual merge
    // ------------------------------------------------------------------

    /// Flatten every group still below the minimum into one merged group
    /// appended after the healthy groups. The merged group may violate
    /// both bounds; normalization fixes that.
    fn merge_residual(&self, groups: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        let (healthy, small): (Vec<_>, Vec<_>) = groups
            .into_iter()
            .partition(|g| g.len() >= self.min_group_size);

        if small.is_empty() {
            return healthy;
        }

        let merged: Vec<usize> = small.into_iter().flatten().collect();
        let mut result = healthy;
        result.push(merged);
        result
    }

    // ------------------------------------------------------------------
    // Phase E: local search
    // ------------------------------------------------------------------

    /// First-improvement relocation: a member moves to the uncapped group
    /// with the largest strictly positive gain in total affinity. Moves
    /// apply immediately so later evaluations in the same pass see the
    /// updated groups.
    fn local_search(
        &self,
        matrix: &AffinityMatrix,
        mut groups: Vec<Vec<usize>>,
        target: usize,
    ) -> Vec<Vec<usize>> {
        let cap = target + 1;
        let mut passes = 0;
        let mut changed = true;

        while changed && passes < self.local_search_passes {
            passes += 1;
            changed = false;

            for gi in 0..groups.len() {
                let members = groups[gi].clone();
                for member in members {
                    let current = matrix.synergy(member, &groups[gi]);
                    let mut best_dest: Option<usize> = None;
                    let mut best_gain = 0;

                    for gj in 0..groups.len() {
                        if gj == gi || groups[gj].len() >= cap {
                            continue;
                        }
                        let gain = matrix.synergy(member, &groups[gj]) - current;
                        if gain > best_gain {
                            best_gain = gain;
                            best_dest = Some(gj);
                        }
                    }

                    if let Some(dest) = best_dest {
                        groups[gi].retain(|&m| m != member);
                        groups[dest].push(member);
                        changed = true;
                    }
                }
            }

            groups.retain(|g| !g.is_empty());
        }

        debug!(passes, "local search finished");
        groups
    }

    // ------------------------------------------------------------------
    // Phase F: strict size normalization
    // ------------------------------------------------------------------

    /// Repack every member into groups sized `min_group_size` or
    /// `min_group_size + 1`, preserving the group-then-member order the
    /// earlier phases produced. Purely positional; affinity is not
    /// consulted here.
    pub fn normalize_sizes(&self, groups: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        let ordered: Vec<usize> = groups.into_iter().flatten().collect();
        let n = ordered.len();
        if n == 0 {
            return Vec::new();
        }

        let count = self.required_group_count(n);
        let base = n / count;
        let extra = n % count;

        let mut result = Vec::with_capacity(count);
        let mut cursor = 0;
        for gi in 0..count {
            let size = base + usize::from(gi < extra);
            result.push(ordered[cursor..cursor + size].to_vec());
            cursor += size;
        }

        result
    }

    /// Number of final groups for `n` members: enough that no group
    /// exceeds the maximum, reduced while the minimum cannot be met.
    /// For rosters where the size window is infeasible (for example 7
    /// members with a 4..=5 window) the count keeps shrinking so that
    /// everyone stays placed, accepting an oversized group.
    fn required_group_count(&self, n: usize) -> usize {
        let mut count = (n + self.max_group_size - 1) / self.max_group_size;
        while count > 1 && count * self.min_group_size > n {
            count -= 1;
        }
        count.max(1)
    }

    /// Map matrix indices back to `{id, name}` students.
    fn materialize(
        &self,
        matrix: &AffinityMatrix,
        roster: &[Student],
        groups: Vec<Vec<usize>>,
    ) -> Partition {
        let mut names: HashMap<&str, &str> = HashMap::new();
        for student in roster {
            names.entry(student.id.as_str()).or_insert(student.name.as_str());
        }

        groups
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .map(|idx| {
                        let id = &matrix.ids()[idx];
                        Student {
                            id: id.clone(),
                            name: names.get(id.as_str()).copied().unwrap_or_default().to_string(),
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

impl Default for GroupingEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_roster(n: usize) -> Vec<Student> {
        (1..=n)
            .map(|i| Student {
                id: format!("s{:03}", i),
                name: format!("Student {:03}", i),
            })
            .collect()
    }

    fn rating(rater: &str, rated: &str, score: i32) -> Rating {
        Rating {
            rater_id: rater.to_string(),
            rated_id: rated.to_string(),
            score,
        }
    }

    fn sorted_sizes(partition: &[Vec<Student>]) -> Vec<usize> {
        let mut sizes: Vec<usize> = partition.iter().map(|g| g.len()).collect();
        sizes.sort_unstable();
        sizes
    }

    fn assert_complete(partition: &[Vec<Student>], roster: &[Student]) {
        let mut seen: Vec<&str> = partition
            .iter()
            .flatten()
            .map(|s| s.id.as_str())
            .collect();
        seen.sort_unstable();
        let mut expected: Vec<&str> = roster.iter().map(|s| s.id.as_str()).collect();
        expected.sort_unstable();
        assert_eq!(seen, expected, "every student must appear exactly once");
    }

    #[test]
    fn test_target_size_boundaries() {
        assert_eq!(determine_target_size(49), 3);
        assert_eq!(determine_target_size(50), 4);
        assert_eq!(determine_target_size(79), 4);
        assert_eq!(determine_target_size(80), 5);
        assert_eq!(determine_target_size(119), 5);
        assert_eq!(determine_target_size(120), 6);
    }

    #[test]
    fn test_empty_roster_yields_empty_partition() {
        let engine = GroupingEngine::new();
        let partition = engine.compute_grouping(&[], &[], None);
        assert!(partition.is_empty());
    }

    #[test]
    fn test_roster_below_minimum_stays_one_group() {
        let engine = GroupingEngine::new();
        let roster = make_roster(3);

        let partition = engine.compute_grouping(&roster, &[], None);

        assert_eq!(partition.len(), 1);
        assert_eq!(partition[0].len(), 3);
        assert_complete(&partition, &roster);
    }

    #[test]
    fn test_nine_students_no_ratings_yields_four_and_five() {
        let engine = GroupingEngine::new();
        let roster = make_roster(9);

        let partition = engine.compute_grouping(&roster, &[], None);

        assert_eq!(sorted_sizes(&partition), vec![4, 5]);
        assert_complete(&partition, &roster);
    }

    #[test]
    fn test_fifty_students_final_bounds() {
        let engine = GroupingEngine::new();
        let roster = make_roster(50);

        let partition = engine.compute_grouping(&roster, &[], None);

        assert_complete(&partition, &roster);
        for group in &partition {
            assert!(
                group.len() == MIN_GROUP_SIZE || group.len() == MIN_GROUP_SIZE + 1,
                "group size {} outside final window",
                group.len()
            );
        }
    }

    #[test]
    fn test_infeasible_window_keeps_everyone_placed() {
        let engine = GroupingEngine::new();

        // 7 cannot be covered by groups of 4..=5; one oversized group
        // is preferred over dropping members
        let roster = make_roster(7);
        let partition = engine.compute_grouping(&roster, &[], None);
        assert_complete(&partition, &roster);
        assert_eq!(partition.len(), 1);
        assert_eq!(partition[0].len(), 7);

        // 11 = 6 + 5: one group exceeds the maximum by one
        let roster = make_roster(11);
        let partition = engine.compute_grouping(&roster, &[], None);
        assert_complete(&partition, &roster);
        assert_eq!(sorted_sizes(&partition), vec![5, 6]);
    }

    #[test]
    fn test_determinism_repeated_runs() {
        let engine = GroupingEngine::new();
        let roster = make_roster(37);

        // Deterministic pseudo-random rating pattern
        let mut ratings = Vec::new();
        for i in 1..=37usize {
            for j in 1..=37usize {
                if i == j || (i + j) % 3 != 0 {
                    continue;
                }
                let score = ((i * 7 + j * 3) % 5) as i32 + 1;
                ratings.push(rating(
                    &format!("s{:03}", i),
                    &format!("s{:03}", j),
                    score,
                ));
            }
        }

        let first = engine.compute_grouping(&roster, &ratings, None);
        let second = engine.compute_grouping(&roster, &ratings, None);

        assert_eq!(first, second, "identical snapshot must reproduce the partition");
        assert_complete(&first, &roster);
    }

    #[test]
    fn test_all_neutral_matrix_still_bounded() {
        let engine = GroupingEngine::new();
        let roster = make_roster(23);

        let partition = engine.compute_grouping(&roster, &[], None);

        assert_complete(&partition, &roster);
        for group in &partition {
            assert!(group.len() >= MIN_GROUP_SIZE && group.len() <= MIN_GROUP_SIZE + 1);
        }
    }

    #[test]
    fn test_leftover_placed_by_average_affinity() {
        let engine = GroupingEngine::new();
        let roster = make_roster(8);

        // Two cliques of four: s001-s004 and s005-s008, strong inside,
        // weak across
        let mut ratings = Vec::new();
        for i in 1..=8usize {
            for j in 1..=8usize {
                if i == j {
                    continue;
                }
                let same = (i <= 4) == (j <= 4);
                let score = if same { 5 } else { 1 };
                ratings.push(rating(&format!("s{:03}", i), &format!("s{:03}", j), score));
            }
        }

        let matrix = AffinityMatrix::build(&roster, &ratings);
        let optimized = engine.optimize(&matrix);

        // Leftover s007 must have joined the group holding its clique
        // mates rather than the first group
        let group_of = |id: &str| {
            let idx = matrix.index_of(id).unwrap();
            optimized.iter().position(|g| g.contains(&idx)).unwrap()
        };
        assert_eq!(group_of("s007"), group_of("s005"));
        assert_ne!(group_of("s007"), group_of("s001"));
    }

    #[test]
    fn test_celebrity_affinity_equals_neutral_grouping() {
        let engine = GroupingEngine::new();
        let roster = make_roster(22);

        // Everyone rates s001 a 5; s001 rates everyone a 1. Each pair
        // involving s001 sums to 6, identical to the neutral default,
        // so relocation must never fire on it.
        let mut ratings = Vec::new();
        for i in 2..=22usize {
            ratings.push(rating(&format!("s{:03}", i), "s001", 5));
            ratings.push(rating("s001", &format!("s{:03}", i), 1));
        }

        let with_celebrity = engine.compute_grouping(&roster, &ratings, None);
        let neutral = engine.compute_grouping(&roster, &[], None);

        assert_eq!(
            with_celebrity, neutral,
            "uniform affinity must not attract relocations"
        );
    }

    #[test]
    fn test_anchor_id_does_not_change_result() {
        let engine = GroupingEngine::new();
        let roster = make_roster(14);

        let plain = engine.compute_grouping(&roster, &[], None);
        let anchored = engine.compute_grouping(&roster, &[], Some("s007"));

        assert_eq!(plain, anchored);
    }

    #[test]
    fn test_optimized_output_differs_from_normalized() {
        let engine = GroupingEngine::new();
        let roster = make_roster(9);

        let matrix = AffinityMatrix::build(&roster, &[]);
        let optimized = engine.optimize(&matrix);

        // With nine neutral students the affinity phases leave a residual
        // singleton; normalization repacks into the strict window
        let mut optimized_sizes: Vec<usize> = optimized.iter().map(|g| g.len()).collect();
        optimized_sizes.sort_unstable();
        assert_eq!(optimized_sizes, vec![1, 4, 4]);

        let normalized = engine.normalize_sizes(optimized);
        let mut normalized_sizes: Vec<usize> = normalized.iter().map(|g| g.len()).collect();
        normalized_sizes.sort_unstable();
        assert_eq!(normalized_sizes, vec![4, 5]);
    }

    #[test]
    fn test_zero_pass_ceilings_still_valid() {
        let engine = GroupingEngine::with_pass_limits(0, 0);
        let roster = make_roster(13);

        let partition = engine.compute_grouping(&roster, &[], None);

        assert_complete(&partition, &roster);
        for group in &partition {
            assert!(group.len() >= MIN_GROUP_SIZE && group.len() <= MIN_GROUP_SIZE + 1);
        }
    }

    #[test]
    fn test_large_roster_uses_bigger_target() {
        let engine = GroupingEngine::new();
        let roster = make_roster(120);

        let partition = engine.compute_grouping(&roster, &[], None);

        assert_complete(&partition, &roster);
        // 120 / 5 = 24 groups of exactly the minimum plus one
        assert_eq!(partition.len(), 24);
        for group in &partition {
            assert_eq!(group.len(), 5);
        }
    }
}

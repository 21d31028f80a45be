//! Merge-group planning.
//!
//! Given the [min,max] header interval of every page, compute which
//! pages must be merged together: any two pages with overlapping
//! intervals can interleave and belong to one group. Groups with
//! disjoint ranges are merged independently, bounding the working set
//! to the largest overlapping group rather than the whole file.

use crate::sort::interval_tree::IntervalTree;

/// Header-value interval spanned by one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    /// Page index in file order.
    pub page: usize,
    /// Smallest header value in the page.
    pub min: u64,
    /// Largest header value in the page.
    pub max: u64,
}

/// Ordered merge plan: each group lists page indices in file order;
/// groups are ordered by ascending key range so emitting them in
/// sequence yields a globally sorted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub groups: Vec<Vec<usize>>,
}

impl MergePlan {
    /// Total pages covered by the plan.
    pub fn page_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Size of the largest group (peak simultaneous mappings).
    pub fn widest_group(&self) -> usize {
        self.groups.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Compute the merge plan for a set of page ranges.
///
/// Builds an interval tree over all page intervals and unions every
/// page with the pages its interval overlaps (endpoint containment or
/// full containment — any overlap at all). If no two pages overlap,
/// the plan degrades to a single group holding every page.
pub fn plan_merge(ranges: &[PageRange]) -> MergePlan {
    if ranges.is_empty() {
        return MergePlan { groups: Vec::new() };
    }

    let tree = IntervalTree::new();
    for (slot, r) in ranges.iter().enumerate() {
        tree.insert(r.min, r.max, slot);
    }

    // Union-find over range slots.
    let mut parent: Vec<usize> = (0..ranges.len()).collect();
    fn find(parent: &mut Vec<usize>, mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    let mut any_overlap = false;
    for (slot, r) in ranges.iter().enumerate() {
        for other in tree.query(r.min, r.max) {
            if other == slot {
                continue;
            }
            any_overlap = true;
            let (a, b) = (find(&mut parent, slot), find(&mut parent, other));
            if a != b {
                parent[a] = b;
            }
        }
    }

    if !any_overlap && ranges.len() > 1 {
        // Degenerate plan: no pair of pages overlaps. Treat every page
        // as one group rather than special-casing a copy-through pass.
        let mut all: Vec<usize> = (0..ranges.len()).collect();
        all.sort_by_key(|&slot| (ranges[slot].min, ranges[slot].page));
        let pages = all.into_iter().map(|slot| ranges[slot].page).collect();
        return MergePlan {
            groups: vec![pages],
        };
    }

    // Collect groups; remember each group's min key for ordering.
    let mut roots: Vec<(usize, u64)> = Vec::new(); // (root, group min)
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); ranges.len()];
    for slot in 0..ranges.len() {
        let root = find(&mut parent, slot);
        if members[root].is_empty() {
            roots.push((root, ranges[slot].min));
        }
        let entry = roots.iter_mut().find(|(r, _)| *r == root).expect("root recorded");
        entry.1 = entry.1.min(ranges[slot].min);
        members[root].push(slot);
    }

    roots.sort_by_key(|&(_, min)| min);

    let groups = roots
        .into_iter()
        .map(|(root, _)| {
            let mut pages: Vec<usize> =
                members[root].iter().map(|&slot| ranges[slot].page).collect();
            // File order within the group: the k-way merge breaks key
            // ties by page visitation order.
            pages.sort_unstable();
            pages
        })
        .collect();

    MergePlan { groups }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn range(page: usize, min: u64, max: u64) -> PageRange {
        PageRange { page, min, max }
    }

    #[test]
    fn test_empty_plan() {
        let plan = plan_merge(&[]);
        assert!(plan.groups.is_empty());
        assert_eq!(plan.page_count(), 0);
    }

    #[test]
    fn test_single_page() {
        let plan = plan_merge(&[range(0, 10, 20)]);
        assert_eq!(plan.groups, vec![vec![0]]);
    }

    #[test]
    fn test_two_overlapping_pages_grouped() {
        let plan = plan_merge(&[range(0, 10, 30), range(1, 20, 40)]);
        assert_eq!(plan.groups, vec![vec![0, 1]]);
    }

    #[test]
    fn test_disjoint_pages_fall_back_to_one_group() {
        // No two pages overlap: degenerate plan, all pages one group,
        // ordered by range.
        let plan = plan_merge(&[range(0, 100, 110), range(1, 0, 10), range(2, 50, 60)]);
        assert_eq!(plan.groups, vec![vec![1, 2, 0]]);
    }

    #[test]
    fn test_transitive_overlap_chains() {
        // 0 overlaps 1, 1 overlaps 2, 0 and 2 disjoint: one group.
        let plan = plan_merge(&[
            range(0, 0, 10),
            range(1, 8, 20),
            range(2, 18, 30),
            range(3, 100, 110),
            range(4, 105, 120),
        ]);
        assert_eq!(plan.groups, vec![vec![0, 1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_groups_ordered_by_key_not_page() {
        // Later pages hold earlier keys; group order follows keys.
        let plan = plan_merge(&[
            range(0, 1000, 1100),
            range(1, 1050, 1200),
            range(2, 0, 100),
            range(3, 50, 90),
        ]);
        assert_eq!(plan.groups, vec![vec![2, 3], vec![0, 1]]);
    }

    #[test]
    fn test_identical_ranges_one_group() {
        let plan = plan_merge(&[range(0, 5, 5), range(1, 5, 5), range(2, 5, 5)]);
        assert_eq!(plan.groups, vec![vec![0, 1, 2]]);
        assert_eq!(plan.widest_group(), 3);
    }

    #[test]
    fn test_contained_interval_grouped() {
        let plan = plan_merge(&[range(0, 0, 100), range(1, 40, 60)]);
        assert_eq!(plan.groups, vec![vec![0, 1]]);
    }
}

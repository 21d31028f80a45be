//! Sort engine: local per-page sort, merge planning, k-way merge.
//!
//! The engine restores global order over a file whose pages are each
//! internally sorted. Page key ranges feed an interval tree; pages
//! with overlapping ranges form merge groups; each group is k-way
//! merged with memory bounded by the group width, not the file size.

pub mod interval_tree;
pub mod local;
pub mod merge;
pub mod plan;

pub use interval_tree::{Interval, IntervalTree};
pub use local::{is_sorted_run, sort_page_slots};
pub use merge::merge_group;
pub use plan::{plan_merge, MergePlan, PageRange};

//! Entity queries: mask/DIS/lifecycle filtering and iteration.

use std::time::Instant;

use super::entity::{Entity, EntityHeader, Lifecycle};
use super::entity_index::EntityIndex;
use super::mask::BitMask256;

fn lifecycle_slot(l: Lifecycle) -> usize {
    l as u8 as usize
}

/// Builds an [`EntityQuery`] from include/exclude component masks, an
/// optional DIS-type filter, and a lifecycle-stage filter.
#[derive(Clone)]
pub struct QueryBuilder {
    include: BitMask256,
    exclude: BitMask256,
    dis_value: u64,
    dis_mask: u64,
    lifecycle_include: [bool; 3],
}

impl Default for QueryBuilder {
    fn default() -> Self {
        let mut lifecycle_include = [false; 3];
        lifecycle_include[lifecycle_slot(Lifecycle::Active)] = true;
        Self {
            include: BitMask256::EMPTY,
            exclude: BitMask256::EMPTY,
            dis_value: 0,
            dis_mask: 0,
            lifecycle_include,
        }
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require every bit in `mask` to be present in the entity's component
    /// mask.
    pub fn include(mut self, mask: BitMask256) -> Self {
        self.include = self.include.union(&mask);
        self
    }

    /// Reject entities with any bit in `mask` set.
    pub fn exclude(mut self, mask: BitMask256) -> Self {
        self.exclude = self.exclude.union(&mask);
        self
    }

    /// Require `dis_type & mask == value & mask`.
    pub fn dis_filter(mut self, value: u64, mask: u64) -> Self {
        self.dis_value = value;
        self.dis_mask = mask;
        self
    }

    /// Include or exclude a lifecycle stage from the result set. By
    /// default only [`Lifecycle::Active`] is included.
    pub fn lifecycle(mut self, stage: Lifecycle, included: bool) -> Self {
        self.lifecycle_include[lifecycle_slot(stage)] = included;
        self
    }

    pub fn build(self) -> EntityQuery {
        EntityQuery {
            include: self.include,
            exclude: self.exclude,
            dis_value: self.dis_value,
            dis_mask: self.dis_mask,
            lifecycle_include: self.lifecycle_include,
        }
    }
}

/// An immutable, reusable filter over entity headers.
#[derive(Clone)]
pub struct EntityQuery {
    include: BitMask256,
    exclude: BitMask256,
    dis_value: u64,
    dis_mask: u64,
    lifecycle_include: [bool; 3],
}

impl EntityQuery {
    pub fn matches(&self, header: &EntityHeader) -> bool {
        if !self.lifecycle_include[lifecycle_slot(header.lifecycle)] {
            return false;
        }
        if !BitMask256::matches(&header.component_mask, &self.include, &self.exclude) {
            return false;
        }
        if self.dis_mask != 0 && !header.dis_type.masked_eq(self.dis_value, self.dis_mask) {
            return false;
        }
        true
    }

    /// Visit every matching entity, in slot-index order.
    pub fn for_each(&self, index: &EntityIndex, mut f: impl FnMut(Entity)) {
        let max_index = index.max_issued_index();
        if max_index < 0 {
            return;
        }
        for i in 0..=max_index as i32 {
            if let Ok(header) = index.read_header_at(i) {
                if self.matches(&header) {
                    f(Entity { index: i, generation: header.generation });
                }
            }
        }
    }

    /// Visit matching entities a whole header chunk at a time, skipping
    /// chunks that are not committed (and so hold no live entities) without
    /// reading any row.
    pub fn for_each_chunked(&self, index: &EntityIndex, mut f: impl FnMut(Entity)) {
        let headers = index.headers();
        let entities_per_chunk = index.entities_per_chunk();
        let max_index = index.max_issued_index();
        if max_index < 0 {
            return;
        }
        let last_chunk = (max_index as usize) / entities_per_chunk;
        for chunk_idx in 0..=last_chunk {
            if !headers.is_committed(chunk_idx) {
                continue;
            }
            let Ok(guard) = headers.get_ro(chunk_idx) else { continue };
            for (offset, header) in guard.rows().iter().enumerate() {
                let global = chunk_idx * entities_per_chunk + offset;
                if global > max_index as usize {
                    break;
                }
                if self.matches(header) {
                    f(Entity { index: global as i32, generation: header.generation });
                }
            }
        }
    }
}

/// A time/entity budget for one call to [`run_time_sliced`]. A negative
/// value in either field causes the call to make zero progress: the
/// budget trips immediately and the cursor is reported incomplete.
#[derive(Clone, Copy, Debug)]
pub struct QueryBudget {
    pub max_entities: i64,
    pub max_wall_clock_ms: i64,
}

/// Resumable state for a time-sliced scan. Reusing the same cursor across
/// calls to [`run_time_sliced`] continues where the previous call left off.
#[derive(Clone, Copy, Debug)]
pub struct QueryCursor {
    next_index: i32,
    complete: bool,
}

impl Default for QueryCursor {
    fn default() -> Self {
        Self { next_index: 0, complete: false }
    }
}

impl QueryCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the scan has visited every issued slot index.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Reset to scan from the beginning again.
    pub fn reset(&mut self) {
        self.next_index = 0;
        self.complete = false;
    }
}

const WALL_CLOCK_CHECK_INTERVAL: i64 = 64;

impl EntityQuery {
    /// Resume a time-sliced scan from `cursor`, visiting at most
    /// `budget.max_entities` slots (checked every iteration) and stopping
    /// once `budget.max_wall_clock_ms` has elapsed (checked every
    /// [`WALL_CLOCK_CHECK_INTERVAL`] slots visited, to keep the clock read
    /// off the hot path).
    pub fn run_time_sliced(
        &self,
        index: &EntityIndex,
        cursor: &mut QueryCursor,
        budget: QueryBudget,
        mut f: impl FnMut(Entity),
    ) {
        if cursor.complete {
            cursor.reset();
        }
        let start = Instant::now();
        let max_index = index.max_issued_index();
        if max_index < 0 {
            cursor.complete = true;
            return;
        }
        let mut visited: i64 = 0;
        while (cursor.next_index as i64) <= max_index {
            let i = cursor.next_index;
            cursor.next_index += 1;
            if let Ok(header) = index.read_header_at(i) {
                if self.matches(&header) {
                    f(Entity { index: i, generation: header.generation });
                }
            }
            visited += 1;
            if visited >= budget.max_entities {
                return;
            }
            if (visited == 1 || visited % WALL_CLOCK_CHECK_INTERVAL == 0)
                && start.elapsed().as_millis() as i64 >= budget.max_wall_clock_ms
            {
                return;
            }
        }
        cursor.complete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_index_with(n: usize) -> EntityIndex {
        let idx = EntityIndex::new(n.max(64), 256);
        for _ in 0..n {
            idx.create(0).unwrap();
        }
        idx
    }

    #[test]
    fn default_query_matches_only_active() {
        let idx = make_index_with(3);
        let q = QueryBuilder::new().build();
        let mut seen = Vec::new();
        q.for_each(&idx, |e| seen.push(e.index));
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn exclude_filters_teardown_if_requested_in() {
        let idx = make_index_with(2);
        let e0 = Entity { index: 0, generation: 0 };
        idx.destroy(e0, 0).unwrap();

        let q = QueryBuilder::new().build();
        let mut seen = Vec::new();
        q.for_each(&idx, |e| seen.push(e.index));
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn include_mask_filters_by_component() {
        let idx = make_index_with(2);
        idx.with_header_mut(Entity { index: 0, generation: 0 }, 0, |h| h.component_mask.set_bit(5))
            .unwrap();

        let mut include = BitMask256::EMPTY;
        include.set_bit(5);
        let q = QueryBuilder::new().include(include).build();
        let mut seen = Vec::new();
        q.for_each(&idx, |e| seen.push(e.index));
        assert_eq!(seen, vec![0]);
    }

    #[test]
    fn for_each_chunked_matches_for_each() {
        let idx = make_index_with(5);
        let q = QueryBuilder::new().build();
        let mut a = Vec::new();
        q.for_each(&idx, |e| a.push(e.index));
        let mut b = Vec::new();
        q.for_each_chunked(&idx, |e| b.push(e.index));
        assert_eq!(a, b);
    }

    #[test]
    fn negative_budget_stops_after_one_action() {
        let idx = make_index_with(5);
        let q = QueryBuilder::new().build();
        let mut cursor = QueryCursor::new();
        let mut count = 0;
        q.run_time_sliced(
            &idx,
            &mut cursor,
            QueryBudget { max_entities: -1, max_wall_clock_ms: 1000 },
            |_| count += 1,
        );
        assert_eq!(count, 1);
        assert!(!cursor.is_complete());
    }

    #[test]
    fn negative_wall_clock_budget_stops_after_one_action() {
        let idx = make_index_with(5);
        let q = QueryBuilder::new().build();
        let mut cursor = QueryCursor::new();
        let mut count = 0;
        q.run_time_sliced(
            &idx,
            &mut cursor,
            QueryBudget { max_entities: 1000, max_wall_clock_ms: -1 },
            |_| count += 1,
        );
        assert_eq!(count, 1);
        assert!(!cursor.is_complete());
    }

    #[test]
    fn completed_cursor_resets_on_reentry() {
        let idx = make_index_with(3);
        let q = QueryBuilder::new().build();
        let mut cursor = QueryCursor::new();
        let mut first = Vec::new();
        q.run_time_sliced(
            &idx,
            &mut cursor,
            QueryBudget { max_entities: 1000, max_wall_clock_ms: 10_000 },
            |e| first.push(e.index),
        );
        assert!(cursor.is_complete());

        let mut second = Vec::new();
        q.run_time_sliced(
            &idx,
            &mut cursor,
            QueryBudget { max_entities: 1000, max_wall_clock_ms: 10_000 },
            |e| second.push(e.index),
        );
        assert_eq!(first, second);
        assert!(cursor.is_complete());
    }

    #[test]
    fn time_sliced_scan_resumes_across_calls() {
        let idx = make_index_with(10);
        let q = QueryBuilder::new().build();
        let mut cursor = QueryCursor::new();
        let mut total = Vec::new();
        loop {
            let mut batch = Vec::new();
            q.run_time_sliced(
                &idx,
                &mut cursor,
                QueryBudget { max_entities: 3, max_wall_clock_ms: 10_000 },
                |e| batch.push(e.index),
            );
            total.extend(batch);
            if cursor.is_complete() {
                break;
            }
        }
        assert_eq!(total, (0..10).collect::<Vec<_>>());
    }
}

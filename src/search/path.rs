//! Candidate lens positions visited by the adaptive-range search.
//!
//! The path is an ordered vector; neighbours are plain index arithmetic.
//! The buffer is owned by the search context and reused between cycles.

use crate::errors::AfError;

/// One lens position on the search path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePosition {
    pub index: usize,
    pub pos: i32,
    /// Measured sharpness; 0 means not measured yet.
    pub sharpness: f32,
    /// Normalised delta to the predecessor: `(cur - prev) / (cur + prev)`.
    pub d_sharpness: f32,
}

impl CandidatePosition {
    pub fn new(index: usize, pos: i32, sharpness: f32) -> Self {
        Self {
            index,
            pos,
            sharpness,
            d_sharpness: 0.0,
        }
    }

    pub fn is_measured(&self) -> bool {
        self.sharpness != 0.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    nodes: Vec<CandidatePosition>,
    cur: Option<usize>,
    best: Option<usize>,
    /// Fine refinements performed in the current cycle.
    refinements: u32,
}

impl SearchPath {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.cur = None;
        self.best = None;
        self.refinements = 0;
    }

    pub fn nodes(&self) -> &[CandidatePosition] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &CandidatePosition {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut CandidatePosition {
        &mut self.nodes[index]
    }

    pub fn prev(&self, index: usize) -> Option<usize> {
        index.checked_sub(1)
    }

    pub fn next(&self, index: usize) -> Option<usize> {
        let next = index + 1;
        (next < self.nodes.len()).then_some(next)
    }

    /// Node whose measurement is pending or just completed.
    pub fn cur(&self) -> Option<usize> {
        self.cur
    }

    pub fn set_cur(&mut self, index: usize) {
        self.cur = Some(index);
    }

    /// Node holding the best sharpness of the cycle.
    pub fn best(&self) -> Option<usize> {
        self.best
    }

    pub fn set_best(&mut self, index: usize) {
        self.best = Some(index);
    }

    pub fn refinements(&self) -> u32 {
        self.refinements
    }

    pub fn first_unmeasured(&self) -> Option<usize> {
        self.nodes.iter().position(|node| !node.is_measured())
    }

    pub fn position_of(&self, pos: i32) -> Option<usize> {
        self.nodes.iter().position(|node| node.pos == pos)
    }

    /// Replace the path with `(pos, sharpness)` pairs, keeping the buffer.
    ///
    /// Fails with [`AfError::OutOfMemory`] when the buffer cannot grow.
    pub fn rebuild<I>(&mut self, points: I) -> Result<(), AfError>
    where
        I: ExactSizeIterator<Item = (i32, f32)>,
    {
        self.nodes.clear();
        self.nodes
            .try_reserve(points.len())
            .map_err(|e| AfError::OutOfMemory(format!("search path: {}", e)))?;
        self.nodes.extend(
            points
                .enumerate()
                .map(|(index, (pos, sharpness))| CandidatePosition::new(index, pos, sharpness)),
        );
        self.cur = None;
        self.best = None;
        Ok(())
    }

    /// Swap in a fine sub-path and count the refinement.
    pub fn refine<I>(&mut self, points: I) -> Result<(), AfError>
    where
        I: ExactSizeIterator<Item = (i32, f32)>,
    {
        let refinements = self.refinements;
        self.rebuild(points)?;
        self.refinements = refinements + 1;
        Ok(())
    }

    pub fn log_dump(&self, lens_pos: i32) {
        log::debug!(
            "search path (refinement {}, lens at {}):",
            self.refinements,
            lens_pos
        );
        for (i, node) in self.nodes.iter().enumerate() {
            let marker = if Some(i) == self.cur { "->" } else { "  " };
            log::debug!(
                "  {}index: {}  pos: {}  sharpness: {}",
                marker,
                node.index,
                node.pos,
                node.sharpness
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuild_indexes_nodes() {
        let mut path = SearchPath::with_capacity(10);
        path.rebuild([(100, 0.0), (50, 7.0), (0, 0.0)].into_iter())
            .unwrap();

        assert_eq!(path.len(), 3);
        assert_eq!(path.node(1).index, 1);
        assert_eq!(path.prev(0), None);
        assert_eq!(path.next(2), None);
        assert_eq!(path.next(0), Some(1));
        assert_eq!(path.first_unmeasured(), Some(0));
        assert_eq!(path.position_of(50), Some(1));
        assert_eq!(path.cur(), None);
    }

    #[test]
    fn test_refine_counts_and_clear_resets() {
        let mut path = SearchPath::default();
        path.rebuild([(10, 1.0)].into_iter()).unwrap();
        path.refine([(12, 0.0), (10, 1.0)].into_iter()).unwrap();
        assert_eq!(path.refinements(), 1);
        assert_eq!(path.len(), 2);

        path.clear();
        assert!(path.is_empty());
        assert_eq!(path.refinements(), 0);
    }
}

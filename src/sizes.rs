//! # Message Size Sweep
//!
//! Generates the ordered list of message sizes both processes iterate over.
//! The list is a short linear region followed by a geometric region, sorted
//! and deduplicated. Generation is pure, so the initiator and the target
//! derive the same sequence without ever exchanging it.

use crate::defaults;

/// Parameters of the size sweep
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeSweep {
    /// First size of the linear region
    pub min_size: usize,
    /// Last size of the linear region (inclusive)
    pub linear_end: usize,
    /// First size of the geometric region
    pub geometric_start: usize,
    /// Factor between consecutive geometric sizes
    pub multiplier: usize,
    /// No geometric size exceeds this bound
    pub upper_bound: usize,
}

impl Default for SizeSweep {
    fn default() -> Self {
        Self {
            min_size: defaults::MIN_SIZE,
            linear_end: defaults::LINEAR_END,
            geometric_start: defaults::GEOMETRIC_START,
            multiplier: defaults::GEOMETRIC_MULTIPLIER,
            upper_bound: defaults::UPPER_BOUND,
        }
    }
}

impl SizeSweep {
    /// Same sweep with a different upper bound
    pub fn with_upper_bound(self, upper_bound: usize) -> Self {
        Self {
            upper_bound,
            ..self
        }
    }

    /// Produce the size sequence
    pub fn generate(&self) -> SizeSequence {
        let min = self.min_size.max(1);
        let mut sizes: Vec<usize> = (min..=self.linear_end).collect();

        let mut size = self.geometric_start;
        while size > 0 && size <= self.upper_bound {
            sizes.push(size);
            match size.checked_mul(self.multiplier) {
                Some(next) if next > size => size = next,
                _ => break,
            }
        }

        sizes.sort_unstable();
        sizes.dedup();
        SizeSequence(sizes)
    }
}

/// Strictly increasing, duplicate-free list of positive byte counts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SizeSequence(Vec<usize>);

impl SizeSequence {
    /// Largest size, which is also the size of the per-process buffer
    pub fn max(&self) -> Option<usize> {
        self.0.last().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sweep_contents() {
        let sizes = SizeSweep::default().generate();

        assert_eq!(&sizes.as_slice()[..5], &[1, 2, 4, 8, 16]);
        assert!(!sizes.as_slice().contains(&3));
        assert!(!sizes.as_slice().contains(&6));
        assert_eq!(sizes.max(), Some(67_108_864));
        // 1 plus every power of two from 2^1 to 2^26
        assert_eq!(sizes.len(), 27);
    }

    #[test]
    fn test_sweep_is_strictly_increasing() {
        let sizes = SizeSweep::default().generate();
        assert!(sizes.as_slice().windows(2).all(|w| w[0] < w[1]));
        assert!(sizes.iter().all(|s| s > 0));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let sweep = SizeSweep::default();
        assert_eq!(sweep.generate(), sweep.generate());
    }

    #[test]
    fn test_upper_bound_is_inclusive() {
        let sizes = SizeSweep::default().with_upper_bound(1024).generate();
        assert_eq!(sizes.max(), Some(1024));

        let sizes = SizeSweep::default().with_upper_bound(1023).generate();
        assert_eq!(sizes.max(), Some(512));
    }

    #[test]
    fn test_linear_region_survives_small_bound() {
        let sizes = SizeSweep::default().with_upper_bound(1).generate();
        assert_eq!(sizes.as_slice(), &[1, 2]);
    }

    #[test]
    fn test_wider_linear_region_merges_with_geometric() {
        let sweep = SizeSweep {
            min_size: 1,
            linear_end: 8,
            geometric_start: 4,
            multiplier: 4,
            upper_bound: 256,
        };
        assert_eq!(
            sweep.generate().as_slice(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 16, 64, 256]
        );
    }

    #[test]
    fn test_degenerate_multiplier_terminates() {
        let sweep = SizeSweep {
            multiplier: 1,
            ..SizeSweep::default()
        };
        assert_eq!(sweep.generate().as_slice(), &[1, 2]);
    }
}

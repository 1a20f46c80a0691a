//! Ordinal and slice resolution for random access

use contracts::{Result, ScanError, SliceSpec};

/// Resolve a possibly negative ordinal against `len`
pub fn resolve_index(index: isize, len: usize) -> Result<usize> {
    let n = len as isize;
    let resolved = if index < 0 { index + n } else { index };
    if (0..n).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        Err(ScanError::OutOfRange { index, len })
    }
}

/// Ordinals selected by a slice, in selection order
///
/// Negative bounds count from the end and out-of-range bounds are clamped.
/// A negative step walks backwards.
pub fn slice_indices(slice: SliceSpec, len: usize) -> Result<Vec<usize>> {
    let step = slice.step.unwrap_or(1);
    if step == 0 {
        return Err(ScanError::config_validation("slice.step", "must not be zero"));
    }
    let n = len as isize;

    // `lower` is where a bound clamps when it falls before the sequence
    let clamp = |bound: isize, lower: isize, upper: isize| {
        let b = if bound < 0 { bound + n } else { bound };
        b.clamp(lower, upper)
    };

    let (mut i, stop) = if step > 0 {
        (
            slice.start.map_or(0, |s| clamp(s, 0, n)),
            slice.stop.map_or(n, |s| clamp(s, 0, n)),
        )
    } else {
        (
            slice.start.map_or(n - 1, |s| clamp(s, -1, n - 1)),
            slice.stop.map_or(-1, |s| clamp(s, -1, n - 1)),
        )
    };

    let mut out = Vec::new();
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(start: Option<isize>, stop: Option<isize>, step: Option<isize>) -> SliceSpec {
        SliceSpec { start, stop, step }
    }

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(0, 3).unwrap(), 0);
        assert_eq!(resolve_index(-1, 3).unwrap(), 2);
        assert_eq!(resolve_index(-3, 3).unwrap(), 0);
        assert!(matches!(
            resolve_index(3, 3),
            Err(ScanError::OutOfRange { index: 3, len: 3 })
        ));
        assert!(resolve_index(-4, 3).is_err());
        assert!(resolve_index(0, 0).is_err());
    }

    #[test]
    fn test_forward_slices() {
        assert_eq!(slice_indices(SliceSpec::range(2, 2), 5).unwrap(), Vec::<usize>::new());
        assert_eq!(slice_indices(SliceSpec::range(1, 4), 5).unwrap(), vec![1, 2, 3]);
        assert_eq!(slice_indices(s(None, None, Some(2)), 5).unwrap(), vec![0, 2, 4]);
        assert_eq!(slice_indices(s(Some(-2), None, None), 5).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(s(Some(-10), Some(10), None), 3).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_reverse_slices() {
        assert_eq!(slice_indices(s(None, None, Some(-1)), 4).unwrap(), vec![3, 2, 1, 0]);
        assert_eq!(slice_indices(s(Some(3), Some(0), Some(-2)), 5).unwrap(), vec![3, 1]);
        assert_eq!(slice_indices(s(Some(10), Some(-10), Some(-1)), 2).unwrap(), vec![1, 0]);
        assert!(slice_indices(s(None, None, Some(-1)), 0).unwrap().is_empty());
    }

    #[test]
    fn test_zero_step_rejected() {
        let err = slice_indices(s(None, None, Some(0)), 5).unwrap_err();
        assert!(matches!(err, ScanError::ConfigValidation { .. }));
    }
}

//! Fragment identifier sets.
//!
//! A [`FragmentIdSet`] is a compact, ordered set of 1-based fragment-relative indices.
//! It is persisted in the [`Datacube`](crate::datacube::Datacube) record as a comma-separated
//! list of runs, each run either a bare integer or `start:end` (inclusive).
//! Runs are kept sorted and minimally merged, so encoding is canonical:
//! parsing a valid string and re-encoding it yields its minimal merged form.

use std::str::FromStr;

use itertools::Itertools;
use thiserror::Error;

/// An ordered set of 1-based fragment-relative indices.
///
/// Stored as sorted, non-overlapping, non-adjacent inclusive runs.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct FragmentIdSet {
    runs: Vec<(u64, u64)>,
}

/// A malformed fragment id set error.
#[derive(Clone, Debug, Error)]
#[error("malformed fragment id set {_0:?}")]
pub struct MalformedSetError(String);

/// An out of range error.
///
/// Raised when a slice of logical positions `[start, start + count)` exceeds the set size.
#[derive(Copy, Clone, Debug, Error)]
#[error("positions [{_0}, {_0} + {_1}) are out of range for a set of {_2} indices")]
pub struct OutOfRangeError(u64, u64, u64);

impl FragmentIdSet {
    /// Create a fragment id set representing the single contiguous run `[first, first + count - 1]`.
    ///
    /// An empty set is returned if `count` is zero.
    #[must_use]
    pub fn from_range(first: u64, count: u64) -> Self {
        debug_assert!(first >= 1);
        if count == 0 {
            Self::default()
        } else {
            Self {
                runs: vec![(first, first + count - 1)],
            }
        }
    }

    /// Create a fragment id set from arbitrary indices.
    ///
    /// Indices are sorted, deduplicated, and merged into minimal runs.
    pub fn from_indices(indices: impl IntoIterator<Item = u64>) -> Self {
        let mut indices: Vec<u64> = indices.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        let mut runs: Vec<(u64, u64)> = Vec::new();
        for index in indices {
            match runs.last_mut() {
                Some((_, end)) if index == *end + 1 => *end = index,
                _ => runs.push((index, index)),
            }
        }
        Self { runs }
    }

    /// Return the number of indices represented.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.runs.iter().map(|(start, end)| end - start + 1).sum()
    }

    /// Returns true if the set contains no indices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Extract the logical positions `[start_offset, start_offset + count)` (0-based) from the
    /// ordered union of all runs, re-encoded as a minimal range list.
    ///
    /// # Errors
    /// Returns [`OutOfRangeError`] if `start_offset + count` exceeds [`count`](Self::count).
    pub fn slice(&self, start_offset: u64, count: u64) -> Result<Self, OutOfRangeError> {
        let total = self.count();
        let out_of_range = start_offset
            .checked_add(count)
            .map_or(true, |end| end > total);
        if out_of_range {
            return Err(OutOfRangeError(start_offset, count, total));
        }

        let mut runs = Vec::new();
        let mut skip = start_offset;
        let mut take = count;
        for &(start, end) in &self.runs {
            if take == 0 {
                break;
            }
            let run_len = end - start + 1;
            if skip >= run_len {
                skip -= run_len;
                continue;
            }
            let first = start + skip;
            let taken = std::cmp::min(take, end - first + 1);
            runs.push((first, first + taken - 1));
            skip = 0;
            take -= taken;
        }
        Ok(Self { runs })
    }

    /// Return an iterator over the member indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.runs.iter().flat_map(|&(start, end)| start..=end)
    }

    fn normalise(mut runs: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
        runs.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(runs.len());
        for (start, end) in runs {
            match merged.last_mut() {
                // adjacent or overlapping runs collapse
                Some((_, last_end)) if start <= *last_end + 1 => {
                    *last_end = std::cmp::max(*last_end, end);
                }
                _ => merged.push((start, end)),
            }
        }
        merged
    }
}

impl FromStr for FragmentIdSet {
    type Err = MalformedSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let malformed = || MalformedSetError(s.to_string());
        let mut runs = Vec::new();
        for run in s.split(',') {
            let (start, end) = match run.split_once(':') {
                Some((start, end)) => (
                    start.parse::<u64>().map_err(|_| malformed())?,
                    end.parse::<u64>().map_err(|_| malformed())?,
                ),
                None => {
                    let index = run.parse::<u64>().map_err(|_| malformed())?;
                    (index, index)
                }
            };
            if start == 0 || end < start {
                return Err(malformed());
            }
            runs.push((start, end));
        }
        Ok(Self {
            runs: Self::normalise(runs),
        })
    }
}

impl std::fmt::Display for FragmentIdSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.runs
                .iter()
                .map(|&(start, end)| if start == end {
                    start.to_string()
                } else {
                    format!("{start}:{end}")
                })
                .join(",")
        )
    }
}

impl serde::Serialize for FragmentIdSet {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for FragmentIdSet {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for s in ["1", "1:10", "1,3,5", "1:4,6,9:12", ""] {
            let set = FragmentIdSet::from_str(s).unwrap();
            assert_eq!(set.to_string(), s);
            assert_eq!(FragmentIdSet::from_str(&set.to_string()).unwrap(), set);
        }
    }

    #[test]
    fn minimal_merge() {
        assert_eq!(
            FragmentIdSet::from_str("1:3,4:6").unwrap().to_string(),
            "1:6"
        );
        assert_eq!(
            FragmentIdSet::from_str("4:6,1:3").unwrap().to_string(),
            "1:6"
        );
        assert_eq!(
            FragmentIdSet::from_str("1:5,2:3,7").unwrap().to_string(),
            "1:5,7"
        );
        assert_eq!(FragmentIdSet::from_str("2,3,4").unwrap().to_string(), "2:4");
    }

    #[test]
    fn count() {
        assert_eq!(FragmentIdSet::from_str("1:10").unwrap().count(), 10);
        assert_eq!(FragmentIdSet::from_str("1:4,6,9:12").unwrap().count(), 9);
        assert_eq!(FragmentIdSet::default().count(), 0);
    }

    #[test]
    fn from_range() {
        assert_eq!(FragmentIdSet::from_range(5, 4).to_string(), "5:8");
        assert_eq!(FragmentIdSet::from_range(7, 1).to_string(), "7");
        assert!(FragmentIdSet::from_range(1, 0).is_empty());
    }

    #[test]
    fn from_indices() {
        let set = FragmentIdSet::from_indices([9, 1, 2, 3, 2, 12, 10, 11]);
        assert_eq!(set.to_string(), "1:3,9:12");
    }

    #[test]
    fn slice() {
        let set = FragmentIdSet::from_str("1:4,6,9:12").unwrap();
        assert_eq!(set.slice(0, 9).unwrap(), set);
        assert_eq!(set.slice(0, 4).unwrap().to_string(), "1:4");
        assert_eq!(set.slice(2, 4).unwrap().to_string(), "3:4,6,9");
        assert_eq!(set.slice(4, 5).unwrap().to_string(), "6,9:12");
        assert_eq!(set.slice(5, 4).unwrap().to_string(), "9:12");
        assert_eq!(set.slice(9, 0).unwrap(), FragmentIdSet::default());
        assert!(set.slice(5, 5).is_err());
        assert!(set.slice(10, 1).is_err());
        // offsets that would wrap are out of range, not empty
        assert!(set.slice(u64::MAX, 2).is_err());
        assert!(set.slice(2, u64::MAX).is_err());
    }

    #[test]
    fn iter() {
        let set = FragmentIdSet::from_str("1:3,7").unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2, 3, 7]);
    }

    #[test]
    fn malformed() {
        for s in ["a", "1:", ":2", "3:1", "0", "0:2", "1,,2", "1;2", "1:2:3"] {
            assert!(FragmentIdSet::from_str(s).is_err(), "{s}");
        }
    }

    #[test]
    fn serde_string_form() {
        let set = FragmentIdSet::from_str("1:4,6").unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "\"1:4,6\"");
        let back: FragmentIdSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}

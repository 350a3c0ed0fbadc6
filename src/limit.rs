//! Per-channel threshold evaluation.
use serde::{Deserialize, Serialize};

/// Acceptance region of a raw sample relative to the channel thresholds. Bounds
/// are inclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitRange {
    #[default]
    Always,
    Between,
    NotBetween,
    OverHigh,
    NotOverHigh,
    UnderLow,
    NotUnderLow,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub range: LimitRange,
    pub low: u16,
    pub high: u16,
}

impl Limit {
    /// Whether `sample` lies in the accepted region.
    pub fn accepts(&self, sample: u16) -> bool {
        let (low, high) = (self.low, self.high);
        match self.range {
            LimitRange::Always => true,
            LimitRange::Between => (low..=high).contains(&sample),
            LimitRange::NotBetween => !(low..=high).contains(&sample),
            LimitRange::OverHigh => sample >= high,
            LimitRange::NotOverHigh => sample <= high,
            LimitRange::UnderLow => sample <= low,
            LimitRange::NotUnderLow => sample >= low,
        }
    }
}

/// Check a sample against an optional channel limit. Channels without a limit
/// always pass.
pub fn check(limit: Option<&Limit>, sample: u16) -> bool {
    limit.map_or(true, |limit| limit.accepts(sample))
}

#[cfg(test)]
mod test {
    use super::*;

    fn limit(range: LimitRange) -> Limit {
        Limit {
            range,
            low: 100,
            high: 200,
        }
    }

    #[test]
    fn ranges() {
        let cases = [
            (LimitRange::Always, [true, true, true, true, true]),
            (LimitRange::Between, [false, true, true, true, false]),
            (LimitRange::NotBetween, [true, false, false, false, true]),
            (LimitRange::OverHigh, [false, false, false, true, true]),
            (LimitRange::NotOverHigh, [true, true, true, true, false]),
            (LimitRange::UnderLow, [true, true, false, false, false]),
            (LimitRange::NotUnderLow, [false, true, true, true, true]),
        ];
        for (range, expect) in cases {
            let limit = limit(range);
            let samples = [99, 100, 150, 200, 201];
            for (sample, pass) in samples.into_iter().zip(expect) {
                assert_eq!(limit.accepts(sample), pass, "{range:?} {sample}");
            }
        }
    }

    #[test]
    fn unlimited() {
        assert!(check(None, 0));
        assert!(!check(Some(&limit(LimitRange::Between)), 0));
    }
}

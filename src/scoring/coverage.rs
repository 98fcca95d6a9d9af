//! Load-time exhaustiveness check for threshold rules.
//!
//! The reachable score interval is bounded from the declared variable ranges
//! by interval arithmetic; the rules must cover every point of it. Only
//! half-line rules (`<`, `<=`, `>`, `>=`) take part, so coverage reduces to
//! comparing the widest lower rule with the widest upper rule.

use std::collections::HashMap;

use super::engine::logistic;
use super::rules::{Comparator, Condition};
use super::spec::{DerivedOp, FormulaSpec, Link};

/// Closed interval, possibly unbounded on either side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub lo: f64,
    pub hi: f64,
}

impl Interval {
    pub const UNIT: Interval = Interval { lo: 0.0, hi: 1.0 };

    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    fn scale(self, factor: f64) -> Self {
        if factor == 0.0 {
            return Interval::new(0.0, 0.0);
        }
        let a = self.lo * factor;
        let b = self.hi * factor;
        Interval::new(a.min(b), a.max(b))
    }

    fn add(self, other: Interval) -> Self {
        Interval::new(self.lo + other.lo, self.hi + other.hi)
    }
}

/// Range of the classified value (score, or probability for logistic models).
/// Returns `None` when a term cannot be resolved; structural validation
/// reports that separately.
pub fn classified_range(spec: &FormulaSpec) -> Option<Interval> {
    let mut terms: HashMap<&str, Interval> = spec
        .variables
        .iter()
        .map(|v| {
            let (lo, hi) = v.bounds();
            (v.name.as_str(), Interval::new(lo, hi))
        })
        .collect();

    for feature in &spec.derived {
        let inputs: Option<Vec<Interval>> = feature
            .inputs
            .iter()
            .map(|name| terms.get(name.as_str()).copied())
            .collect();
        let inputs = inputs?;
        let range = match feature.op {
            DerivedOp::Difference => {
                let (a, b) = (inputs.first()?, inputs.get(1)?);
                Interval::new(a.lo - b.hi, a.hi - b.lo)
            }
            DerivedOp::Min => Interval::new(
                inputs.iter().map(|i| i.lo).fold(f64::INFINITY, f64::min),
                inputs.iter().map(|i| i.hi).fold(f64::INFINITY, f64::min),
            ),
            DerivedOp::Max => Interval::new(
                inputs.iter().map(|i| i.lo).fold(f64::NEG_INFINITY, f64::max),
                inputs.iter().map(|i| i.hi).fold(f64::NEG_INFINITY, f64::max),
            ),
            DerivedOp::Indicator => Interval::UNIT,
            DerivedOp::Bmi => {
                let (weight, height) = (inputs.first()?, inputs.get(1)?);
                if weight.lo < 0.0 || height.lo <= 0.0 {
                    Interval::new(f64::NEG_INFINITY, f64::INFINITY)
                } else {
                    let h_hi = height.hi / 100.0;
                    let h_lo = height.lo / 100.0;
                    Interval::new(weight.lo / (h_hi * h_hi), weight.hi / (h_lo * h_lo))
                }
            }
        };
        terms.insert(feature.name.as_str(), range);
    }

    let mut score = Interval::new(spec.intercept, spec.intercept);
    for (name, weight) in &spec.coefficients {
        score = score.add(terms.get(name.as_str())?.scale(*weight));
    }

    Some(match spec.link {
        Link::Identity => score,
        Link::Logistic => Interval::new(logistic(score.lo), logistic(score.hi)),
    })
}

/// Lower end of the uncovered region: (value, open)
type Bound = (f64, bool);

/// Find a point of `range` that no rule covers. `None` means the rules are
/// exhaustive over the range.
pub fn find_gap(rules: &[Condition], range: Interval) -> Option<f64> {
    // Widest "value below cutoff" rule; ties prefer the inclusive one
    let below = rules
        .iter()
        .filter(|r| matches!(r.op, Comparator::LessThan | Comparator::LessEqual))
        .fold(None::<&Condition>, |best, r| match best {
            Some(b) if b.cutoff > r.cutoff || (b.cutoff == r.cutoff && b.op.is_inclusive()) => Some(b),
            _ => Some(r),
        });
    // Widest "value above cutoff" rule
    let above = rules
        .iter()
        .filter(|r| matches!(r.op, Comparator::GreaterThan | Comparator::GreaterEqual))
        .fold(None::<&Condition>, |best, r| match best {
            Some(b) if b.cutoff < r.cutoff || (b.cutoff == r.cutoff && b.op.is_inclusive()) => Some(b),
            _ => Some(r),
        });

    // Uncovered region is [start, end] intersected with the range
    let mut start: Bound = (range.lo, false);
    if let Some(r) = below {
        start = tighter_start(start, (r.cutoff, r.op.is_inclusive()));
    }
    let mut end: Bound = (range.hi, false);
    if let Some(r) = above {
        end = tighter_end(end, (r.cutoff, r.op.is_inclusive()));
    }

    let (lo, lo_open) = start;
    let (hi, hi_open) = end;
    if lo < hi {
        if lo.is_finite() && !lo_open {
            Some(lo)
        } else if hi.is_finite() && !hi_open {
            Some(hi)
        } else if lo.is_finite() && hi.is_finite() {
            Some((lo + hi) / 2.0)
        } else if lo.is_finite() {
            Some(lo + 1.0)
        } else if hi.is_finite() {
            Some(hi - 1.0)
        } else {
            Some(0.0)
        }
    } else if lo == hi && !lo_open && !hi_open && lo.is_finite() {
        Some(lo)
    } else {
        None
    }
}

fn tighter_start(a: Bound, b: Bound) -> Bound {
    if b.0 > a.0 {
        b
    } else if b.0 == a.0 {
        (a.0, a.1 || b.1)
    } else {
        a
    }
}

fn tighter_end(a: Bound, b: Bound) -> Bound {
    if b.0 < a.0 {
        b
    } else if b.0 == a.0 {
        (a.0, a.1 || b.1)
    } else {
        a
    }
}

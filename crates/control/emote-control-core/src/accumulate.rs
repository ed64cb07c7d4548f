//! Accumulation of per-parameter contributions.
//!
//! Primary clips contribute weighted absolute values; whatever weight is left
//! after all contributions goes to a fallback (the held pose). Differential
//! clips contribute pre-weighted deltas that are simply summed.

use hashbrown::HashMap;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Entry {
    sum: f32,
    w: f32,
}

/// Weighted-sum accumulator for absolute values.
#[derive(Clone, Debug, Default)]
pub struct Accumulator {
    entries: HashMap<String, Entry>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the accumulator, keeping its allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add(&mut self, name: &str, value: f32, weight: f32) {
        if weight <= 0.0 {
            return;
        }
        match self.entries.get_mut(name) {
            Some(e) => {
                e.sum += value * weight;
                e.w += weight;
            }
            None => {
                self.entries.insert(
                    name.to_string(),
                    Entry {
                        sum: value * weight,
                        w: weight,
                    },
                );
            }
        }
    }

    /// Total weight collected for `name`.
    pub fn weight(&self, name: &str) -> f32 {
        self.entries.get(name).map(|e| e.w).unwrap_or(0.0)
    }

    /// Resolve every entry as `sum + (1 - w) * fallback`, or `sum / w` once the
    /// weight reaches 1. Yields `(name, value, fully_weighted)`.
    pub fn resolve<'a, F>(&'a self, fallback: F) -> impl Iterator<Item = (&'a str, f32, bool)> + 'a
    where
        F: Fn(&str) -> Option<f32> + 'a,
    {
        self.entries.iter().map(move |(name, e)| {
            if e.w >= 1.0 - 1e-6 {
                (name.as_str(), e.sum / e.w, true)
            } else {
                let rest = fallback(name).unwrap_or(0.0);
                (name.as_str(), e.sum + (1.0 - e.w) * rest, false)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_weight_falls_back() {
        let mut acc = Accumulator::new();
        acc.add("a", 10.0, 0.25);
        acc.add("b", 4.0, 0.5);
        acc.add("b", 8.0, 0.5);
        acc.add("c", 1.0, 0.0);
        let mut out: Vec<(String, f32, bool)> = acc
            .resolve(|n| if n == "a" { Some(2.0) } else { None })
            .map(|(n, v, f)| (n.to_string(), v, f))
            .collect();
        out.sort_by(|x, y| x.0.cmp(&y.0));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], ("a".to_string(), 2.5 + 0.75 * 2.0, false));
        assert_eq!(out[1], ("b".to_string(), 6.0, true));
    }
}

use std::collections::HashMap;
use std::hash::Hash;

/// Occurrence counts that remember first-insertion order.
///
/// Ranking is by count, descending; equal counts keep the order in which the
/// values were first seen.
#[derive(Debug, Clone)]
pub struct FrequencyCounter<T> {
    index: HashMap<T, usize>,
    entries: Vec<(T, usize)>,
}

impl<T> Default for FrequencyCounter<T> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<T: Eq + Hash + Clone> FrequencyCounter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: T) {
        match self.index.get(&value) {
            Some(&slot) => self.entries[slot].1 += 1,
            None => {
                self.index.insert(value.clone(), self.entries.len());
                self.entries.push((value, 1));
            }
        }
    }

    pub fn count(&self, value: &T) -> usize {
        self.index
            .get(value)
            .map(|&slot| self.entries[slot].1)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&T, usize)> {
        self.entries.iter().map(|(value, count)| (value, *count))
    }

    /// Entries ranked by count; ties keep first-seen order.
    pub fn most_common(&self) -> Vec<(&T, usize)> {
        let mut ranked: Vec<(&T, usize)> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    pub fn top(&self) -> Option<&T> {
        self.most_common().first().map(|(value, _)| *value)
    }
}

impl<T: Eq + Hash + Clone> FromIterator<T> for FrequencyCounter<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut counter = Self::new();
        for value in iter {
            counter.add(value);
        }
        counter
    }
}

use std::collections::HashMap;

use crate::rescale::Rational;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// One elementary stream of a binding. `C` is the backend's codec
/// parameter type, carried through untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamDescriptor<C> {
    index: usize,
    parameters: C,
    time_base: Rational,
}

impl<C> StreamDescriptor<C> {
    pub fn new(index: usize, parameters: C, time_base: Rational) -> Self {
        Self {
            index,
            parameters,
            time_base,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parameters(&self) -> &C {
        &self.parameters
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub(crate) fn set_time_base(&mut self, time_base: Rational) {
        self.time_base = time_base;
    }
}

/// Input stream index -> output stream index, fixed once mirroring is done.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamIndexMap {
    routes: HashMap<usize, usize>,
}

impl StreamIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, input: usize, output: usize) {
        self.routes.insert(input, output);
    }

    pub fn get(&self, input: usize) -> Option<usize> {
        self.routes.get(&input).copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.routes.iter().map(|(i, o)| (*i, *o))
    }

    /// No two input streams share an output stream.
    pub fn is_bijective(&self) -> bool {
        let mut seen = std::collections::HashSet::with_capacity(self.routes.len());
        self.routes.values().all(|o| seen.insert(*o))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_map_lookup() {
        let mut map = StreamIndexMap::new();
        assert!(map.is_empty());
        map.insert(0, 0);
        map.insert(1, 1);
        assert_eq!(map.get(1), Some(1));
        assert_eq!(map.get(2), None);
        assert_eq!(map.len(), 2);
        assert!(map.is_bijective());
    }

    #[test]
    fn test_index_map_detects_shared_output() {
        let mut map = StreamIndexMap::new();
        map.insert(0, 0);
        map.insert(1, 0);
        assert!(!map.is_bijective());
    }
}

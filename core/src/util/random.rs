// Random selection backed by the operating system CSPRNG

use rand::rngs::OsRng;
use rand::seq::{IteratorRandom, SliceRandom};
use std::collections::HashSet;
use std::hash::Hash;

/// Pick one element, or `None` for an empty slice
pub fn random_element<T>(items: &[T]) -> Option<&T> {
    items.choose(&mut OsRng)
}

/// Pick one element of a set, or `None` for an empty set
pub fn random_from_set<T: Eq + Hash>(items: &HashSet<T>) -> Option<&T> {
    items.iter().choose(&mut OsRng)
}

/// Return the items in a uniformly random order
pub fn shuffled<T>(mut items: Vec<T>) -> Vec<T> {
    items.shuffle(&mut OsRng);
    items
}

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Picks an item with probability proportional to its weight.
pub fn weighted_choice<'a, T, R: Rng + ?Sized>(items: &'a [(T, u32)], rng: &mut R) -> Option<&'a T> {
    let dist = WeightedIndex::new(items.iter().map(|(_, w)| *w)).ok()?;
    items.get(dist.sample(rng)).map(|(item, _)| item)
}

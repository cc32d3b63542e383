use crate::common::*;

/// Randomly keeps at most `limit` items. The relative order is not preserved.
pub(crate) fn subsample<T>(items: Vec<T>, limit: usize, rng: &mut StdRng) -> Vec<T>
where
    T: Copy,
{
    if items.len() <= limit {
        items
    } else {
        items.choose_multiple(rng, limit).copied().collect()
    }
}

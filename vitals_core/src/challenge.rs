//! Ordering challenge used as a human-verification step.
//!
//! The user sees a shuffled checklist and may only move one item to the end
//! of the list at a time. The challenge passes when the list matches the
//! canonical order exactly.

use crate::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

/// Upper bound on reshuffles before falling back to a rotation
const MAX_SHUFFLES: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderingChallenge {
    canonical: Vec<String>,
    current: Vec<String>,
}

impl OrderingChallenge {
    /// Build a challenge with a random starting order that differs from canonical
    pub fn new(canonical: Vec<String>) -> Result<Self> {
        Self::with_rng(canonical, &mut rand::thread_rng())
    }

    /// Build a challenge shuffled with the given RNG
    pub fn with_rng<R: Rng + ?Sized>(canonical: Vec<String>, rng: &mut R) -> Result<Self> {
        check_items(&canonical)?;

        let mut current = canonical.clone();
        for _ in 0..MAX_SHUFFLES {
            current.shuffle(rng);
            if current != canonical {
                return Ok(Self { canonical, current });
            }
        }

        // Two-item lists hit the identity half of the time; a rotation is
        // never the identity for distinct items
        current = canonical.clone();
        current.rotate_left(1);
        Ok(Self { canonical, current })
    }

    /// Build a challenge from an explicit starting order
    pub fn with_order(canonical: Vec<String>, start: Vec<String>) -> Result<Self> {
        check_items(&canonical)?;

        let mut expected = canonical.clone();
        let mut given = start.clone();
        expected.sort();
        given.sort();
        if expected != given {
            return Err(Error::invalid(
                "starting order must be a permutation of the canonical items",
            ));
        }

        Ok(Self {
            canonical,
            current: start,
        })
    }

    /// Move the item at `index` to the end of the list
    pub fn move_to_end(&mut self, index: usize) -> Result<()> {
        if index >= self.current.len() {
            return Err(Error::invalid(format!(
                "item {} is out of range (list has {} items)",
                index + 1,
                self.current.len()
            )));
        }
        let item = self.current.remove(index);
        self.current.push(item);
        Ok(())
    }

    /// Exact element-wise comparison against the canonical order
    pub fn verify(&self) -> bool {
        self.current == self.canonical
    }

    pub fn current_order(&self) -> &[String] {
        &self.current
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

fn check_items(items: &[String]) -> Result<()> {
    if items.len() < 2 {
        return Err(Error::invalid("ordering challenge needs at least two items"));
    }
    let unique: HashSet<_> = items.iter().collect();
    if unique.len() != items.len() {
        return Err(Error::invalid("ordering challenge items must be distinct"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn checklist() -> Vec<String> {
        ["measure", "take", "drink", "record"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn permutations(items: &[String]) -> Vec<Vec<String>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_new_never_starts_solved() {
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let challenge = OrderingChallenge::with_rng(checklist(), &mut rng).unwrap();
            assert!(!challenge.verify(), "seed {} produced a solved challenge", seed);
        }

        let pair = vec!["a".to_string(), "b".to_string()];
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let challenge = OrderingChallenge::with_rng(pair.clone(), &mut rng).unwrap();
            assert_eq!(challenge.current_order(), &["b".to_string(), "a".to_string()]);
        }
    }

    #[test]
    fn test_exactly_one_of_24_permutations_verifies() {
        let all = permutations(&checklist());
        assert_eq!(all.len(), 24);

        let passing = all
            .into_iter()
            .filter(|order| {
                OrderingChallenge::with_order(checklist(), order.clone())
                    .unwrap()
                    .verify()
            })
            .count();
        assert_eq!(passing, 1);
    }

    #[test]
    fn test_move_to_end_solves_original_puzzle() {
        // Starting order from the login screen
        let start: Vec<String> = ["take", "record", "drink", "measure"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut challenge = OrderingChallenge::with_order(checklist(), start).unwrap();

        // take, record, drink go to the back, then record once more
        for index in [0, 0, 0, 2] {
            challenge.move_to_end(index).unwrap();
        }
        assert_eq!(challenge.current_order(), checklist().as_slice());
        assert!(challenge.verify());
    }

    #[test]
    fn test_moves_preserve_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut challenge = OrderingChallenge::with_rng(checklist(), &mut rng).unwrap();
        for step in 0..50 {
            challenge.move_to_end(step % 4).unwrap();
            let mut sorted = challenge.current_order().to_vec();
            sorted.sort();
            let mut expected = checklist();
            expected.sort();
            assert_eq!(sorted, expected);
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(OrderingChallenge::new(vec!["solo".into()]).is_err());
        assert!(OrderingChallenge::new(vec!["dup".into(), "dup".into()]).is_err());
        assert!(OrderingChallenge::with_order(
            checklist(),
            vec!["measure".into(), "take".into(), "drink".into(), "extra".into()]
        )
        .is_err());

        let mut challenge = OrderingChallenge::new(checklist()).unwrap();
        assert!(challenge.move_to_end(4).is_err());
    }
}

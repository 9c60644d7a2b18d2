//! # dice10001
//!
//! A small utility for analyzing the dice game "10001" : )
//!
//! ## Rules
//!
//! Each turn you roll six dice and must keep at least one scoring die (a 1, a
//! 5, three or more of a kind, a full straight, or three pairs). You may then
//! bank your turn total or re-roll the remaining dice. Rolling no scoring dice
//! at all ("bust") forfeits the whole turn. Scoring with every die on the board
//! gives you a fresh set of six dice.
//!
//! ## Explanation
//!
//! More specifically, this crate enumerates every possible roll for each dice
//! count, derives every legal way to score it, and collapses the rolls into a
//! small set of weighted "outcome classes". On top of those it runs two
//! memoized backward-induction searches:
//!
//! * [`search::EvSearch`] estimates the expected marginal gain of continuing to
//!   roll from a `(dice, score)` state when playing to maximize expected value.
//! * [`search::ReachSearch`] computes the exact probability of reaching a
//!   target score within a bounded number of rolls.

#[macro_use]
mod macros;

mod multiset;
pub mod cli;
pub mod dice;
pub mod outcome;
pub mod search;

use std::{
    cmp,
    collections::HashMap,
    fmt,
    ops::{Index, IndexMut},
};

/// A (turn) score or a number of points. Scores are unbounded in principle,
/// so this is wider than any single roll needs.
pub type Score = u32;

/// The number of ordered die sequences that collapse to a sorted roll.
pub type Weight = u32;

pub(crate) const NUM_FACES: u8 = 6;
pub(crate) const MAX_DICE: u8 = 6;

pub const DEFAULT_EV_DEPTH: u32 = 400;
pub const DEFAULT_TARGET: Score = 1000;
pub const DEFAULT_LIMIT: Score = 0;
pub const DEFAULT_MAX_TABLE_SCORE: Score = 1000;

/// The largest turn total the searches accept. Every search stops exploring
/// at or above this score, and adding one more roll's points to it still fits
/// in a [`Score`].
pub const MAX_SCORE: Score = 10_000_000;

/// The largest target [`search::ReachSearch`] accepts. The search recurses
/// once per roll, and every roll scores at least [`SCORE_STEP`], so this
/// bounds the recursion to `MAX_TARGET / SCORE_STEP + 1` frames.
pub const MAX_TARGET: Score = 20_000;

/// The largest look-ahead [`search::EvSearch`] accepts. The search recurses
/// once per roll, up to this many frames deep.
pub const MAX_EV_DEPTH: u32 = 1_000;

/// The smallest non-zero number of points a single roll can score (a lone 5).
pub const SCORE_STEP: Score = 50;

///////////
// Error //
///////////

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: dice count must be in the range [1, 6], got {0}")]
    InvalidDiceCount(u8),

    #[error("invalid argument: die face must be in the range [1, 6], got {0}")]
    InvalidFace(u8),

    #[error("invalid roll: {0}")]
    InvalidRoll(String),

    #[error("invalid argument: score must be at most {max}, got {0}", max = MAX_SCORE)]
    InvalidScore(Score),

    #[error("invalid argument: target must be at most {max}, got {0}", max = MAX_TARGET)]
    InvalidTarget(Score),

    #[error(
        "invalid argument: search depth must be in the range [1, {max}], got {0}",
        max = MAX_EV_DEPTH
    )]
    InvalidDepth(u32),
}

/// Validate that `dice_count` is a rollable number of dice.
pub(crate) fn check_dice_count(dice_count: u8) -> Result<u8> {
    if (1..=MAX_DICE).contains(&dice_count) {
        Ok(dice_count)
    } else {
        Err(Error::InvalidDiceCount(dice_count))
    }
}

pub(crate) fn check_score(score: Score) -> Result<Score> {
    if score <= MAX_SCORE {
        Ok(score)
    } else {
        Err(Error::InvalidScore(score))
    }
}

pub(crate) fn check_target(target: Score) -> Result<Score> {
    if target <= MAX_TARGET {
        Ok(target)
    } else {
        Err(Error::InvalidTarget(target))
    }
}

pub(crate) fn check_ev_depth(depth: u32) -> Result<u32> {
    if (1..=MAX_EV_DEPTH).contains(&depth) {
        Ok(depth)
    } else {
        Err(Error::InvalidDepth(depth))
    }
}

///////////////////
// Combinatorics //
///////////////////

/// The number of factorials to precompute in our static lookup table. Note this
/// number is chosen so as not to overflow a u32.
pub(crate) const NUM_FACTORIALS: usize = 13;

/// A precomputed lookup table of factorials from `0 <= n < NUM_FACTORIALS`.
/// `FACTORIAL_LT[n] = n!`.
const FACTORIAL_LT: [u32; NUM_FACTORIALS] = precompute_factorials();

const fn precompute_factorials() -> [u32; NUM_FACTORIALS] {
    let mut factorials: [u32; NUM_FACTORIALS] = [1; NUM_FACTORIALS];

    // need ghetto for-loop in const fn...
    let mut idx = 1;
    loop {
        if idx >= NUM_FACTORIALS {
            break;
        }
        factorials[idx] = (idx as u32) * factorials[idx - 1];
        idx += 1;
    }

    factorials
}

pub(crate) const fn factorial(n: u32) -> u32 {
    FACTORIAL_LT[n as usize]
}

/// count `n choose k` without replacement.
pub const fn num_combinations(n: u32, k: u32) -> u32 {
    factorial(n) / (factorial(k) * factorial(n - k))
}

/// count `n choose k` with replacement. also known as `n multichoose k`.
#[inline]
pub const fn num_multisets(n: u32, k: u32) -> u32 {
    num_combinations(n + k - 1, k)
}

/// The total number of ordered rolls of `dice_count` six-sided dice, `6^n`.
#[inline]
pub const fn num_ordered_rolls(dice_count: u8) -> Weight {
    (NUM_FACES as Weight).pow(dice_count as u32)
}

////////////////////////////
// Unstable std functions //
////////////////////////////

/// Returns `true` if the iterator `iter` is sorted, according to the comparator
/// function `compare`, i.e., `x_1 <= x2 <= ... <= x_n`.
pub(crate) fn is_sorted_by<T, F>(mut iter: impl Iterator<Item = T>, mut compare: F) -> bool
where
    F: FnMut(&T, &T) -> Option<cmp::Ordering>,
{
    let mut prev = match iter.next() {
        Some(first) => first,
        None => return true,
    };

    for next in iter {
        if let Some(cmp::Ordering::Greater) | None = compare(&prev, &next) {
            return false;
        }
        prev = next;
    }

    true
}

/// Returns `true` if the iterator `iter` is totally ordered, according to the
/// comparator function `compare`, i.e., `x_1 < x2 < ... < x_n`.
pub(crate) fn is_total_order_by<T, F>(mut iter: impl Iterator<Item = T>, mut compare: F) -> bool
where
    F: FnMut(&T, &T) -> Option<cmp::Ordering>,
{
    let mut prev = match iter.next() {
        Some(first) => first,
        None => return true,
    };

    for next in iter {
        if let Some(cmp::Ordering::Greater) | Some(cmp::Ordering::Equal) | None =
            compare(&prev, &next)
        {
            return false;
        }
        prev = next;
    }

    true
}

///////////////
// Bit Hacks //
///////////////

/// Returns `true` if `x` has _any_ nibbles `nb` in the range `m < nb < n`. The
/// nibbles considered are selected according to `mask`, where `mask` has a `1`
/// in each selectable nibble.
///
/// For example, calling this with `mask = 0x0010_1101` will only look at the
/// 1st, 3rd, 4th, and 6th nibbles. Calling with `mask = 0x1111_1111` will look
/// at all nibbles.
#[inline]
pub(crate) fn u32_any_nibs_between(x: u32, mask: u32, m: u32, n: u32) -> bool {
    debug_assert!((0..=7).contains(&m));
    debug_assert!((0..=8).contains(&n));

    let a = mask * 7;
    let b = mask * 8;
    let w = mask * (7 + n);
    let t = mask * (7 - m);

    let u = x & a;
    let z = (w - u) & (!x) & (u + t) & b;

    z != 0
}

/// Sum all nibbles in `x`.
#[inline]
pub(crate) fn u32_sum_all_nibs(x: u32) -> u32 {
    // a mask that selects the lo nibble in each byte.
    const NIBS_0246: u32 = 0x0f0f_0f0f;

    // horizontal sum hi and lo nibbles in each byte, placing in the lo nibble.
    let y = (x & NIBS_0246) + ((x >> 4) & NIBS_0246);

    // if y = [y0, y1, y2, y3] bytes and each byte b is in the range 0 <= b < 64,
    // then multiplying by 0x0101_0101 will yield
    // z = [y0, y0 + y1, y0 + y1 + y2, y0 + y1 + y2 + y3] without any overflows.
    let z = y.wrapping_mul(0x0101_0101);

    // select the last byte in z, which contains our desired sum:
    // z3 = y0 + y1 + y2 + y3
    z >> 24
}

/////////////
// DiceMap //
/////////////

/// A mapping from dice count `1..=6` to some value. This is what all of the
/// per-dice-count reports return.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DiceMap<T>([T; MAX_DICE as usize]);

impl<T> DiceMap<T> {
    pub fn from_fn(mut f: impl FnMut(u8) -> T) -> Self {
        Self(std::array::from_fn(|idx| f(idx as u8 + 1)))
    }

    #[inline]
    pub fn get(&self, dice_count: u8) -> Option<&T> {
        check_dice_count(dice_count)
            .ok()
            .map(|dice_count| &self.0[(dice_count - 1) as usize])
    }

    /// Iterate `(dice_count, value)` pairs, from 1 die up to 6 dice.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u8, &T)> + '_ {
        self.0
            .iter()
            .enumerate()
            .map(|(idx, value)| (idx as u8 + 1, value))
    }
}

impl<T> Index<u8> for DiceMap<T> {
    type Output = T;

    #[inline]
    fn index(&self, dice_count: u8) -> &T {
        assert!(
            (1..=MAX_DICE).contains(&dice_count),
            "dice count out of range [1, 6]: {dice_count}"
        );
        &self.0[(dice_count - 1) as usize]
    }
}

impl<T> IndexMut<u8> for DiceMap<T> {
    #[inline]
    fn index_mut(&mut self, dice_count: u8) -> &mut T {
        assert!(
            (1..=MAX_DICE).contains(&dice_count),
            "dice count out of range [1, 6]: {dice_count}"
        );
        &mut self.0[(dice_count - 1) as usize]
    }
}

impl<T: fmt::Display> fmt::Display for DiceMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (dice_count, value)) in self.iter().rev().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dice_count}: {value}")?;
        }
        f.write_str("}")
    }
}

/////////////////////
// TotalSize trait //
/////////////////////

/// A trait for computing the total size of a data structure in memory. That means
/// not just the size on the stack, but also the total size of any owned resources.
pub trait TotalSize {
    /// Types whose total size is known statically, like a `u32`, can return a
    /// constant here. Unsized types or types that contain variable-size resources
    /// must return `None` here.
    fn static_size() -> Option<usize> {
        None
    }
    fn total_size(&self) -> usize {
        Self::static_size().unwrap_or(std::mem::size_of_val(self))
    }
}

impl_total_size_static!(u8, u32, f64);

impl<A, B, C, D> TotalSize for (A, B, C, D)
where
    A: TotalSize,
    B: TotalSize,
    C: TotalSize,
    D: TotalSize,
{
    fn static_size() -> Option<usize> {
        A::static_size()
            .zip(B::static_size())
            .zip(C::static_size())
            .zip(D::static_size())
            .map(|_| std::mem::size_of::<Self>())
    }
}

impl<K, V> TotalSize for HashMap<K, V>
where
    K: TotalSize,
    V: TotalSize,
{
    fn total_size(&self) -> usize {
        let inner_size = match (K::static_size(), V::static_size()) {
            (Some(size_k), Some(size_v)) => self.len() * (size_k + size_v),
            (Some(size_k), None) => {
                (self.len() * size_k) + self.values().map(|v| v.total_size()).sum::<usize>()
            }
            (None, Some(size_v)) => {
                (self.len() * size_v) + self.keys().map(|k| k.total_size()).sum::<usize>()
            }
            (None, None) => self
                .iter()
                .map(|(k, v)| k.total_size() + v.total_size())
                .sum(),
        };
        std::mem::size_of::<Self>() + inner_size
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn factorial_ref(n: u32) -> u32 {
        (1..=n).product()
    }

    #[test]
    fn test_factorial_lt() {
        for n in 0..NUM_FACTORIALS as u32 {
            assert_eq!(factorial_ref(n), factorial(n));
        }
    }

    #[test]
    fn test_num_multisets() {
        // C(d + 5, d) for d dice
        let expected = [6, 21, 56, 126, 252, 462];
        for (dice_count, expected) in (1..=6).zip(expected) {
            assert_eq!(expected, num_multisets(6, dice_count));
            assert_eq!(expected, num_combinations(dice_count + 5, dice_count));
        }
        assert_eq!(46656, num_ordered_rolls(6));
        assert_eq!(6, num_ordered_rolls(1));
    }

    fn niters(n: u32) -> ProptestConfig {
        ProptestConfig::with_cases(n)
    }

    /// spread `x` into an array of nibbles.
    fn u32_into_nib_le(x: u32) -> [u8; 8] {
        let [b0, b1, b2, b3] = x.to_le_bytes();
        [
            b0 & 0x0f,
            (b0 >> 4) & 0x0f,
            b1 & 0x0f,
            (b1 >> 4) & 0x0f,
            b2 & 0x0f,
            (b2 >> 4) & 0x0f,
            b3 & 0x0f,
            (b3 >> 4) & 0x0f,
        ]
    }

    /// reference implementation of [`u32_any_nibs_between`]
    fn u32_any_nibs_between_ref(x: u32, mask: u32, m: u32, n: u32) -> bool {
        let m = m as u8;
        let n = n as u8;

        u32_into_nib_le(x)
            .into_iter()
            .zip(u32_into_nib_le(mask))
            .any(|(nb_x, nb_mask)| (nb_mask == 0x1) && (m < nb_x) && (nb_x < n))
    }

    #[test]
    fn test_u32_any_nibs_between() {
        assert!(u32_any_nibs_between(0x1234_5678, 0x1010_1010, 0, 3));
        assert!(!u32_any_nibs_between(0x1234_5678, 0x0011_1011, 0, 3));

        // face counts never exceed 6, which is what the bust check relies on
        proptest!(niters(2000), |(counts in proptest::array::uniform8(0u32..=6), m in (0u32..=7), n in (0u32..=8))| {
            let x = counts
                .iter()
                .enumerate()
                .fold(0u32, |x, (idx, count)| x | (count << (4 * idx)));
            prop_assert_eq!(
                u32_any_nibs_between_ref(x, 0x0111_1110, m, n),
                u32_any_nibs_between(x, 0x0111_1110, m, n)
            );
        });
    }

    fn u32_sum_all_nibs_ref(x: u32) -> u32 {
        u32_into_nib_le(x).into_iter().map(|x| x as u32).sum()
    }

    #[test]
    fn test_u32_sum_all_nibs() {
        proptest!(niters(2000), |(x in any::<u32>())| {
            prop_assert_eq!(u32_sum_all_nibs_ref(x), u32_sum_all_nibs(x));
        });
    }

    #[test]
    fn test_dice_map() {
        let map = DiceMap::from_fn(|dice_count| dice_count as u32 * 10);
        assert_eq!(10, map[1]);
        assert_eq!(60, map[6]);
        assert_eq!(None, map.get(0));
        assert_eq!(None, map.get(7));
        assert_eq!(Some(&30), map.get(3));

        let mut map2 = map;
        map2[3] = 0;
        assert_eq!(0, map2[3]);
        assert_eq!(30, map[3]);
        assert_eq!(
            vec![(1, 10), (2, 20), (3, 30), (4, 40), (5, 50), (6, 60)],
            map.iter().map(|(d, &v)| (d, v)).collect::<Vec<_>>()
        );
        assert_eq!("{6: 60, 5: 50, 4: 40, 3: 30, 2: 20, 1: 10}", map.to_string());
    }

    #[test]
    fn test_check_dice_count() {
        assert_eq!(Err(Error::InvalidDiceCount(0)), check_dice_count(0));
        assert_eq!(Err(Error::InvalidDiceCount(7)), check_dice_count(7));
        for dice_count in 1..=6 {
            assert_eq!(Ok(dice_count), check_dice_count(dice_count));
        }
    }

    #[test]
    fn test_check_search_bounds() {
        assert_eq!(Ok(MAX_SCORE), check_score(MAX_SCORE));
        assert_eq!(Err(Error::InvalidScore(MAX_SCORE + 1)), check_score(MAX_SCORE + 1));
        assert_eq!(Err(Error::InvalidScore(Score::MAX)), check_score(Score::MAX));

        assert_eq!(Ok(MAX_TARGET), check_target(MAX_TARGET));
        assert_eq!(Err(Error::InvalidTarget(MAX_TARGET + 1)), check_target(MAX_TARGET + 1));

        assert_eq!(Ok(1), check_ev_depth(1));
        assert_eq!(Ok(MAX_EV_DEPTH), check_ev_depth(MAX_EV_DEPTH));
        assert_eq!(Err(Error::InvalidDepth(0)), check_ev_depth(0));
        assert_eq!(Err(Error::InvalidDepth(MAX_EV_DEPTH + 1)), check_ev_depth(MAX_EV_DEPTH + 1));

        // the largest score plus the most points a single roll can give
        assert!(MAX_SCORE.checked_add(8000).is_some());
        assert_eq!(
            "invalid argument: target must be at most 20000, got 20050",
            Error::InvalidTarget(20_050).to_string()
        );
    }
}

use crate::{
    check_dice_count, check_ev_depth, check_score, check_target,
    outcome::{best_outcomes_per_dice_count, OutcomeTable},
    DiceMap, Result, Score, TotalSize, Weight, DEFAULT_EV_DEPTH, MAX_SCORE, SCORE_STEP,
};
use claim::{debug_assert_ge, debug_assert_gt};
use std::{borrow::Borrow, collections::HashMap, hash::Hash};

/// The initial (effectively unbounded) cutoff score for every dice count.
pub const NO_CUTOFF: Score = MAX_SCORE;

///////////
// Cache //
///////////

/// A memo table that also keeps hit/miss statistics for reporting.
#[derive(Clone, Debug)]
pub struct Cache<K, V> {
    store: HashMap<K, V>,
    hits: u64,
    misses: u64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn new() -> Self {
        Self {
            store: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn peek_cache<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash,
    {
        let out = self.store.get(key).cloned();
        if out.is_some() {
            self.hits = self.hits.saturating_add(1);
        } else {
            self.misses = self.misses.saturating_add(1);
        }
        out
    }

    fn fill_cache(&mut self, key: K, value: V) -> V {
        let out = value.clone();
        self.store.insert(key, value);
        out
    }

    /// Drop every memoized value. The hit/miss counters keep counting.
    fn clear(&mut self) {
        self.store.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.store.len()
    }

    pub fn cache_hits(&self) -> u64 {
        self.hits
    }

    pub fn cache_misses(&self) -> u64 {
        self.misses
    }

    pub fn cache_hit_rate(&self) -> f32 {
        let total_queries = (self.hits as f64) + (self.misses as f64);
        if total_queries == 0.0 {
            0.0
        } else {
            ((self.hits as f64) / total_queries) as f32
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: TotalSize,
    V: TotalSize,
{
    /// Approximate memory used by the memo table, in bytes.
    pub fn cache_size_bytes(&self) -> usize {
        self.store.total_size()
    }
}

//////////////
// EvSearch //
//////////////

/// `(dice, score, depth, limit)`
type EvKey = (u8, Score, u32, Score);

/// Estimates the expected marginal gain of continuing to roll, assuming the
/// player then plays to maximize expected value.
///
/// The search is a memoized backward induction over `(dice, score)` states,
/// bounded by a depth budget. As a side effect, it learns the lowest score at
/// which rolling each number of dice has a negative expected value (the
/// "cutoff"); any branch landing at or above its cutoff is not explored any
/// further, which is what keeps the search tractable.
///
/// The cutoff table only ever moves down. It is not part of the memo key, so
/// results cached before a cutoff moved are reused as-is.
///
/// Scores above [`MAX_SCORE`] and look-aheads above [`MAX_EV_DEPTH`] are
/// rejected.
///
/// [`MAX_EV_DEPTH`]: crate::MAX_EV_DEPTH
#[derive(Debug)]
pub struct EvSearch {
    table: &'static OutcomeTable,
    depth_max: u32,
    cache: Cache<EvKey, f64>,
    min_score_for_negative_ev: DiceMap<Score>,
}

impl Default for EvSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl EvSearch {
    pub fn new() -> Self {
        Self::from_depth_max(DEFAULT_EV_DEPTH)
    }

    /// With a limit of 0 the largest cutoff is 18100, and every roll scores at
    /// least 50, so a depth of `18100 / 50 = 362` already reaches every
    /// cutoff. Large limits may need more depth.
    pub fn with_depth_max(depth_max: u32) -> Result<Self> {
        let depth_max = check_ev_depth(depth_max)?;
        Ok(Self::from_depth_max(depth_max))
    }

    fn from_depth_max(depth_max: u32) -> Self {
        Self {
            table: best_outcomes_per_dice_count(),
            depth_max,
            cache: Cache::new(),
            min_score_for_negative_ev: DiceMap::from_fn(|_| NO_CUTOFF),
        }
    }

    #[inline]
    pub fn depth_max(&self) -> u32 {
        self.depth_max
    }

    #[inline]
    pub fn cache(&self) -> &Cache<EvKey, f64> {
        &self.cache
    }

    /// Estimate the expected net gain of rolling `dice_count` dice with a turn
    /// total of `score` so far.
    ///
    /// `limit` is the lowest score that counts as a loss when busting. Busting
    /// below it costs nothing, which approximates being forced to reach
    /// `limit` (1000 points to get on the board).
    pub fn estimate_ev(&mut self, dice_count: u8, score: Score, limit: Score) -> Result<f64> {
        let dice_count = check_dice_count(dice_count)?;
        let score = check_score(score)?;
        Ok(self.ev(dice_count, score, self.depth_max, limit))
    }

    /// [`EvSearch::estimate_ev`] for every dice count. With `net_ev = false`,
    /// the current score is added back in, giving the expected total for the
    /// whole turn.
    pub fn estimate_evs(
        &mut self,
        score: Score,
        limit: Score,
        net_ev: bool,
    ) -> Result<DiceMap<f64>> {
        let score = check_score(score)?;
        Ok(self.evs(score, limit, net_ev))
    }

    /// Return the lowest score at which rolling each number of dice has a
    /// negative expected value, i.e., the score you should stop at to play an
    /// EV-optimal game.
    pub fn estimate_min_score_for_negative_ev(&mut self) -> DiceMap<Score> {
        // populate the cutoff table
        self.evs(0, 0, true);
        self.min_score_for_negative_ev
    }

    /// The cutoff table as it currently stands, without searching.
    #[inline]
    pub fn min_score_for_negative_ev(&self) -> DiceMap<Score> {
        self.min_score_for_negative_ev
    }

    /// Restore every cutoff to [`NO_CUTOFF`] and forget every memoized EV, so
    /// the next search learns its cutoffs from scratch.
    pub fn reset_min_score_for_negative_ev(&mut self) {
        self.min_score_for_negative_ev = DiceMap::from_fn(|_| NO_CUTOFF);
        self.cache.clear();
    }

    fn evs(&mut self, score: Score, limit: Score, net_ev: bool) -> DiceMap<f64> {
        let depth = self.depth_max;
        let offset = if net_ev { 0.0 } else { score as f64 };

        // dice counts are always visited in ascending order
        DiceMap::from_fn(|dice_count| self.ev(dice_count, score, depth, limit) + offset)
    }

    fn ev(&mut self, dice_count: u8, score: Score, depth: u32, limit: Score) -> f64 {
        let key = (dice_count, score, depth, limit);
        if let Some(ev) = self.cache.peek_cache(&key) {
            return ev;
        }

        let ev = self.ev_inner(dice_count, score, depth, limit);
        self.cache.fill_cache(key, ev)
    }

    fn ev_inner(&mut self, dice_count: u8, score: Score, depth: u32, limit: Score) -> f64 {
        // out of budget; this undercounts, but insignificantly at high depths
        if depth == 0 {
            return 0.0;
        }

        let table = self.table;
        let mut total_weight: Weight = 0;
        let mut total_ev = 0.0;

        for (class, weight) in table.classes(dice_count) {
            total_weight += weight;

            if class.is_bust() {
                if score >= limit {
                    total_ev -= (score as f64) * (*weight as f64);
                }
                continue;
            }

            let mut max_ev = -1.0_f64;
            for outcome in class.iter() {
                // `score` is at most `MAX_SCORE`, which leaves room for a roll
                let next_score = score + outcome.points;
                let mut branch_ev = outcome.points as f64;

                if next_score < self.min_score_for_negative_ev[outcome.dice] {
                    let subtree_ev = self.ev(outcome.dice, next_score, depth - 1, limit);
                    // only worth rolling again if we expect to gain
                    if subtree_ev > 0.0 {
                        branch_ev += subtree_ev;
                    }
                }

                max_ev = max_ev.max(branch_ev);
            }

            debug_assert_ge!(max_ev, 0.0);
            total_ev += max_ev * (*weight as f64);
        }

        debug_assert_gt!(total_weight, 0);
        let ev = total_ev / (total_weight as f64);

        let cutoff = &mut self.min_score_for_negative_ev[dice_count];
        if ev < 0.0 && score < *cutoff {
            log::trace!("lowering cutoff: dice: {dice_count}, score: {score}, ev: {ev:.3}");
            *cutoff = score;
        }

        ev
    }
}

/////////////////
// ReachSearch //
/////////////////

/// `(dice, score, target, depth)`
type ReachKey = (u8, Score, Score, u32);

/// Computes the exact probability of reaching a target turn total, assuming
/// the player keeps rolling (always choosing the best continuation) until
/// they either reach it or bust.
///
/// Targets above [`MAX_TARGET`] are rejected; the search recurses once per
/// roll.
///
/// [`MAX_TARGET`]: crate::MAX_TARGET
#[derive(Debug)]
pub struct ReachSearch {
    table: &'static OutcomeTable,
    cache: Cache<ReachKey, f64>,
}

impl Default for ReachSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl ReachSearch {
    pub fn new() -> Self {
        Self {
            table: best_outcomes_per_dice_count(),
            cache: Cache::new(),
        }
    }

    #[inline]
    pub fn cache(&self) -> &Cache<ReachKey, f64> {
        &self.cache
    }

    /// The number of rolls needed to guarantee reaching `target`, if every
    /// roll scores the minimum.
    #[inline]
    pub const fn depth_for_target(target: Score) -> u32 {
        target / SCORE_STEP + 1
    }

    /// The probability of reaching `target` from `score` with `dice_count`
    /// dice left to roll, within `depth` rolls.
    pub fn chance_to_reach(
        &mut self,
        dice_count: u8,
        score: Score,
        target: Score,
        depth: u32,
    ) -> Result<f64> {
        let dice_count = check_dice_count(dice_count)?;
        let target = check_target(target)?;
        Ok(self.reach(dice_count, score, target, depth))
    }

    /// The probability of reaching `target` from `score` with `dice_count`
    /// dice left to roll. Exact, since every roll scores at least 50.
    pub fn estimate_chance_to_reach(
        &mut self,
        dice_count: u8,
        score: Score,
        target: Score,
    ) -> Result<f64> {
        let target = check_target(target)?;
        self.chance_to_reach(dice_count, score, target, Self::depth_for_target(target))
    }

    /// [`ReachSearch::estimate_chance_to_reach`] for every dice count.
    pub fn estimate_chances_to_reach(
        &mut self,
        score: Score,
        target: Score,
    ) -> Result<DiceMap<f64>> {
        let target = check_target(target)?;
        let depth = Self::depth_for_target(target);
        Ok(DiceMap::from_fn(|dice_count| self.reach(dice_count, score, target, depth)))
    }

    fn reach(&mut self, dice_count: u8, score: Score, target: Score, depth: u32) -> f64 {
        if score >= target {
            return 1.0;
        }
        if depth == 0 {
            return 0.0;
        }

        let key = (dice_count, score, target, depth);
        if let Some(p) = self.cache.peek_cache(&key) {
            return p;
        }

        let table = self.table;
        let mut total_weight: Weight = 0;
        let mut total_p = 0.0;

        for (class, weight) in table.classes(dice_count) {
            total_weight += weight;

            // busting never reaches the target
            if class.is_bust() {
                continue;
            }

            // `score < target <= MAX_TARGET`, so this can't overflow
            let max_p = class.iter().fold(0.0_f64, |max_p, outcome| {
                let p = self.reach(outcome.dice, score + outcome.points, target, depth - 1);
                max_p.max(p)
            });

            total_p += max_p * (*weight as f64);
        }

        debug_assert_gt!(total_weight, 0);
        let p = total_p / (total_weight as f64);
        self.cache.fill_cache(key, p)
    }
}

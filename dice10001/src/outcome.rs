use crate::{
    dice::{Roll, RollsIter},
    is_total_order_by, num_ordered_rolls, DiceMap, Score, Weight, MAX_DICE,
};
use approx::relative_eq;
use claim::debug_assert_gt;
use itertools::{Either, Itertools};
use std::{
    collections::{BTreeSet, HashMap},
    fmt, iter,
    sync::OnceLock,
};

/// The "dice left" value of an [`Outcome`] that busts.
pub const BUST: u8 = 0;

pub const STRAIGHT_POINTS: Score = 2000;
pub const THREE_PAIRS_POINTS: Score = 1500;

/// Points granted for keeping `count` dice showing `face`:
/// `POINTS_TABLE[face][count]`. Row 0 is unused.
const POINTS_TABLE: [[Score; 7]; 7] = [
    [0, 0, 0, 0, 0, 0, 0],
    [0, 100, 200, 1000, 2000, 4000, 8000],
    [0, 0, 0, 200, 400, 800, 1600],
    [0, 0, 0, 300, 600, 1200, 2400],
    [0, 0, 0, 400, 800, 1600, 3200],
    [0, 50, 100, 500, 1000, 2000, 4000],
    [0, 0, 0, 600, 1200, 2400, 4800],
];

#[inline]
fn face_points(face: u8, count: u8) -> Score {
    POINTS_TABLE[face as usize][count as usize]
}

/////////////
// Outcome //
/////////////

/// One possible way to score a roll: the points gained and the number of dice
/// left to re-roll afterwards. `dice == BUST` means the roll had no scoring dice
/// and the turn is over.
///
/// Outcomes are ordered by `(points, dice)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Outcome {
    pub points: Score,
    pub dice: u8,
}

impl Outcome {
    #[inline]
    pub const fn new(points: Score, dice: u8) -> Self {
        Self { points, dice }
    }

    #[inline]
    pub const fn bust() -> Self {
        Self::new(0, BUST)
    }

    #[inline]
    pub fn is_bust(self) -> bool {
        self.dice == BUST
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bust() {
            f.write_str("(0, bust)")
        } else {
            write!(f, "({}, {})", self.points, self.dice)
        }
    }
}

//////////////////
// Rules engine //
//////////////////

/// Return the counts of `face` we are allowed to keep when `count` of them were
/// rolled.
fn keep_counts(face: u8, count: u8) -> Vec<u8> {
    match face {
        // we are allowed to keep any amount of 1s and 5s since they all give
        // points
        1 | 5 => (0..=count).collect(),
        // for 2, 3, 4, and 6 we keep none, or three or more, since they only
        // give points in collections of 3 or more.
        _ => iter::once(0).chain(3..=count).collect(),
    }
}

/// Return an `Iterator` over all possible outcomes for the given roll. A bust
/// roll yields exactly one outcome, [`Outcome::bust`].
///
/// Outcomes are not deduplicated; see [`get_all_outcomes`].
pub fn generate_outcomes(roll: Roll) -> impl Iterator<Item = Outcome> {
    let counts = roll.face_counts();

    if counts.is_bust() {
        return Either::Left(iter::once(Outcome::bust()));
    }

    let starting_dice = roll.len();

    // the two whole-roll special cases: full straight and three pairs
    let special = if counts.is_straight() {
        Some(Outcome::new(STRAIGHT_POINTS, MAX_DICE))
    } else if counts.is_three_pairs() {
        Some(Outcome::new(THREE_PAIRS_POINTS, MAX_DICE))
    } else {
        None
    };

    let faces = counts.iter().collect::<Vec<_>>();

    // iterate over all unique selections of dice to keep, i.e., one keep count
    // per distinct face.
    let selections = counts
        .iter()
        .map(|(face, count)| keep_counts(face, count))
        .multi_cartesian_product();

    let outcomes = selections.filter_map(move |selection| {
        let kept: u8 = selection.iter().sum();

        // must keep at least one die
        if kept == 0 {
            return None;
        }

        let points: Score = faces
            .iter()
            .zip(&selection)
            .map(|(&(face, _count), &keep)| face_points(face, keep))
            .sum();

        // we get to continue with all 6 dice if we use them all
        let dice = match starting_dice - kept {
            0 => MAX_DICE,
            dice => dice,
        };

        Some(Outcome::new(points, dice))
    });

    Either::Right(special.into_iter().chain(outcomes))
}

/// Return the set of distinct outcomes for the given roll.
pub fn get_all_outcomes(roll: Roll) -> BTreeSet<Outcome> {
    generate_outcomes(roll).collect()
}

/// Return true if the roll has no scoring dice, also called a "bust".
#[inline]
pub fn is_bust(roll: Roll) -> bool {
    roll.face_counts().is_bust()
}

//////////////////
// OutcomeClass //
//////////////////

/// The best outcome for each possible number of dice left, sorted by
/// `(points, dice)`. Many rolls share the same class, e.g., `[1, 2, 5]` and
/// `[1, 3, 5]` both reduce to `{(100, 2), (150, 1)}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutcomeClass(Vec<Outcome>);

impl OutcomeClass {
    /// Keep only the outcome with the most points for each number of dice left.
    /// Fewer points with the same dice left is never better.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        let mut best: [Option<Outcome>; MAX_DICE as usize + 1] = [None; MAX_DICE as usize + 1];

        for outcome in outcomes {
            let slot = &mut best[outcome.dice as usize];
            if slot.map_or(true, |prev| prev.points < outcome.points) {
                *slot = Some(outcome);
            }
        }

        let mut outcomes = best.into_iter().flatten().collect::<Vec<_>>();
        outcomes.sort_unstable();

        debug_assert!(!outcomes.is_empty());
        debug_assert!(outcomes.iter().all(|o| !o.is_bust()) || outcomes.len() == 1);

        Self(outcomes)
    }

    #[inline]
    pub fn outcomes(&self) -> &[Outcome] {
        &self.0
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = Outcome> + '_ {
        self.0.iter().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A bust class contains only the bust outcome.
    #[inline]
    pub fn is_bust(&self) -> bool {
        match self.0.first() {
            Some(outcome) if outcome.is_bust() => {
                debug_assert_eq!(1, self.0.len());
                true
            }
            _ => false,
        }
    }

    /// The outcome with the most points. Ties go to the outcome with more dice
    /// left.
    ///
    /// Returns `None` only for an empty class, which `from_outcomes` never
    /// builds.
    #[inline]
    pub fn max_points(&self) -> Option<Outcome> {
        // sorted by (points, dice), so this is just the last one
        self.0.last().copied()
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, outcome) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{outcome}")?;
        }
        f.write_str("}")
    }
}

/// Return the best outcome for each possible number of dice left after scoring
/// `roll`.
pub fn get_best_outcomes(roll: Roll) -> OutcomeClass {
    OutcomeClass::from_outcomes(generate_outcomes(roll))
}

//////////////////
// OutcomeTable //
//////////////////

/// For each dice count, the weighted outcome classes of all possible rolls.
///
/// This abstracts away the actual rolls and narrows the search space quite a
/// bit, as many rolls have the same best outcomes:
///
/// ```text
/// dice: unordered rolls -> classes
///    1:               6 ->       3
///    2:              21 ->       6
///    3:              56 ->      14
///    4:             126 ->      31
///    5:             252 ->      61
///    6:             462 ->     119
/// ```
#[derive(Clone, Debug)]
pub struct OutcomeTable {
    /// Classes are stored in the order they are first seen while walking the
    /// rolls lexicographically, so searches iterate them deterministically.
    classes: DiceMap<Vec<(OutcomeClass, Weight)>>,
}

impl OutcomeTable {
    pub fn compute() -> Self {
        let classes = DiceMap::from_fn(|dice_count| {
            let mut class_idxs = HashMap::<OutcomeClass, usize>::new();
            let mut classes = Vec::<(OutcomeClass, Weight)>::new();

            for (roll, weight) in RollsIter::new(dice_count) {
                let class = get_best_outcomes(roll);
                match class_idxs.get(&class) {
                    Some(&idx) => classes[idx].1 += weight,
                    None => {
                        class_idxs.insert(class.clone(), classes.len());
                        classes.push((class, weight));
                    }
                }
            }

            log::debug!(
                "outcome table: {dice_count} dice -> {} classes",
                classes.len()
            );

            classes
        });

        let table = Self { classes };
        debug_assert!(table.invariant());
        table
    }

    fn invariant(&self) -> bool {
        (1..=MAX_DICE).all(|dice_count| {
            self.total_weight(dice_count) == num_ordered_rolls(dice_count)
                && is_total_order_by(
                    self.classes(dice_count)
                        .iter()
                        .map(|(class, _)| class)
                        .sorted(),
                    |c1, c2| c1.partial_cmp(c2),
                )
        })
    }

    /// The weighted outcome classes for rolling `dice_count` dice.
    ///
    /// Panics if `dice_count` is not in `1..=6`.
    #[inline]
    pub fn classes(&self, dice_count: u8) -> &[(OutcomeClass, Weight)] {
        &self.classes[dice_count]
    }

    #[inline]
    pub fn num_classes(&self, dice_count: u8) -> usize {
        self.classes(dice_count).len()
    }

    /// The sum of all class weights, which is always `6^dice_count`.
    pub fn total_weight(&self, dice_count: u8) -> Weight {
        self.classes(dice_count)
            .iter()
            .map(|(_class, weight)| weight)
            .sum()
    }

    /// The weight of the class `class`, or 0 if no roll reduces to it.
    pub fn weight_of(&self, dice_count: u8, class: &OutcomeClass) -> Weight {
        self.classes(dice_count)
            .iter()
            .find(|(c, _)| c == class)
            .map(|&(_, weight)| weight)
            .unwrap_or(0)
    }
}

/// Return the (process-wide, lazily computed) table of weighted outcome classes
/// for each dice count.
pub fn best_outcomes_per_dice_count() -> &'static OutcomeTable {
    static OUTCOME_TABLE: OnceLock<OutcomeTable> = OnceLock::new();

    OUTCOME_TABLE.get_or_init(|| time!("compute outcome table", { OutcomeTable::compute() }))
}

/// Return the probability of busting when rolling each number of dice.
pub fn bust_probabilities() -> DiceMap<f64> {
    let table = best_outcomes_per_dice_count();

    DiceMap::from_fn(|dice_count| {
        let bust_weight: Weight = table
            .classes(dice_count)
            .iter()
            .filter(|(class, _)| class.is_bust())
            .map(|(_, weight)| weight)
            .sum();
        (bust_weight as f64) / (table.total_weight(dice_count) as f64)
    })
}

/// The "naive" strategy of always taking the outcome with the most points.
/// Returns, for each number of dice rolled, the probability of ending up with
/// each number of dice left: `transitions[dice][dice_left]`, where
/// `dice_left == BUST` (index 0) is the probability of busting.
pub fn greedy_transitions() -> DiceMap<[f64; MAX_DICE as usize + 1]> {
    let table = best_outcomes_per_dice_count();

    DiceMap::from_fn(|dice_count| {
        let total_weight = table.total_weight(dice_count) as f64;
        debug_assert_gt!(total_weight, 0.0);

        let mut transitions = [0.0; MAX_DICE as usize + 1];
        for (class, weight) in table.classes(dice_count) {
            if let Some(outcome) = class.max_points() {
                transitions[outcome.dice as usize] += (*weight as f64) / total_weight;
            }
        }

        debug_assert!(relative_eq!(1.0, transitions.iter().sum::<f64>()));
        transitions
    })
}

///////////
// Tests //
///////////

#[cfg(test)]
mod test {
    use super::*;
    use crate::dice::generate_rolls;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn roll(faces: &[u8]) -> Roll {
        Roll::from_sorted_slice(faces)
    }

    fn outcomes(pairs: &[(Score, u8)]) -> Vec<Outcome> {
        pairs
            .iter()
            .map(|&(points, dice)| Outcome::new(points, dice))
            .collect()
    }

    fn outcome_set(pairs: &[(Score, u8)]) -> BTreeSet<Outcome> {
        outcomes(pairs).into_iter().collect()
    }

    fn class(pairs: &[(Score, u8)]) -> OutcomeClass {
        let mut outcomes = outcomes(pairs);
        outcomes.sort_unstable();
        OutcomeClass(outcomes)
    }

    #[test]
    fn test_keep_counts() {
        assert_eq!(vec![0, 1, 2, 3, 4, 5, 6], keep_counts(5, 6));
        assert_eq!(vec![0, 1, 2], keep_counts(5, 2));
        assert_eq!(vec![0, 1, 2, 3, 4], keep_counts(1, 4));
        assert_eq!(vec![0, 3, 4], keep_counts(2, 4));
        assert_eq!(vec![0], keep_counts(4, 2));
        assert_eq!(vec![0], keep_counts(6, 1));
    }

    #[test]
    fn test_face_points() {
        assert_eq!(100, face_points(1, 1));
        assert_eq!(8000, face_points(1, 6));
        assert_eq!(50, face_points(5, 1));
        assert_eq!(0, face_points(2, 2));
        assert_eq!(200, face_points(2, 3));
        assert_eq!(4800, face_points(6, 6));
        // n of a kind doubles with each extra die
        for face in [2, 3, 4, 6] {
            for count in 4..=6 {
                assert_eq!(2 * face_points(face, count - 1), face_points(face, count));
            }
        }
    }

    #[test]
    fn test_get_all_outcomes() {
        let cases: &[(&[u8], &[(Score, u8)])] = &[
            (&[1, 2, 3, 4, 5, 6], &[(2000, 6), (150, 4), (100, 5), (50, 5)]),
            (&[2, 2, 3, 3, 5, 5], &[(1500, 6), (100, 4), (50, 5)]),
            (&[2, 3, 5, 5, 5], &[(500, 2), (100, 3), (50, 4)]),
            (&[6], &[(0, BUST)]),
            (&[6, 6], &[(0, BUST)]),
            (&[1, 5], &[(50, 1), (100, 1), (150, 6)]),
            (&[1, 3, 5], &[(50, 2), (100, 2), (150, 1)]),
            (&[2, 2, 5, 6], &[(50, 3)]),
            (&[2, 2, 3, 3, 4, 6], &[(0, BUST)]),
            (&[6, 6, 6, 6, 6], &[(2400, 6), (1200, 1), (600, 2)]),
            (&[1, 1, 2, 2, 3], &[(100, 4), (200, 3)]),
            (
                &[1, 1, 2, 2, 3, 5],
                &[(50, 5), (100, 5), (200, 4), (150, 4), (250, 3)],
            ),
            (&[1, 1, 2, 2, 3, 3], &[(100, 5), (200, 4), (1500, 6)]),
            (
                &[1, 1, 2, 3, 3, 3],
                &[(100, 5), (200, 4), (300, 3), (400, 2), (500, 1)],
            ),
            (
                &[1, 1, 1, 5, 5, 5],
                &[
                    (50, 5),
                    (2 * 50, 4),
                    (500, 3),
                    (100, 5),
                    (100 + 50, 4),
                    (100 + 2 * 50, 3),
                    (100 + 500, 2),
                    (2 * 100, 4),
                    (2 * 100 + 50, 3),
                    (2 * 100 + 2 * 50, 2),
                    (2 * 100 + 500, 1),
                    (1000, 3),
                    (1000 + 50, 2),
                    (1000 + 2 * 50, 1),
                    (1000 + 500, 6),
                ],
            ),
        ];

        for &(faces, expected) in cases {
            assert_eq!(
                outcome_set(expected),
                get_all_outcomes(roll(faces)),
                "roll: {faces:?}"
            );
        }
    }

    #[test]
    fn test_get_best_outcomes() {
        let cases: &[(&[u8], &[(Score, u8)])] = &[
            (&[1, 2, 3, 4, 5, 6], &[(2000, 6), (150, 4), (100, 5)]),
            (&[2, 2, 3, 3, 5, 5], &[(1500, 6), (100, 4), (50, 5)]),
            (&[2, 3, 5, 5, 5], &[(500, 2), (100, 3), (50, 4)]),
            (&[6], &[(0, BUST)]),
            (&[6, 6], &[(0, BUST)]),
            (&[1, 5], &[(100, 1), (150, 6)]),
            (&[1, 3, 5], &[(100, 2), (150, 1)]),
            (&[2, 2, 5, 6], &[(50, 3)]),
            (&[2, 2, 3, 3, 4, 6], &[(0, BUST)]),
            (&[6, 6, 6, 6, 6], &[(2400, 6), (1200, 1), (600, 2)]),
            (&[1, 1, 2, 2, 3], &[(100, 4), (200, 3)]),
            (&[1, 1, 2, 2, 3, 5], &[(100, 5), (200, 4), (250, 3)]),
            (&[1, 1, 2, 2, 3, 3], &[(100, 5), (200, 4), (1500, 6)]),
            (
                &[1, 1, 2, 3, 3, 3],
                &[(100, 5), (200, 4), (300, 3), (400, 2), (500, 1)],
            ),
            (
                &[1, 1, 1, 5, 5, 5],
                &[
                    (1000 + 500, 6),
                    (100, 5),
                    (2 * 100, 4),
                    (1000, 3),
                    (1000 + 50, 2),
                    (1000 + 2 * 50, 1),
                ],
            ),
        ];

        for &(faces, expected) in cases {
            let best = get_best_outcomes(roll(faces));
            assert_eq!(class(expected), best, "roll: {faces:?}");

            // sorted by (points, dice)
            assert!(is_total_order_by(best.iter(), |o1, o2| o1.partial_cmp(o2)));
        }
    }

    #[test]
    fn test_is_bust() {
        assert!(is_bust(roll(&[2, 4, 6])));
        assert!(is_bust(roll(&[2, 2, 3, 3, 4, 6])));
        assert!(!is_bust(roll(&[2, 2, 3, 3, 6, 6])));
        assert!(!is_bust(roll(&[2, 2, 2, 3, 4, 6])));
        assert!(!is_bust(roll(&[5])));

        assert!(get_best_outcomes(roll(&[6, 6])).is_bust());
        assert!(!get_best_outcomes(roll(&[6, 6, 6])).is_bust());
    }

    #[test]
    fn test_outcome_class_max_points() {
        // keeping both 5s (100, 1) loses to keeping a 1 and a 5 (150, 1)
        let best = get_best_outcomes(roll(&[1, 5, 5]));
        assert_eq!(class(&[(100, 2), (150, 1), (200, 6)]), best);
        assert_eq!(Some(Outcome::new(200, 6)), best.max_points());

        let best = get_best_outcomes(roll(&[1, 2, 5]));
        assert_eq!(Some(Outcome::new(150, 1)), best.max_points());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!("(0, bust)", Outcome::bust().to_string());
        assert_eq!("(150, 6)", Outcome::new(150, 6).to_string());
        assert_eq!(
            "{(100, 1), (150, 6)}",
            get_best_outcomes(roll(&[1, 5])).to_string()
        );
    }

    #[test]
    fn test_outcome_table() {
        let table = best_outcomes_per_dice_count();
        let expected_num_classes = [3, 6, 14, 31, 61, 119];

        for (dice_count, expected) in (1..=6).zip(expected_num_classes) {
            assert_eq!(num_ordered_rolls(dice_count), table.total_weight(dice_count));
            assert_eq!(expected, table.num_classes(dice_count));

            // classes are unique
            let unique = table
                .classes(dice_count)
                .iter()
                .map(|(class, _)| class)
                .collect::<BTreeSet<_>>();
            assert_eq!(expected, unique.len());
        }

        // same table every time
        assert!(std::ptr::eq(table, best_outcomes_per_dice_count()));

        // 1 die: bust (4 faces), a lone 1, or a lone 5
        assert_eq!(4, table.weight_of(1, &class(&[(0, BUST)])));
        assert_eq!(1, table.weight_of(1, &class(&[(100, 6)])));
        assert_eq!(1, table.weight_of(1, &class(&[(50, 6)])));
        assert_eq!(0, table.weight_of(1, &class(&[(200, 6)])));

        // the first class is from the first roll, [1, 1, .., 1]
        for dice_count in 1..=6 {
            let (first_roll, _) = generate_rolls(dice_count).unwrap().next().unwrap();
            assert_eq!(get_best_outcomes(first_roll), table.classes(dice_count)[0].0);
        }
    }

    #[test]
    fn test_outcome_table_matches_rolls() {
        let table = best_outcomes_per_dice_count();
        for dice_count in 1..=4 {
            let mut weights = HashMap::<OutcomeClass, Weight>::new();
            for (roll, weight) in generate_rolls(dice_count).unwrap() {
                *weights.entry(get_best_outcomes(roll)).or_default() += weight;
            }
            for (class, weight) in table.classes(dice_count) {
                assert_eq!(Some(weight), weights.get(class));
            }
        }
    }

    #[test]
    fn test_bust_probabilities() {
        let p_bust = bust_probabilities();

        assert_relative_eq!(4.0 / 6.0, p_bust[1]);
        assert_relative_eq!(16.0 / 36.0, p_bust[2]);
        assert_relative_eq!(60.0 / 216.0, p_bust[3]);
        assert_relative_eq!(204.0 / 1296.0, p_bust[4]);
        assert_relative_eq!(600.0 / 7776.0, p_bust[5]);
        assert_relative_eq!(1080.0 / 46656.0, p_bust[6]);
    }

    #[test]
    fn test_greedy_transitions() {
        let transitions = greedy_transitions();

        // a single die either busts or scores and gets a fresh set of 6
        assert_relative_eq!(4.0 / 6.0, transitions[1][BUST as usize]);
        assert_relative_eq!(2.0 / 6.0, transitions[1][6]);
        for dice_left in 1..=5 {
            assert_relative_eq!(0.0, transitions[1][dice_left]);
        }

        for (dice_count, row) in transitions.iter() {
            assert_relative_eq!(1.0, row.iter().sum::<f64>(), epsilon = 1e-12);
            assert_relative_eq!(bust_probabilities()[dice_count], row[BUST as usize]);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        #[test]
        fn test_prop_bust_iff_single_bust_outcome(r in any::<Roll>()) {
            let outcomes = generate_outcomes(r).collect::<Vec<_>>();
            prop_assert_eq!(is_bust(r), outcomes == vec![Outcome::bust()]);
        }

        #[test]
        fn test_prop_outcomes_valid(r in any::<Roll>()) {
            for outcome in generate_outcomes(r) {
                if outcome.is_bust() {
                    prop_assert_eq!(0, outcome.points);
                } else {
                    prop_assert!(outcome.points > 0);
                    prop_assert!((1..=MAX_DICE).contains(&outcome.dice));
                    // we can't end up with more dice than we rolled, unless we
                    // used all of them
                    prop_assert!(outcome.dice < r.len() || outcome.dice == MAX_DICE);
                }
            }
        }

        #[test]
        fn test_prop_best_outcomes_idempotent(r in any::<Roll>()) {
            let best = get_best_outcomes(r);
            prop_assert_eq!(&best, &OutcomeClass::from_outcomes(best.iter()));

            // at most one outcome per dice left
            prop_assert!(is_total_order_by(best.iter().map(|o| o.dice).sorted(), |d1, d2| d1.partial_cmp(d2)));

            // every best outcome is a real outcome with the max points for its
            // dice left
            let all = get_all_outcomes(r);
            for outcome in best.iter() {
                prop_assert!(all.contains(&outcome));
                prop_assert!(all.iter().filter(|o| o.dice == outcome.dice).all(|o| o.points <= outcome.points));
            }
        }
    }
}

use crate::{
    check_dice_count, factorial, is_sorted_by, multiset::MultisetU4x8, num_multisets,
    u32_any_nibs_between, Error, Result, Weight, MAX_DICE, NUM_FACES,
};
#[cfg(test)]
use proptest::{
    arbitrary::Arbitrary,
    strategy::{BoxedStrategy, Strategy},
};
use std::{fmt, iter::FusedIterator, str::FromStr};

//////////
// Roll //
//////////

/// A single roll of `1..=6` dice, stored as its face values sorted in ascending
/// order. Since the dice are indistinguishable, the sorted roll is the canonical
/// representative of every ordered sequence with the same faces (see
/// [`Roll::weight`]).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Roll {
    /// the faces, sorted. only `faces[..len]` is meaningful, the rest is zeroed.
    faces: [u8; MAX_DICE as usize],
    len: u8,
}

impl Roll {
    /// Build a `Roll` from faces that are already sorted in ascending order.
    ///
    /// Panics if the faces are unsorted, out of range, or if there are not
    /// `1..=6` of them. Callers are responsible for sorting; use [`Roll::new`]
    /// for unsorted or untrusted input.
    pub fn from_sorted_slice(faces: &[u8]) -> Self {
        assert!(
            (1..=MAX_DICE as usize).contains(&faces.len()),
            "roll must have 1 to 6 dice: {faces:?}"
        );
        assert!(
            is_sorted_by(faces.iter(), |f1, f2| f1.partial_cmp(f2)),
            "roll must be sorted: {faces:?}"
        );
        assert!(
            faces.iter().all(|face| (1..=NUM_FACES).contains(face)),
            "die faces must be in the range [1, 6]: {faces:?}"
        );

        let mut arr = [0; MAX_DICE as usize];
        arr[..faces.len()].copy_from_slice(faces);

        Self {
            faces: arr,
            len: faces.len() as u8,
        }
    }

    /// Build a `Roll` from an unordered list of faces.
    pub fn new(faces: &[u8]) -> Result<Self> {
        let len = u8::try_from(faces.len()).unwrap_or(u8::MAX);
        check_dice_count(len)?;

        if let Some(&face) = faces.iter().find(|face| !(1..=NUM_FACES).contains(*face)) {
            return Err(Error::InvalidFace(face));
        }

        let mut arr = [0; MAX_DICE as usize];
        arr[..faces.len()].copy_from_slice(faces);
        arr[..faces.len()].sort_unstable();

        Ok(Self { faces: arr, len })
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.faces[..self.len as usize]
    }

    /// The number of dice in this roll.
    #[inline]
    pub fn len(&self) -> u8 {
        self.len
    }

    /// Rolls always contain at least one die.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn face_counts(&self) -> FaceCounts {
        FaceCounts::from_roll(self)
    }

    /// Return the number of ordered sequences of six-sided dice that sort to
    /// this roll.
    ///
    /// let n = number of dice in the roll
    ///     W = n! / ∏_{i∈[1,6]} c_i!
    ///         where c_i is the count of face i in the roll
    pub fn weight(&self) -> Weight {
        let counts = self.face_counts();
        let prod: u32 = (1..=NUM_FACES)
            .map(|face| factorial(counts.get_count(face) as u32))
            .product();

        factorial(self.len as u32) / prod
    }
}

impl fmt::Debug for Roll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_slice().fmt(f)
    }
}

impl fmt::Display for Roll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, face) in self.as_slice().iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{face}")?;
        }
        f.write_str("]")
    }
}

/// Parse a comma/space/tab separated list of die faces into a `Roll`.
/// Enclosing brackets ('[' or ']') optional. Faces may also be written packed
/// together, e.g., `"1155"`.
impl FromStr for Roll {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.trim_start_matches('[');
        let s = s.trim_end_matches(']');

        let splitters = &[',', ' ', '\n', '\t'];

        let mut faces = Vec::with_capacity(MAX_DICE as usize);
        for face_str in s.split(splitters).filter(|s| !s.is_empty()) {
            for c in face_str.chars() {
                let face = c
                    .to_digit(10)
                    .ok_or_else(|| Error::InvalidRoll(format!("not a die face: '{c}'")))?;
                faces.push(face as u8);
            }
        }

        Self::new(&faces)
    }
}

#[cfg(test)]
impl Arbitrary for Roll {
    type Parameters = ();
    type Strategy = BoxedStrategy<Roll>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        proptest::collection::vec(1..=NUM_FACES, 1..=MAX_DICE as usize)
            .prop_map(|mut faces| {
                faces.sort_unstable();
                Roll::from_sorted_slice(&faces)
            })
            .boxed()
    }
}

////////////////
// FaceCounts //
////////////////

/// A compact representation of the face counts of a roll, i.e., how many 1s,
/// 2s, .., 6s it contains. Each count is a nibble packed into a u32:
///
/// `XXXX 6666 5555 4444 3333 2222 1111 XXXX`, where `XXXX`s are unused nibbles
/// and `NNNN` is the count of face `N`.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FaceCounts(MultisetU4x8);

impl FaceCounts {
    /// Selects the nibbles for faces 1 through 6.
    const ALL_FACES_MASK: u32 = 0x0111_1110;

    pub fn from_roll(roll: &Roll) -> Self {
        Self(MultisetU4x8::from_iter_flat(roll.as_slice().iter().copied()))
    }

    #[inline]
    pub fn get_count(self, face: u8) -> u8 {
        self.0.get_count(face)
    }

    /// The number of dice counted.
    #[inline]
    pub fn len(self) -> u8 {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0.is_empty()
    }

    /// The number of distinct faces present.
    #[inline]
    pub fn num_distinct(self) -> u8 {
        self.0.num_distinct()
    }

    /// Iterate over `(face, count)` for every face present, ascending by face.
    pub fn iter(self) -> impl Iterator<Item = (u8, u8)> {
        self.0
            .into_iter()
            .filter(|&(face, count)| (1..=NUM_FACES).contains(&face) && count > 0)
    }

    /// Is there any face with three or more of a kind?
    #[inline]
    pub fn has_n_of_a_kind(self) -> bool {
        // any nibble nb with 2 < nb < 8, i.e., a count of 3 or more
        u32_any_nibs_between(self.0.as_u32(), Self::ALL_FACES_MASK, 2, 8)
    }

    /// The full straight: `[1, 2, 3, 4, 5, 6]`.
    #[inline]
    pub fn is_straight(self) -> bool {
        self.len() == 6 && self.num_distinct() == 6
    }

    /// Exactly three distinct faces, each appearing exactly twice.
    #[inline]
    pub fn is_three_pairs(self) -> bool {
        self.num_distinct() == 3 && self.iter().all(|(_face, count)| count == 2)
    }

    /// A roll "busts" when there are no dice we are allowed to keep.
    pub fn is_bust(self) -> bool {
        // 1s and 5s always give points
        if self.get_count(1) > 0 || self.get_count(5) > 0 {
            return false;
        }

        // three or more of a kind always gives points
        if self.has_n_of_a_kind() {
            return false;
        }

        // the full straight is already handled by the 1s or 5s rule
        !self.is_three_pairs()
    }
}

impl fmt::Debug for FaceCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

///////////////
// RollsIter //
///////////////

/// Return an `Iterator` over every distinct (sorted) roll of `dice_count` dice,
/// in lexicographic order, along with each roll's [`Weight`]. The weights of
/// all the rolls sum to `6^dice_count`.
pub fn generate_rolls(dice_count: u8) -> Result<RollsIter> {
    check_dice_count(dice_count)?;
    Ok(RollsIter::new(dice_count))
}

/// An `Iterator` over combinations (with replacement) of die faces. The state
/// is just the _next_ roll we'll output.
#[derive(Clone, Debug)]
pub struct RollsIter {
    /// the _next_ roll we'll output (unless we're done).
    faces: [u8; MAX_DICE as usize],
    /// number of dice per roll.
    len: u8,
    /// number of rolls left to output.
    remaining: u32,
}

impl RollsIter {
    pub(crate) fn new(dice_count: u8) -> Self {
        debug_assert!((1..=MAX_DICE).contains(&dice_count));

        // initialize with the very first roll: [1, 1, .., 1]
        let mut faces = [0; MAX_DICE as usize];
        faces[..dice_count as usize].fill(1);

        Self {
            faces,
            len: dice_count,
            remaining: num_multisets(NUM_FACES as u32, dice_count as u32),
        }
    }

    /// patch `self.faces` to be the _next_ roll in lexicographic order.
    fn advance(&mut self) {
        let n = self.len as usize;
        let faces = &mut self.faces[..n];

        faces[n - 1] += 1;

        // carry from the back, then set all later positions to the value at the
        // position that absorbed the carry, so the roll stays sorted.
        for idx in (0..n).rev() {
            if faces[idx] <= NUM_FACES {
                let face = faces[idx];
                faces[idx + 1..].fill(face);
                return;
            }
            if idx == 0 {
                // we just passed [6, 6, .., 6]
                return;
            }
            faces[idx - 1] += 1;
        }
    }
}

impl Iterator for RollsIter {
    type Item = (Roll, Weight);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        // this is the roll we're about to output
        let roll = Roll {
            faces: self.faces,
            len: self.len,
        };

        self.remaining -= 1;
        if self.remaining > 0 {
            self.advance();
        }

        Some((roll, roll.weight()))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.remaining as usize;
        (len, Some(len))
    }
}

impl ExactSizeIterator for RollsIter {}

impl FusedIterator for RollsIter {}

///////////
// Tests //
///////////

#[cfg(test)]
mod test {
    use super::*;
    use crate::{is_total_order_by, num_combinations, num_ordered_rolls};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn roll(faces: &[u8]) -> Roll {
        Roll::from_sorted_slice(faces)
    }

    // simple recursive implementation
    fn all_rolls_ref(dice_count: u8) -> Vec<Vec<u8>> {
        fn rec(cb: &mut impl FnMut(Vec<u8>), acc: Vec<u8>, min_face: u8, dice_left: u8) {
            if dice_left == 0 {
                cb(acc);
                return;
            }
            for face in min_face..=6 {
                let mut next = acc.clone();
                next.push(face);
                rec(cb, next, face, dice_left - 1);
            }
        }

        let mut out = Vec::new();
        rec(&mut |faces| out.push(faces), Vec::new(), 1, dice_count);
        out
    }

    #[test]
    fn test_weight_sum() {
        for dice_count in 1..=6 {
            let weight_sum: u32 = generate_rolls(dice_count)
                .unwrap()
                .map(|(_roll, weight)| weight)
                .sum();
            assert_eq!(num_ordered_rolls(dice_count), weight_sum);
        }
    }

    #[test]
    fn test_num_unique_rolls() {
        for dice_count in 1..=6 {
            let rolls = generate_rolls(dice_count).unwrap();
            let expected = num_combinations(6 + dice_count as u32 - 1, dice_count as u32) as usize;
            assert_eq!(expected, rolls.len());

            let rolls = rolls.map(|(roll, _)| roll).collect::<Vec<_>>();
            assert_eq!(expected, rolls.len());

            // no duplicates
            let rolls_set = rolls.iter().copied().collect::<HashSet<_>>();
            assert_eq!(expected, rolls_set.len());
        }
    }

    #[test]
    fn test_rolls_sorted_and_lexicographic() {
        for dice_count in 1..=6 {
            let rolls = generate_rolls(dice_count)
                .unwrap()
                .map(|(roll, _)| roll)
                .collect::<Vec<_>>();

            for roll in &rolls {
                assert_eq!(dice_count, roll.len());
                assert!(is_sorted_by(roll.as_slice().iter(), |a, b| a.partial_cmp(b)));
            }

            assert!(is_total_order_by(rolls.iter(), |r1, r2| r1
                .as_slice()
                .partial_cmp(r2.as_slice())));

            // matches recursive implementation
            let rolls = rolls
                .iter()
                .map(|roll| roll.as_slice().to_vec())
                .collect::<Vec<_>>();
            assert_eq!(all_rolls_ref(dice_count), rolls);
        }
    }

    #[test]
    fn test_rolls_iter_fused() {
        let mut rolls = generate_rolls(1).unwrap();
        assert_eq!(6, rolls.by_ref().count());
        assert_eq!(None, rolls.next());
        assert_eq!(None, rolls.next());
    }

    #[test]
    fn test_generate_rolls_invalid() {
        assert_eq!(Err(Error::InvalidDiceCount(0)), generate_rolls(0).map(|_| ()));
        assert_eq!(Err(Error::InvalidDiceCount(7)), generate_rolls(7).map(|_| ()));
    }

    #[test]
    fn test_roll_weight() {
        assert_eq!(1, roll(&[6]).weight());
        assert_eq!(1, roll(&[1, 1, 1, 1, 1, 1]).weight());
        assert_eq!(2, roll(&[1, 5]).weight());
        assert_eq!(720, roll(&[1, 2, 3, 4, 5, 6]).weight());
        assert_eq!(90, roll(&[1, 1, 2, 2, 3, 3]).weight());
        assert_eq!(1, roll(&[6, 6, 6, 6, 6]).weight());
        assert_eq!(5, roll(&[5, 6, 6, 6, 6]).weight());
        assert_eq!(30, roll(&[2, 2, 3, 3, 5]).weight());
    }

    #[test]
    fn test_roll_new() {
        assert_eq!(Ok(roll(&[1, 3, 5])), Roll::new(&[5, 1, 3]));
        assert_eq!(Err(Error::InvalidDiceCount(0)), Roll::new(&[]));
        assert_eq!(Err(Error::InvalidDiceCount(7)), Roll::new(&[1; 7]));
        assert_eq!(Err(Error::InvalidFace(7)), Roll::new(&[1, 7]));
        assert_eq!(Err(Error::InvalidFace(0)), Roll::new(&[0]));
    }

    #[test]
    #[should_panic]
    fn test_roll_from_unsorted_slice() {
        Roll::from_sorted_slice(&[3, 1, 2]);
    }

    #[test]
    fn test_roll_from_str() {
        assert_eq!(Ok(roll(&[1, 2, 5])), Roll::from_str("[1,2,5]"));
        assert_eq!(Ok(roll(&[1, 2, 5])), Roll::from_str("5 2 1"));
        assert_eq!(Ok(roll(&[1, 2, 5])), Roll::from_str("[5, 2,\t1]"));
        assert_eq!(Ok(roll(&[1, 1, 5, 5])), Roll::from_str("1155"));
        assert!(Roll::from_str("[1,x]").is_err());
        assert!(Roll::from_str("[]").is_err());
        assert!(Roll::from_str("1234567").is_err());
        assert_eq!(Err(Error::InvalidFace(9)), Roll::from_str("9"));

        assert_eq!("[1, 2, 5]", roll(&[1, 2, 5]).to_string());
        assert_eq!("[1, 2, 5]", format!("{:?}", roll(&[1, 2, 5])));
    }

    #[test]
    fn test_face_counts() {
        let counts = roll(&[2, 3, 5, 5, 5]).face_counts();
        assert_eq!(5, counts.len());
        assert_eq!(3, counts.num_distinct());
        assert_eq!(3, counts.get_count(5));
        assert_eq!(0, counts.get_count(1));
        assert_eq!(vec![(2, 1), (3, 1), (5, 3)], counts.iter().collect::<Vec<_>>());
        assert!(counts.has_n_of_a_kind());
        assert!(!roll(&[2, 2, 3, 3, 5]).face_counts().has_n_of_a_kind());

        assert!(roll(&[1, 2, 3, 4, 5, 6]).face_counts().is_straight());
        assert!(!roll(&[1, 2, 3, 4, 5, 5]).face_counts().is_straight());
        assert!(roll(&[2, 2, 3, 3, 6, 6]).face_counts().is_three_pairs());
        assert!(!roll(&[2, 2, 2, 2, 6, 6]).face_counts().is_three_pairs());
    }

    #[test]
    fn test_face_counts_is_bust() {
        let cases: &[(&[u8], bool)] = &[
            (&[6], true),
            (&[6, 6], true),
            (&[2, 4, 6], true),
            (&[2, 4, 4, 6], true),
            (&[2, 4, 4, 6, 6], true),
            (&[2, 2, 3, 3, 4, 6], true),
            (&[1, 2, 3, 4, 5, 6], false),
            (&[2, 2, 2, 3, 4, 6], false),
            (&[2, 2, 3, 3, 5, 5], false),
            (&[2, 2, 3, 3, 6, 6], false),
            (&[2, 3, 5, 5, 5], false),
            (&[1, 5], false),
            (&[1, 3, 5], false),
            (&[2, 2, 5, 6], false),
            (&[6, 6, 6, 6, 6], false),
            (&[1, 1, 2, 2, 3], false),
            (&[1, 1, 1, 5, 5, 5], false),
        ];

        for &(faces, bust) in cases {
            assert_eq!(bust, roll(faces).face_counts().is_bust(), "roll: {faces:?}");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        #[test]
        fn test_prop_face_counts_len(r in any::<Roll>()) {
            prop_assert_eq!(r.len(), r.face_counts().len());
            prop_assert_eq!(
                r.face_counts().iter().map(|(_, count)| count).sum::<u8>(),
                r.len()
            );
        }

        #[test]
        fn test_prop_roll_parse(r in any::<Roll>()) {
            prop_assert_eq!(Ok(r), r.to_string().parse::<Roll>());
        }
    }
}

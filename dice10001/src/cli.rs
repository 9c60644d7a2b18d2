use crate::{
    dice::Roll,
    num_multisets, num_ordered_rolls,
    outcome::{
        best_outcomes_per_dice_count, bust_probabilities, get_all_outcomes, get_best_outcomes,
        greedy_transitions, Outcome, BUST,
    },
    search::{Cache, EvSearch, ReachSearch},
    DiceMap, Score, TotalSize, DEFAULT_EV_DEPTH, DEFAULT_LIMIT, DEFAULT_MAX_TABLE_SCORE,
    DEFAULT_TARGET, MAX_DICE, MAX_EV_DEPTH, MAX_SCORE, MAX_TARGET, NUM_FACES, SCORE_STEP,
};
use bytesize::ByteSize;
use std::{fmt, hash::Hash, iter, str::FromStr};
use tabular::{row, Row, Table};
use trice::Instant;

///////////////////////////
// String parser helpers //
///////////////////////////

fn parse_req<T>(label: &'static str, s: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    T::from_str(s).map_err(|err| format!("invalid {label}: {err}"))
}

fn parse_opt<T>(label: &'static str, opt_s: Option<&str>) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    opt_s
        .map(T::from_str)
        .transpose()
        .map_err(|err| format!("invalid {label}: {err}"))
}

//////////////////////
// CLI Args Wrapper //
//////////////////////

pub struct Args(pico_args::Arguments);

impl Args {
    pub fn new(inner: pico_args::Arguments) -> Self {
        Self(inner)
    }

    fn subcommand(&mut self) -> Result<Option<String>, String> {
        self.0.subcommand().map_err(|err| err.to_string())
    }

    fn opt_value(&mut self, keys: impl Into<pico_args::Keys>) -> Result<Option<String>, String> {
        self.0
            .opt_value_from_fn(keys, |s| Result::<_, pico_args::Error>::Ok(s.to_owned()))
            .map_err(|err| err.to_string())
    }

    fn free_value(&mut self) -> Result<String, String> {
        self.0
            .free_from_fn(|s| Result::<_, pico_args::Error>::Ok(s.to_owned()))
            .map_err(|err| err.to_string())
    }

    fn flag(&mut self, keys: impl Into<pico_args::Keys>) -> bool {
        self.0.contains(keys)
    }

    fn expect_finished(self) -> Result<(), String> {
        let remaining = self.0.finish();
        if !remaining.is_empty() {
            Err(format!("unexpected arguments left: '{:?}'", remaining))
        } else {
            Ok(())
        }
    }

    fn maybe_help(&mut self, usage: &str) {
        if self.0.contains(["-h", "--help"]) {
            print!("{}", usage);
            std::process::exit(0);
        }
    }
}

/////////////
// Metrics //
/////////////

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Metrics(pub Vec<(String, String)>);

impl Metrics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, label: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.push((label.into(), value.into()));
        self
    }

    /// Push the size and hit rate of a search memo table.
    pub fn push_cache<K, V>(&mut self, label: &str, cache: &Cache<K, V>) -> &mut Self
    where
        K: Eq + Hash + TotalSize,
        V: Clone + TotalSize,
    {
        self.push(
            format!("{label} cache size"),
            format!(
                "{} ({})",
                cache.cache_size(),
                ByteSize(cache.cache_size_bytes() as u64),
            ),
        );
        self.push(
            format!("{label} cache hit rate"),
            format!(
                "{:0.3} (h: {}, m: {})",
                cache.cache_hit_rate(),
                cache.cache_hits(),
                cache.cache_misses(),
            ),
        )
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new("{:>}  {:<}");

        for (label, value) in &self.0 {
            table.add_row(row!(label, value));
        }

        table
    }
}

////////////
// Tables //
////////////

fn row_from_cells(cells: impl Iterator<Item = String>) -> Row {
    let mut row = Row::new();
    for cell in cells {
        row.add_cell(cell);
    }
    row
}

/// A table with one column per dice count, from 6 dice down to 1, and a label
/// column on the left.
fn dice_count_table(heading: &str) -> Table {
    let spec = iter::repeat("{:>}")
        .take(MAX_DICE as usize + 1)
        .collect::<Vec<_>>()
        .join("  ");

    let mut table = Table::new(&spec);
    table.add_row(row_from_cells(
        iter::once(heading.to_owned()).chain((1..=MAX_DICE).rev().map(|d| d.to_string())),
    ));
    table
}

fn dice_map_row<T>(
    label: impl Into<String>,
    map: &DiceMap<T>,
    fmt_cell: impl Fn(&T) -> String,
) -> Row {
    row_from_cells(iter::once(label.into()).chain(map.iter().rev().map(|(_, v)| fmt_cell(v))))
}

fn fmt_percent(p: &f64) -> String {
    format!("{:.2}%", p * 100.0)
}

/// The scores `0, 50, .., max_score`.
fn table_scores(max_score: Score) -> impl Iterator<Item = Score> {
    (0..=max_score).step_by(SCORE_STEP as usize)
}

/// The generic command output: a title, a table, and some metrics about how we
/// got there.
pub struct Report {
    pub title: String,
    pub table: Table,
    pub metrics: Metrics,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\n{}\n\n{}", self.title, self.table)?;
        if !self.metrics.0.is_empty() {
            write!(f, "\n{}", self.metrics.to_table())?;
        }
        Ok(())
    }
}

///////////////////
// Command trait //
///////////////////

pub trait Command: Sized {
    const USAGE: &'static str;

    type Output: fmt::Display;

    fn try_from_cli_args(args: Args) -> Result<Self, String>;
    fn run(self) -> Result<Self::Output, String>;
}

/////////////////////
// OutcomesCommand //
/////////////////////

#[derive(Clone, Debug)]
pub struct OutcomesCommand {
    roll: Roll,
}

impl OutcomesCommand {
    pub fn try_from_str_args(roll: &str) -> Result<Self, String> {
        Ok(Self {
            roll: parse_req("roll", roll)?,
        })
    }
}

impl Command for OutcomesCommand {
    const USAGE: &'static str = "\
dice10001 outcomes - list every way to score a roll

USAGE:
    dice10001 outcomes <roll>

EXAMPLES:
    dice10001 outcomes [1,1,2,3,5,6]
    dice10001 outcomes 115
";

    type Output = OutcomesCommandOutput;

    fn try_from_cli_args(mut args: Args) -> Result<Self, String> {
        args.maybe_help(Self::USAGE);

        let roll = args.free_value()?;
        args.expect_finished()?;

        Self::try_from_str_args(&roll)
    }

    fn run(self) -> Result<Self::Output, String> {
        let best = get_best_outcomes(self.roll);

        // most points first
        let outcomes = get_all_outcomes(self.roll)
            .into_iter()
            .rev()
            .map(|outcome| (outcome, best.iter().any(|b| b == outcome)))
            .collect();

        Ok(OutcomesCommandOutput {
            roll: self.roll,
            outcomes,
        })
    }
}

#[derive(Clone, Debug)]
pub struct OutcomesCommandOutput {
    pub roll: Roll,
    /// every outcome, and whether it's one of the roll's best outcomes
    pub outcomes: Vec<(Outcome, bool)>,
}

impl fmt::Display for OutcomesCommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new("{:>}  {:>}  {:<}").with_row(row!("points", "dice left", "best"));

        for &(outcome, is_best) in &self.outcomes {
            let dice_left = if outcome.dice == BUST {
                "bust".to_owned()
            } else {
                outcome.dice.to_string()
            };
            table.add_row(row!(outcome.points, dice_left, if is_best { "*" } else { "" }));
        }

        write!(
            f,
            "\nroll: {} (weight: {})\n\n{}",
            self.roll,
            self.roll.weight(),
            table
        )
    }
}

////////////////////
// ClassesCommand //
////////////////////

#[derive(Clone, Debug)]
pub struct ClassesCommand;

impl Command for ClassesCommand {
    const USAGE: &'static str = "\
dice10001 classes - count the distinct rolls and outcome classes per dice count

USAGE:
    dice10001 classes
";

    type Output = Report;

    fn try_from_cli_args(mut args: Args) -> Result<Self, String> {
        args.maybe_help(Self::USAGE);

        args.expect_finished()?;
        Ok(Self)
    }

    fn run(self) -> Result<Self::Output, String> {
        let start_time = Instant::now();
        let outcome_table = best_outcomes_per_dice_count();
        let duration = start_time.elapsed();

        let ordered = DiceMap::from_fn(num_ordered_rolls);
        let unordered = DiceMap::from_fn(|d| num_multisets(NUM_FACES as u32, d as u32));
        let classes = DiceMap::from_fn(|d| outcome_table.num_classes(d));

        let mut table = dice_count_table("dice");
        table.add_row(dice_map_row("ordered rolls", &ordered, u32::to_string));
        table.add_row(dice_map_row("unordered rolls", &unordered, u32::to_string));
        table.add_row(dice_map_row("outcome classes", &classes, usize::to_string));

        let mut metrics = Metrics::new();
        metrics.push("outcome table duration", format!("{:.2?}", duration));

        Ok(Report {
            title: "Distinct rolls vs. outcome classes for each dice count:".to_owned(),
            table,
            metrics,
        })
    }
}

////////////////////////
// BustChancesCommand //
////////////////////////

#[derive(Clone, Debug)]
pub struct BustChancesCommand;

impl Command for BustChancesCommand {
    const USAGE: &'static str = "\
dice10001 bust-chances - the probability of busting for each dice count

USAGE:
    dice10001 bust-chances
";

    type Output = Report;

    fn try_from_cli_args(mut args: Args) -> Result<Self, String> {
        args.maybe_help(Self::USAGE);

        args.expect_finished()?;
        Ok(Self)
    }

    fn run(self) -> Result<Self::Output, String> {
        let mut table = dice_count_table("dice");
        table.add_row(dice_map_row("p bust", &bust_probabilities(), fmt_percent));

        Ok(Report {
            title: "Chance to bust for given dice count:".to_owned(),
            table,
            metrics: Metrics::new(),
        })
    }
}

/////////////////////
// StrategyCommand //
/////////////////////

#[derive(Clone, Debug)]
pub struct StrategyCommand;

impl Command for StrategyCommand {
    const USAGE: &'static str = "\
dice10001 strategy - dice left after each roll when always taking the most points

USAGE:
    dice10001 strategy

Each column is the number of dice rolled, each row the number of dice left
after scoring (or busting).
";

    type Output = Report;

    fn try_from_cli_args(mut args: Args) -> Result<Self, String> {
        args.maybe_help(Self::USAGE);

        args.expect_finished()?;
        Ok(Self)
    }

    fn run(self) -> Result<Self::Output, String> {
        let transitions = greedy_transitions();

        let mut table = dice_count_table("from");
        for to in iter::once(BUST).chain(1..=MAX_DICE) {
            let label = if to == BUST {
                "to bust".to_owned()
            } else {
                format!("to {to}")
            };
            table.add_row(dice_map_row(label, &transitions, |row| {
                fmt_percent(&row[to as usize])
            }));
        }

        Ok(Report {
            title: "Greedy (max points) strategy transitions:".to_owned(),
            table,
            metrics: Metrics::new(),
        })
    }
}

//////////////////////
// MinScoresCommand //
//////////////////////

fn parse_depth(depth: Option<&str>) -> Result<u32, String> {
    let depth = parse_opt("depth", depth)?.unwrap_or(DEFAULT_EV_DEPTH);
    if !(1..=MAX_EV_DEPTH).contains(&depth) {
        return Err(format!("the search depth must be in the range [1, {MAX_EV_DEPTH}]"));
    }
    Ok(depth)
}

#[derive(Clone, Debug)]
pub struct MinScoresCommand {
    limit: Score,
    depth: u32,
}

impl MinScoresCommand {
    pub fn try_from_str_args(limit: Option<&str>, depth: Option<&str>) -> Result<Self, String> {
        Ok(Self {
            limit: parse_opt("limit", limit)?.unwrap_or(DEFAULT_LIMIT),
            depth: parse_depth(depth)?,
        })
    }
}

impl Command for MinScoresCommand {
    const USAGE: &'static str = "\
dice10001 min-scores - the score at which rolling again has a negative expected value

USAGE:
    dice10001 min-scores [option ...]

OPTIONS:
    · --limit / -l score (default: 0)
      Busting below this score costs nothing. Use 1000 to approximate a turn
      that must reach 1000 points to count at all.

    · --depth / -d depth (default: 400)
      The maximum number of rolls the search looks ahead.
";

    type Output = Report;

    fn try_from_cli_args(mut args: Args) -> Result<Self, String> {
        args.maybe_help(Self::USAGE);

        let limit = args.opt_value(["-l", "--limit"])?;
        let depth = args.opt_value(["-d", "--depth"])?;
        args.expect_finished()?;

        Self::try_from_str_args(limit.as_deref(), depth.as_deref())
    }

    fn run(self) -> Result<Self::Output, String> {
        let mut search = EvSearch::with_depth_max(self.depth).map_err(|err| err.to_string())?;

        let start_time = Instant::now();
        let evs = search
            .estimate_evs(0, self.limit, true)
            .map_err(|err| err.to_string())?;
        let min_scores = search.min_score_for_negative_ev();
        let search_duration = start_time.elapsed();

        let mut table = dice_count_table("dice");
        table.add_row(dice_map_row("ev @ 0", &evs, |ev| format!("{ev:.2}")));
        table.add_row(dice_map_row("min score", &min_scores, Score::to_string));

        let mut metrics = Metrics::new();
        metrics.push("search duration", format!("{:.2?}", search_duration));
        metrics.push("search depth", search.depth_max().to_string());
        metrics.push_cache("ev", search.cache());

        Ok(Report {
            title: format!(
                "Minimum score for negative EV at given dice count (limit: {}):",
                self.limit
            ),
            table,
            metrics,
        })
    }
}

////////////////////
// EvTableCommand //
////////////////////

#[derive(Clone, Debug)]
pub struct EvTableCommand {
    limit: Score,
    depth: u32,
    net_ev: bool,
    max_score: Score,
}

impl EvTableCommand {
    pub fn try_from_str_args(
        limit: Option<&str>,
        depth: Option<&str>,
        net_ev: bool,
        max_score: Option<&str>,
    ) -> Result<Self, String> {
        let max_score = parse_opt("max score", max_score)?.unwrap_or(DEFAULT_MAX_TABLE_SCORE);
        if max_score > MAX_SCORE {
            return Err(format!("the max score must be at most {MAX_SCORE}"));
        }

        Ok(Self {
            limit: parse_opt("limit", limit)?.unwrap_or(DEFAULT_LIMIT),
            depth: parse_depth(depth)?,
            net_ev,
            max_score,
        })
    }
}

impl Command for EvTableCommand {
    const USAGE: &'static str = "\
dice10001 ev-table - the expected value of rolling for each dice count and score

USAGE:
    dice10001 ev-table [option ...]

OPTIONS:
    · --limit / -l score (default: 0)
      Busting below this score costs nothing.

    · --depth / -d depth (default: 400)
      The maximum number of rolls the search looks ahead.

    · --net / -n
      Show the expected gain from rolling again, instead of the expected total
      for the whole turn.

    · --max-score / -m score (default: 1000)
      The last row of the table. Rows go up in steps of 50.
";

    type Output = Report;

    fn try_from_cli_args(mut args: Args) -> Result<Self, String> {
        args.maybe_help(Self::USAGE);

        let limit = args.opt_value(["-l", "--limit"])?;
        let depth = args.opt_value(["-d", "--depth"])?;
        let net_ev = args.flag(["-n", "--net"]);
        let max_score = args.opt_value(["-m", "--max-score"])?;
        args.expect_finished()?;

        Self::try_from_str_args(limit.as_deref(), depth.as_deref(), net_ev, max_score.as_deref())
    }

    fn run(self) -> Result<Self::Output, String> {
        let mut search = EvSearch::with_depth_max(self.depth).map_err(|err| err.to_string())?;

        let start_time = Instant::now();
        let mut table = dice_count_table("score");
        for score in table_scores(self.max_score) {
            let evs = search
                .estimate_evs(score, self.limit, self.net_ev)
                .map_err(|err| err.to_string())?;
            table.add_row(dice_map_row(score.to_string(), &evs, |ev| {
                if self.net_ev {
                    format!("{ev:.2}")
                } else {
                    format!("{ev:.1}")
                }
            }));
        }
        let search_duration = start_time.elapsed();

        let mut metrics = Metrics::new();
        metrics.push("search duration", format!("{:.2?}", search_duration));
        metrics.push("search depth", search.depth_max().to_string());
        metrics.push_cache("ev", search.cache());

        let what = if self.net_ev {
            "Expected gain from rolling again"
        } else {
            "Expected value for the whole turn"
        };

        Ok(Report {
            title: format!("{what} for given dice count/score (limit: {}):", self.limit),
            table,
            metrics,
        })
    }
}

///////////////////////
// ReachTableCommand //
///////////////////////

#[derive(Clone, Debug)]
pub struct ReachTableCommand {
    target: Score,
    max_score: Score,
}

impl ReachTableCommand {
    pub fn try_from_str_args(target: Option<&str>, max_score: Option<&str>) -> Result<Self, String> {
        let target = parse_opt("target", target)?.unwrap_or(DEFAULT_TARGET);
        let max_score = parse_opt("max score", max_score)?.unwrap_or(target);

        if target == 0 {
            return Err("the target score must be positive".to_owned());
        }
        if target > MAX_TARGET {
            return Err(format!("the target score must be at most {MAX_TARGET}"));
        }

        Ok(Self { target, max_score })
    }
}

impl Command for ReachTableCommand {
    const USAGE: &'static str = "\
dice10001 reach-table - the chance to reach a target score for each dice count and score

USAGE:
    dice10001 reach-table [option ...]

OPTIONS:
    · --target / -t score (default: 1000)
      The turn total we're trying to reach.

    · --max-score / -m score (default: the target)
      The last row of the table. Rows go up in steps of 50.
";

    type Output = Report;

    fn try_from_cli_args(mut args: Args) -> Result<Self, String> {
        args.maybe_help(Self::USAGE);

        let target = args.opt_value(["-t", "--target"])?;
        let max_score = args.opt_value(["-m", "--max-score"])?;
        args.expect_finished()?;

        Self::try_from_str_args(target.as_deref(), max_score.as_deref())
    }

    fn run(self) -> Result<Self::Output, String> {
        let mut search = ReachSearch::new();

        let start_time = Instant::now();
        let mut table = dice_count_table("score");
        for score in table_scores(self.max_score) {
            let chances = search
                .estimate_chances_to_reach(score, self.target)
                .map_err(|err| err.to_string())?;
            table.add_row(dice_map_row(score.to_string(), &chances, fmt_percent));
        }
        let search_duration = start_time.elapsed();

        let mut metrics = Metrics::new();
        metrics.push("search duration", format!("{:.2?}", search_duration));
        metrics.push_cache("reach", search.cache());

        Ok(Report {
            title: format!(
                "Chance to reach {} points for given dice count/score:",
                self.target
            ),
            table,
            metrics,
        })
    }
}

/////////////////
// BaseCommand //
/////////////////

pub enum BaseCommand {
    Outcomes(OutcomesCommand),
    Classes(ClassesCommand),
    BustChances(BustChancesCommand),
    Strategy(StrategyCommand),
    MinScores(MinScoresCommand),
    EvTable(EvTableCommand),
    ReachTable(ReachTableCommand),
}

impl Command for BaseCommand {
    const USAGE: &'static str = "\
dice10001 - A utility for analyzing the dice game 10001!

USAGE:
    dice10001 [option ...] <subcommand>

SUBCOMMANDS:
    · dice10001 outcomes - list every way to score a roll
    · dice10001 classes - count the distinct rolls and outcome classes per dice count
    · dice10001 bust-chances - the probability of busting for each dice count
    · dice10001 strategy - dice left after each roll when always taking the most points
    · dice10001 min-scores - the score at which rolling again has a negative expected value
    · dice10001 ev-table - the expected value of rolling for each dice count and score
    · dice10001 reach-table - the chance to reach a target score for each dice count and score

Set RUST_LOG=debug to see what the searches are up to.
";

    type Output = String;

    fn try_from_cli_args(mut args: Args) -> Result<Self, String> {
        let maybe_subcommand = args.subcommand()?;

        match maybe_subcommand.as_deref() {
            Some("outcomes") => Ok(Self::Outcomes(OutcomesCommand::try_from_cli_args(args)?)),
            Some("classes") => Ok(Self::Classes(ClassesCommand::try_from_cli_args(args)?)),
            Some("bust-chances") => Ok(Self::BustChances(
                BustChancesCommand::try_from_cli_args(args)?,
            )),
            Some("strategy") => Ok(Self::Strategy(StrategyCommand::try_from_cli_args(args)?)),
            Some("min-scores") => Ok(Self::MinScores(MinScoresCommand::try_from_cli_args(
                args,
            )?)),
            Some("ev-table") => Ok(Self::EvTable(EvTableCommand::try_from_cli_args(args)?)),
            Some("reach-table") => Ok(Self::ReachTable(ReachTableCommand::try_from_cli_args(
                args,
            )?)),
            Some(command) => Err(format!("'{}' is not a recognized command", command)),
            None => {
                args.maybe_help(Self::USAGE);
                Err("no subcommand specified".to_string())
            }
        }
    }

    fn run(self) -> Result<String, String> {
        match self {
            Self::Outcomes(cmd) => cmd.run().map(|out| out.to_string()),
            Self::Classes(cmd) => cmd.run().map(|out| out.to_string()),
            Self::BustChances(cmd) => cmd.run().map(|out| out.to_string()),
            Self::Strategy(cmd) => cmd.run().map(|out| out.to_string()),
            Self::MinScores(cmd) => cmd.run().map(|out| out.to_string()),
            Self::EvTable(cmd) => cmd.run().map(|out| out.to_string()),
            Self::ReachTable(cmd) => cmd.run().map(|out| out.to_string()),
        }
    }
}

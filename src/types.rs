use serde::{Deserialize, Serialize};

/// Position of a bin within a `RateModel`, in file row order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BinIndex(pub usize);

/// 1-based index of a Monte-Carlo trial within one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimulationIndex(pub u32);

impl SimulationIndex {
    pub const FIRST: SimulationIndex = SimulationIndex(1);

    /// Indices `1..=n`.
    pub fn range(n: u32) -> impl Iterator<Item = SimulationIndex> {
        (1..=n).map(SimulationIndex)
    }
}

/// Which draw within one trial a random stream serves.
///
/// Poisson-count trials draw the event count on iteration 1 and the
/// locations on iteration 2. Fixed-count trials draw locations on
/// iteration 1. The R-test shifts forecast 2's draws by two so the two
/// forecasts never share a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubIteration(pub u32);

impl SubIteration {
    pub const COUNT: SubIteration = SubIteration(1);
    pub const LOCATIONS: SubIteration = SubIteration(2);
    pub const FIXED_COUNT_LOCATIONS: SubIteration = SubIteration(1);

    pub fn offset(self, by: u32) -> Self {
        SubIteration(self.0 + by)
    }

    /// Odd iterations draw counts, even ones locations. Fixed-count location
    /// draws reuse iteration 1; their `SeedKey` is marked with
    /// `for_fixed_count` so they get a slice of their own.
    pub fn is_count_draw(self) -> bool {
        self.0 % 2 == 1
    }
}

/// Stable identifier of a forecast group (a directory of models evaluated together).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

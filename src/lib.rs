use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use instant::{Duration, Instant};
use bit_set::BitSet;
use smallvec::{SmallVec, smallvec};

/// The expected maximum number of slots appearing in a grid.
pub const MAX_VAR_COUNT: usize = 128;

/// The expected maximum length for a single word or slot.
pub const MAX_WORD_LENGTH: usize = 21;

/// An identifier for a slot, based on its index in the puzzle's `variables`
/// field.
pub type VarId = usize;

/// An identifier for a word, based on its index in the `WordList`.
pub type WordId = usize;

/// Zero-indexed (row, col) coords for a cell in the grid, where row 0 is the
/// top row.
type GridCoord = (usize, usize);

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Across,
    Down,
}

/// A single word-length run of fillable cells, identified by its starting
/// cell, direction, and length. Two variables are equal iff all four fields
/// match; the full set is derived once from the grid and never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variable {
    pub row: usize,
    pub col: usize,
    pub direction: Direction,
    pub length: usize,
}

impl Variable {
    /// Generate the coords for each cell of this slot.
    fn cell_coords(&self) -> Vec<GridCoord> {
        (0..self.length)
            .map(|cell_idx| match self.direction {
                Direction::Across => (self.row, self.col + cell_idx),
                Direction::Down => (self.row + cell_idx, self.col),
            })
            .collect()
    }
}

/// A dictionary entry that can be chosen for a slot. `letters` holds one byte
/// per cell; word lists are expected to be ASCII.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    pub letters: SmallVec<[u8; MAX_WORD_LENGTH]>,
}

/// The candidate dictionary, indexed by `WordId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordList {
    words: Vec<Word>,
}

impl WordList {
    /// Build a word list from an iterator of words. Words are uppercased and
    /// de-duplicated; the first occurrence keeps its position, so ids are
    /// stable across runs over the same input.
    pub fn from_words<I, S>(words: I) -> WordList
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut list: Vec<Word> = vec![];

        for word in words {
            let word = word.as_ref().trim().to_uppercase();
            if word.is_empty() || !seen.insert(word.clone()) {
                continue;
            }
            list.push(Word {
                letters: word.bytes().collect(),
                text: word,
            });
        }

        WordList { words: list }
    }

    /// Parse a one-word-per-line word list.
    pub fn parse(contents: &str) -> WordList {
        WordList::from_words(contents.lines())
    }

    pub fn word(&self, id: WordId) -> &Word {
        &self.words[id]
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Word> {
        self.words.iter()
    }
}

/// An immutable description of the grid: which cells are fillable, the slots
/// derived from them, and the crossing relation between slots.
///
/// Well-formed grids lay every slot out strictly horizontally or vertically,
/// so two slots share at most one cell; the constructors rely on that
/// invariant rather than checking it.
#[derive(Debug, Clone)]
pub struct Puzzle {
    pub height: usize,
    pub width: usize,
    fillable: Vec<bool>,
    variables: Vec<Variable>,
    // Row-major `var_count * var_count` matrix of overlap index pairs.
    overlaps: Vec<Option<(usize, usize)>>,
    neighbors: Vec<SmallVec<[VarId; MAX_WORD_LENGTH]>>,
}

impl Puzzle {
    /// Parse a grid template with `#` representing blocked cells and any
    /// other character representing fillable cells. Lines are trimmed and
    /// blank lines ignored, so fillable cells must be non-whitespace.
    pub fn from_template(template: &str) -> Result<Puzzle, String> {
        let rows: Vec<&str> = template
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        if rows.is_empty() {
            return Err(String::from("Template has no rows."));
        }

        let width = rows[0].chars().count();
        if rows.iter().any(|row| row.chars().count() != width) {
            return Err(String::from("Template rows have unequal widths."));
        }

        let fillable: Vec<bool> = rows
            .iter()
            .flat_map(|row| row.chars().map(|c| c != '#'))
            .collect();

        Ok(Puzzle::from_mask(rows.len(), width, fillable))
    }

    /// Build a puzzle directly from a row-major fillable-cell mask.
    pub fn from_mask(height: usize, width: usize, fillable: Vec<bool>) -> Puzzle {
        assert_eq!(height * width, fillable.len(), "Mask size mismatch");

        let mut variables: Vec<Variable> = vec![];

        // Across slots: maximal horizontal runs of at least two cells.
        for row in 0..height {
            let mut run_start: Option<usize> = None;
            for col in 0..=width {
                let open = col < width && fillable[row * width + col];
                if open && run_start.is_none() {
                    run_start = Some(col);
                }
                if !open {
                    if let Some(start) = run_start.take() {
                        if col - start >= 2 {
                            variables.push(Variable {
                                row,
                                col: start,
                                direction: Direction::Across,
                                length: col - start,
                            });
                        }
                    }
                }
            }
        }

        // Down slots: the same scan over columns.
        for col in 0..width {
            let mut run_start: Option<usize> = None;
            for row in 0..=height {
                let open = row < height && fillable[row * width + col];
                if open && run_start.is_none() {
                    run_start = Some(row);
                }
                if !open {
                    if let Some(start) = run_start.take() {
                        if row - start >= 2 {
                            variables.push(Variable {
                                row: start,
                                col,
                                direction: Direction::Down,
                                length: row - start,
                            });
                        }
                    }
                }
            }
        }

        // Slot ids are positions in this ordering, which also serves as the
        // final tie-break in the search heuristics.
        variables.sort_by_key(|var| (var.row, var.col, var.direction));

        // Map each cell to the slots covering it, then derive the overlap
        // table and neighbor lists from the cells covered twice.
        let mut slots_by_cell: HashMap<GridCoord, SmallVec<[(VarId, usize); 2]>> = HashMap::new();
        for (id, var) in variables.iter().enumerate() {
            for (cell_idx, coord) in var.cell_coords().into_iter().enumerate() {
                slots_by_cell
                    .entry(coord)
                    .or_insert_with(SmallVec::new)
                    .push((id, cell_idx));
            }
        }

        let var_count = variables.len();
        let mut overlaps: Vec<Option<(usize, usize)>> = vec![None; var_count * var_count];

        for covering in slots_by_cell.values() {
            for &(x, i) in covering {
                for &(y, j) in covering {
                    if x != y {
                        overlaps[x * var_count + y] = Some((i, j));
                    }
                }
            }
        }

        let mut neighbors: Vec<SmallVec<[VarId; MAX_WORD_LENGTH]>> = vec![smallvec![]; var_count];
        for x in 0..var_count {
            for y in 0..var_count {
                if overlaps[x * var_count + y].is_some() {
                    neighbors[x].push(y);
                }
            }
        }

        Puzzle {
            height,
            width,
            fillable,
            variables,
            overlaps,
            neighbors,
        }
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn var_count(&self) -> usize {
        self.variables.len()
    }

    pub fn variable(&self, id: VarId) -> Variable {
        self.variables[id]
    }

    pub fn is_fillable(&self, row: usize, col: usize) -> bool {
        self.fillable[row * self.width + col]
    }

    /// If slots `x` and `y` share a cell, the index of that cell within each
    /// slot's word, as `(index into x, index into y)`; `None` if they do not
    /// cross.
    pub fn overlap(&self, x: VarId, y: VarId) -> Option<(usize, usize)> {
        self.overlaps[x * self.var_count() + y]
    }

    /// All slots that cross `x`, in ascending id order.
    pub fn neighbors(&self, x: VarId) -> &[VarId] {
        &self.neighbors[x]
    }
}

/// The current candidate word set for each slot. Domains start out holding
/// the entire word list and are only ever shrunk; the search reads them
/// without narrowing, so no per-branch restore is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainStore {
    domains: Vec<BitSet>,
}

impl DomainStore {
    /// Start every slot with the entire word list as candidates.
    pub fn full(puzzle: &Puzzle, words: &WordList) -> DomainStore {
        let all: BitSet = (0..words.len()).collect();
        DomainStore {
            domains: vec![all; puzzle.var_count()],
        }
    }

    pub fn candidates(&self, var: VarId) -> impl Iterator<Item = WordId> + '_ {
        self.domains[var].iter()
    }

    pub fn len(&self, var: VarId) -> usize {
        self.domains[var].len()
    }

    pub fn is_empty(&self, var: VarId) -> bool {
        self.domains[var].is_empty()
    }

    pub fn contains(&self, var: VarId, word: WordId) -> bool {
        self.domains[var].contains(word)
    }

    pub fn remove(&mut self, var: VarId, word: WordId) {
        self.domains[var].remove(word);
    }
}

/// Remove every candidate whose length doesn't match its slot. Idempotent;
/// purely a filter, it cannot fail.
pub fn enforce_node_consistency(puzzle: &Puzzle, words: &WordList, domains: &mut DomainStore) {
    for var in 0..puzzle.var_count() {
        let length = puzzle.variable(var).length;

        // Collect first; the set can't be mutated while iterating it.
        let stale: Vec<WordId> = domains
            .candidates(var)
            .filter(|&word| words.word(word).letters.len() != length)
            .collect();

        for word in stale {
            domains.remove(var, word);
        }
    }
}

/// Count how many candidates for `var` place each letter at `cell_idx`,
/// indexed by byte value.
fn letter_counts_at(
    words: &WordList,
    domains: &DomainStore,
    var: VarId,
    cell_idx: usize,
) -> [u32; 256] {
    let mut counts = [0u32; 256];
    for word in domains.candidates(var) {
        counts[words.word(word).letters[cell_idx] as usize] += 1;
    }
    counts
}

/// Make `x` arc-consistent with `y`: remove every candidate of `x` with no
/// supporting candidate in `y` at the shared cell. Returns whether anything
/// was removed; `domains[y]` is never mutated, and nothing happens when the
/// slots don't cross.
///
/// Expects node-consistent domains, which keeps the letter indexing in
/// bounds.
pub fn revise(
    puzzle: &Puzzle,
    words: &WordList,
    domains: &mut DomainStore,
    x: VarId,
    y: VarId,
) -> bool {
    let (i, j) = match puzzle.overlap(x, y) {
        Some(overlap) => overlap,
        None => return false,
    };

    // A candidate for `x` survives iff at least one candidate for `y` puts
    // the same letter in the shared cell.
    let support = letter_counts_at(words, domains, y, j);

    let unsupported: Vec<WordId> = domains
        .candidates(x)
        .filter(|&word| support[words.word(word).letters[i] as usize] == 0)
        .collect();

    for &word in &unsupported {
        domains.remove(x, word);
    }

    !unsupported.is_empty()
}

/// Enforce arc consistency over the whole domain store. `arcs` seeds the
/// work queue; with `None`, every unordered pair of distinct slots is
/// enqueued once. Returns `false` as soon as any domain is wiped out (no
/// solution is possible under the current domains), `true` once the queue
/// drains.
pub fn ac3(
    puzzle: &Puzzle,
    words: &WordList,
    domains: &mut DomainStore,
    arcs: Option<VecDeque<(VarId, VarId)>>,
) -> bool {
    // Both directions of every pair are seeded. Revising only one direction
    // can leave the other endpoint holding unsupported words, since the
    // re-enqueue below never targets the arc's own partner.
    let mut queue = arcs.unwrap_or_else(|| {
        let var_count = puzzle.var_count();
        let mut queue = VecDeque::with_capacity(var_count * var_count);
        for x in 0..var_count {
            for y in (x + 1)..var_count {
                queue.push_back((x, y));
                queue.push_back((y, x));
            }
        }
        queue
    });

    while let Some((x, y)) = queue.pop_front() {
        if !revise(puzzle, words, domains, x, y) {
            continue;
        }

        if domains.is_empty(x) {
            return false;
        }

        // Shrinking `x` can break the established support of x's other
        // neighbors, so their arcs go back on the queue.
        for &neighbor in puzzle.neighbors(x) {
            if neighbor != y {
                queue.push_back((neighbor, x));
            }
        }
    }

    true
}

/// A partial mapping from slots to chosen words, built up and torn down by
/// the search.
#[derive(Debug, Clone)]
pub struct Assignment {
    words_by_var: Vec<Option<WordId>>,
    assigned: SmallVec<[VarId; MAX_VAR_COUNT]>,
}

impl Assignment {
    pub fn empty(puzzle: &Puzzle) -> Assignment {
        Assignment {
            words_by_var: vec![None; puzzle.var_count()],
            assigned: smallvec![],
        }
    }

    pub fn word_id(&self, var: VarId) -> Option<WordId> {
        self.words_by_var[var]
    }

    pub fn is_assigned(&self, var: VarId) -> bool {
        self.words_by_var[var].is_some()
    }

    /// Complete when every slot has an entry.
    pub fn is_complete(&self) -> bool {
        self.assigned.len() == self.words_by_var.len()
    }

    /// Set or overwrite the word for a slot.
    pub fn assign(&mut self, var: VarId, word: WordId) {
        if self.words_by_var[var].is_none() {
            self.assigned.push(var);
        }
        self.words_by_var[var] = Some(word);
    }

    pub fn unassign(&mut self, var: VarId) {
        if self.words_by_var[var].take().is_some() {
            self.assigned.retain(|v| *v != var);
        }
    }

    /// Iterate assigned (slot, word) pairs in assignment order.
    pub fn iter(&self) -> impl Iterator<Item = (VarId, WordId)> + '_ {
        self.assigned
            .iter()
            .filter_map(move |&var| self.words_by_var[var].map(|word| (var, word)))
    }
}

/// Check a partial assignment: every chosen word fits its slot, no word is
/// used twice, and crossing slots agree on the shared letter. Unassigned
/// slots impose no constraint, and the cost is proportional to the number of
/// assigned slots and their crossings, not the full slot set.
pub fn is_consistent(puzzle: &Puzzle, words: &WordList, assignment: &Assignment) -> bool {
    // Word lengths must match their slots. Checking this first also keeps
    // the overlap indexing below in bounds.
    for (var, word) in assignment.iter() {
        if words.word(word).letters.len() != puzzle.variable(var).length {
            return false;
        }
    }

    // No word may be used twice; `insert` reports an already-present id.
    let mut used = BitSet::with_capacity(words.len());
    for (_, word) in assignment.iter() {
        if !used.insert(word) {
            return false;
        }
    }

    // Crossing slots must agree on the shared letter.
    for (x, word) in assignment.iter() {
        let letters = &words.word(word).letters;
        for &y in puzzle.neighbors(x) {
            if let (Some(other), Some((i, j))) = (assignment.word_id(y), puzzle.overlap(x, y)) {
                if letters[i] != words.word(other).letters[j] {
                    return false;
                }
            }
        }
    }

    true
}

/// Pick the next slot to fill: fewest remaining candidates, then most
/// crossings, then lowest id. `None` when every slot is assigned.
pub fn select_unassigned_variable(
    puzzle: &Puzzle,
    domains: &DomainStore,
    assignment: &Assignment,
) -> Option<VarId> {
    (0..puzzle.var_count())
        .filter(|&var| !assignment.is_assigned(var))
        .min_by_key(|&var| (domains.len(var), Reverse(puzzle.neighbors(var).len()), var))
}

/// Candidate words for `var`, restricted to those that agree with every
/// already-assigned crossing slot, then sorted least-constraining first: by
/// how many candidates each word would knock out of the unassigned
/// crossings' domains. The sort is stable, so equal counts keep domain
/// order.
///
/// Returns `None` only when the assigned-crossing filter leaves nothing; a
/// slot with no crossings at all still returns its full domain.
pub fn order_domain_values(
    puzzle: &Puzzle,
    words: &WordList,
    domains: &DomainStore,
    assignment: &Assignment,
    var: VarId,
) -> Option<Vec<WordId>> {
    let mut candidates: Vec<WordId> = domains.candidates(var).collect();

    for &y in puzzle.neighbors(var) {
        let other = match assignment.word_id(y) {
            Some(other) => other,
            None => continue,
        };
        if let Some((i, j)) = puzzle.overlap(var, y) {
            let fixed = words.word(other).letters[j];
            candidates.retain(|&word| words.word(word).letters[i] == fixed);
        }
    }

    if candidates.is_empty() {
        return None;
    }

    // Letter counts for each unassigned crossing's shared cell. A candidate
    // putting letter L there rules out every crossing candidate that
    // doesn't, i.e. `remaining - counts[L]` of them.
    let crossing_support: Vec<(usize, usize, [u32; 256])> = puzzle
        .neighbors(var)
        .iter()
        .filter(|&&y| !assignment.is_assigned(y))
        .filter_map(|&y| {
            puzzle
                .overlap(var, y)
                .map(|(i, j)| (i, domains.len(y), letter_counts_at(words, domains, y, j)))
        })
        .collect();

    let mut ranked: Vec<(usize, WordId)> = candidates
        .into_iter()
        .map(|word| {
            let letters = &words.word(word).letters;
            let mut eliminated = 0;
            for &(i, remaining, ref counts) in &crossing_support {
                eliminated += remaining - counts[letters[i] as usize] as usize;
            }
            (eliminated, word)
        })
        .collect();
    ranked.sort_by_key(|&(eliminated, _)| eliminated);

    Some(ranked.into_iter().map(|(_, word)| word).collect())
}

/// A struct tracking counters about a completed search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    pub states: u64,
    pub backtracks: u64,
    pub duration: Duration,
}

/// Optional caps on the search. The default is unbounded; when a cap is hit
/// the solve reports failure the same way an exhausted search does, and the
/// caller never observes a partial assignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchBudget {
    pub max_states: Option<u64>,
    pub time_limit: Option<Duration>,
}

/// A slot assignment recorded in a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub var: VarId,
    pub word: WordId,
}

/// A complete, consistent fill: exactly one choice per slot, in slot id
/// order, plus counters from the search that produced it.
#[derive(Debug, Clone)]
pub struct Solution {
    pub choices: Vec<Choice>,
    pub statistics: Statistics,
}

impl Solution {
    /// The word chosen for the given slot.
    pub fn word<'w>(&self, words: &'w WordList, var: VarId) -> Option<&'w str> {
        self.choices
            .iter()
            .find(|choice| choice.var == var)
            .map(|choice| words.word(choice.word).text.as_str())
    }
}

struct Search<'s> {
    puzzle: &'s Puzzle,
    words: &'s WordList,
    domains: &'s DomainStore,
    budget: SearchBudget,
    started: Instant,
    statistics: Statistics,
    out_of_budget: bool,
}

impl<'s> Search<'s> {
    fn budget_exhausted(&mut self) -> bool {
        if !self.out_of_budget {
            let states_over = self
                .budget
                .max_states
                .map(|cap| self.statistics.states >= cap)
                .unwrap_or(false);
            let time_over = self
                .budget
                .time_limit
                .map(|cap| self.started.elapsed() >= cap)
                .unwrap_or(false);
            self.out_of_budget = states_over || time_over;
        }
        self.out_of_budget
    }

    /// Depth-first search over word choices. Returns whether `assignment`
    /// was extended to a complete consistent fill; on failure the
    /// assignment is restored to its state at entry. Recursion depth is
    /// bounded by the slot count.
    fn backtrack(&mut self, assignment: &mut Assignment) -> bool {
        if self.budget_exhausted() {
            return false;
        }
        self.statistics.states += 1;

        // Callers may hand us a tentatively-extended assignment; reject the
        // branch outright if the extension broke a constraint.
        if !is_consistent(self.puzzle, self.words, assignment) {
            return false;
        }

        if assignment.is_complete() {
            return true;
        }

        let var = match select_unassigned_variable(self.puzzle, self.domains, assignment) {
            Some(var) => var,
            None => return false,
        };

        let candidates =
            match order_domain_values(self.puzzle, self.words, self.domains, assignment, var) {
                Some(candidates) => candidates,
                None => return false,
            };

        for word in candidates {
            assignment.assign(var, word);
            if self.backtrack(assignment) {
                return true;
            }
        }

        assignment.unassign(var);
        self.statistics.backtracks += 1;
        false
    }
}

/// Fill the puzzle from the word list. Returns `None` when no complete
/// consistent fill exists — whether that was already decidable during
/// propagation or only after exhausting the search makes no difference to
/// the caller.
pub fn solve(puzzle: &Puzzle, words: &WordList) -> Option<Solution> {
    solve_with_budget(puzzle, words, SearchBudget::default())
}

/// `solve` with optional state-count and wall-clock caps.
pub fn solve_with_budget(
    puzzle: &Puzzle,
    words: &WordList,
    budget: SearchBudget,
) -> Option<Solution> {
    let started = Instant::now();

    let mut domains = DomainStore::full(puzzle, words);
    enforce_node_consistency(puzzle, words, &mut domains);
    if !ac3(puzzle, words, &mut domains, None) {
        return None;
    }

    let mut search = Search {
        puzzle,
        words,
        domains: &domains,
        budget,
        started,
        statistics: Statistics {
            states: 0,
            backtracks: 0,
            duration: Duration::from_millis(0),
        },
        out_of_budget: false,
    };

    let mut assignment = Assignment::empty(puzzle);
    if !search.backtrack(&mut assignment) {
        return None;
    }

    let mut statistics = search.statistics;
    statistics.duration = started.elapsed();

    let choices: Vec<Choice> = (0..puzzle.var_count())
        .filter_map(|var| assignment.word_id(var).map(|word| Choice { var, word }))
        .collect();

    Some(Solution { choices, statistics })
}

/// Turn the given puzzle and fill choices into a rendered string: one
/// character per cell, `█` for blocked cells, a space for any fillable cell
/// left empty.
pub fn render_grid(puzzle: &Puzzle, words: &WordList, choices: &[Choice]) -> String {
    let mut cells: Vec<u8> = vec![b' '; puzzle.height * puzzle.width];

    for &Choice { var, word } in choices {
        let variable = puzzle.variable(var);
        for (cell_idx, (row, col)) in variable.cell_coords().into_iter().enumerate() {
            cells[row * puzzle.width + col] = words.word(word).letters[cell_idx];
        }
    }

    let mut grid = String::with_capacity((puzzle.width + 1) * puzzle.height);
    for row in 0..puzzle.height {
        for col in 0..puzzle.width {
            if puzzle.is_fillable(row, col) {
                grid.push(cells[row * puzzle.width + col] as char);
            } else {
                grid.push('█');
            }
        }
        grid.push('\n');
    }

    grid
}

//! Derivations and backtracking proof enumeration.
//!
//! Every fact inserted by a derivation-tracking run carries one or more
//! [`Derivation`] records saying which rule produced it from which find
//! bindings. [`Proofs`] walks those records after the run: it lazily
//! enumerates distinct proof trees for a goal fact with an explicit frame
//! stack, no recursion, advancing the most recent choice point first and
//! rejecting any derivation that already appears on its own root-to-leaf
//! path.

use smallvec::SmallVec;

use crate::error::EngineError;
use crate::index::FactIndex;
use crate::rule::RuleId;
use crate::symbol::SymbolStore;
use crate::term::{format_term, TermId, TermStore};

/// Why a fact is in the model: the rule that fired and the facts its two
/// find slots were bound to. An unused slot holds the `#false` term, and
/// `rule: None` marks an axiom (an input fact). Ordered so derivation sets
/// are `BTreeSet`s with a stable iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Derivation {
    pub rule: Option<RuleId>,
    pub binds: [TermId; 2],
}

impl Derivation {
    pub fn new(rule: RuleId, bind1: TermId, bind2: TermId) -> Self {
        Self {
            rule: Some(rule),
            binds: [bind1, bind2],
        }
    }

    /// An input fact; both slots hold the unused sentinel.
    pub fn axiom(unused: TermId) -> Self {
        Self {
            rule: None,
            binds: [unused, unused],
        }
    }

    pub fn is_axiom(&self) -> bool {
        self.rule.is_none()
    }
}

/// One enumerated proof: the fact, the rule that concluded it (None for an
/// axiom), and a proof for each premise the rule consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofTree {
    pub fact: TermId,
    pub rule: Option<RuleId>,
    pub premises: Vec<ProofTree>,
}

impl ProofTree {
    pub fn is_axiom(&self) -> bool {
        self.rule.is_none()
    }

    /// Multi-line rendering, premises indented under their conclusion.
    pub fn render(&self, terms: &TermStore, symbols: &SymbolStore) -> Result<String, String> {
        let mut out = String::new();
        let mut work: Vec<(&ProofTree, usize)> = vec![(self, 0)];
        while let Some((node, depth)) = work.pop() {
            for _ in 0..depth {
                out.push_str("  ");
            }
            out.push_str(&format_term(node.fact, terms, symbols)?);
            if node.rule.is_none() {
                out.push_str("  [axiom]");
            }
            out.push('\n');
            for premise in node.premises.iter().rev() {
                work.push((premise, depth + 1));
            }
        }
        Ok(out)
    }
}

/// One choice point: a fact, the snapshot of its candidate derivations,
/// the current choice, and the stack indices of the frames proving the
/// chosen derivation's sub-goals.
#[derive(Debug)]
struct Frame {
    fact: TermId,
    parent: Option<usize>,
    candidates: SmallVec<[Derivation; 4]>,
    pos: usize,
    children: SmallVec<[usize; 2]>,
}

/// Lazy enumerator of distinct proof trees for one goal fact.
///
/// The stack always holds a consistent partial assignment: frames in
/// discovery order, `children` pointing at the frames for a choice's
/// sub-goals. Advancing moves the highest frame that still has an untried
/// admissible candidate and truncates everything above it; stabilization
/// then re-opens one frame per missing sub-goal until the assignment is
/// total again.
pub struct Proofs<'a> {
    goal: TermId,
    index: &'a FactIndex<'a>,
    /// The unused-slot sentinel; binds equal to it are not sub-goals.
    fls: TermId,
    stack: Vec<Frame>,
    started: bool,
    exhausted: bool,
}

impl<'a> Proofs<'a> {
    pub fn new(
        goal: TermId,
        index: &'a FactIndex<'a>,
        terms: &TermStore,
        symbols: &SymbolStore,
    ) -> Result<Self, EngineError> {
        if !index.tracks_derivations() {
            return Err(EngineError::DerivationsDisabled);
        }
        Ok(Self {
            goal,
            index,
            fls: terms.app0(symbols.fls()),
            stack: Vec::new(),
            started: false,
            exhausted: false,
        })
    }

    /// Sub-goal facts of a frame's current choice, left to right.
    fn subgoals(&self, at: usize) -> SmallVec<[TermId; 2]> {
        let frame = &self.stack[at];
        let chosen = frame.candidates[frame.pos];
        chosen
            .binds
            .iter()
            .copied()
            .filter(|&b| b != self.fls)
            .collect()
    }

    /// Does `d` already justify some fact on the path from `at` to the
    /// root? Reusing it would make the proof cyclic.
    fn on_path(&self, mut at: Option<usize>, d: &Derivation) -> bool {
        while let Some(i) = at {
            let frame = &self.stack[i];
            if frame.candidates[frame.pos] == *d {
                return true;
            }
            at = frame.parent;
        }
        false
    }

    /// Open a frame for `fact` at its first admissible candidate, or None
    /// when every candidate is missing or already on the path.
    fn open_frame(&self, fact: TermId, parent: Option<usize>) -> Option<Frame> {
        let candidates: SmallVec<[Derivation; 4]> =
            self.index.derivations(fact)?.iter().copied().collect();
        let pos = candidates.iter().position(|d| !self.on_path(parent, d))?;
        Some(Frame {
            fact,
            parent,
            candidates,
            pos,
            children: SmallVec::new(),
        })
    }

    /// Move the highest frame with an untried admissible candidate and
    /// drop everything above it. False when even the root is exhausted.
    fn advance(&mut self) -> bool {
        let mut j = self.stack.len();
        while j > 0 {
            j -= 1;
            let frame = &self.stack[j];
            let next = (frame.pos + 1..frame.candidates.len())
                .find(|&p| !self.on_path(frame.parent, &frame.candidates[p]));
            if let Some(pos) = next {
                self.stack[j].pos = pos;
                self.stack[j].children.clear();
                self.stack.truncate(j + 1);
                for frame in &mut self.stack {
                    frame.children.retain(|c| *c <= j);
                }
                return true;
            }
        }
        false
    }

    /// Expand until every frame has a child frame per sub-goal, advancing
    /// through dead ends. False when the whole search space is exhausted.
    fn stabilize(&mut self) -> bool {
        'expand: loop {
            for i in 0..self.stack.len() {
                let need = self.subgoals(i);
                let filled = self.stack[i].children.len();
                if filled >= need.len() {
                    continue;
                }
                match self.open_frame(need[filled], Some(i)) {
                    Some(frame) => {
                        let idx = self.stack.len();
                        self.stack.push(frame);
                        self.stack[i].children.push(idx);
                    }
                    None => {
                        if !self.advance() {
                            return false;
                        }
                    }
                }
                continue 'expand;
            }
            return true;
        }
    }

    /// Read the finished assignment off the stack. Children always sit at
    /// higher indices than their parent, so one reverse pass suffices.
    fn materialize(&self) -> ProofTree {
        let mut built: Vec<Option<ProofTree>> = (0..self.stack.len()).map(|_| None).collect();
        for i in (0..self.stack.len()).rev() {
            let frame = &self.stack[i];
            let chosen = frame.candidates[frame.pos];
            let mut premises = Vec::with_capacity(frame.children.len());
            for &c in &frame.children {
                premises.push(built[c].take().expect("child proof built before parent"));
            }
            built[i] = Some(ProofTree {
                fact: frame.fact,
                rule: chosen.rule,
                premises,
            });
        }
        built[0].take().expect("root proof built last")
    }
}

impl Iterator for Proofs<'_> {
    type Item = ProofTree;

    fn next(&mut self) -> Option<ProofTree> {
        if self.exhausted {
            return None;
        }
        let complete = if self.started {
            self.advance() && self.stabilize()
        } else {
            self.started = true;
            match self.open_frame(self.goal, None) {
                Some(frame) => {
                    self.stack.push(frame);
                    self.stabilize()
                }
                None => false,
            }
        };
        if !complete {
            self.exhausted = true;
            self.stack.clear();
            return None;
        }
        Some(self.materialize())
    }
}

#[cfg(test)]
#[path = "tests/proof.rs"]
mod tests;

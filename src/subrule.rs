//! Sub-term matcher rules.
//!
//! A sub-rule has no constraint graph: one trigger find, one disjunctive
//! sub-term matcher, and a head constructor. Each activating fact produces
//! one `head_sym(fact, sub_term)` conclusion per distinct matched sub-term.

use smallvec::SmallVec;

use crate::error::EngineError;
use crate::matching::{self, SubtermMatcher};
use crate::rule::{FindData, RuleId};
use crate::symbol::SymId;
use crate::term::{TermId, TermStore};

#[derive(Debug)]
pub struct SubRule {
    pub id: RuleId,
    pub label: String,
    pub head_sym: SymId,
    pub trigger: FindData,
    pub matcher: SubtermMatcher,
    stratum: Option<u32>,
}

impl SubRule {
    pub fn new(
        id: RuleId,
        label: impl Into<String>,
        head_sym: SymId,
        trigger: FindData,
        matcher: SubtermMatcher,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            head_sym,
            trigger,
            matcher,
            stratum: None,
        }
    }

    pub fn stratum(&self) -> Option<u32> {
        self.stratum
    }

    /// Assign the stratum. Write-once, like [`crate::rule::CoreRule`].
    pub fn set_stratum(&mut self, stratum: u32) -> Result<(), EngineError> {
        if self.stratum.is_some() {
            return Err(EngineError::StratumAlreadySet(self.id));
        }
        self.stratum = Some(stratum);
        Ok(())
    }

    /// All conclusions for one activating fact: `head_sym(fact, sub)` for
    /// every distinct sub-term the matcher accepts. A fact that fails the
    /// exact trigger match concludes nothing; the trigger index may route
    /// over-approximated candidates here.
    pub fn conclusions(&self, fact: TermId, terms: &TermStore) -> SmallVec<[TermId; 4]> {
        if matching::match_pattern(self.trigger.pattern, fact, terms).is_none() {
            return SmallVec::new();
        }
        self.matcher
            .matches(fact, terms)
            .map(|sub| terms.app2(self.head_sym, fact, sub))
            .collect()
    }
}

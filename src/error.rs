use crate::rule::RuleId;
use thiserror::Error;

fn render_cycle(cycle: &[(RuleId, String)]) -> String {
    let mut out = String::new();
    for (i, (id, label)) in cycle.iter().enumerate() {
        if i > 0 {
            out.push_str(" -> ");
        }
        out.push_str(label);
        out.push_str(&format!("#{}", id.0));
    }
    out
}

/// Fatal contract violations. Match failure, unification failure, and
/// cancellation are ordinary outcomes and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A dependency cycle passes through a comprehension read, so no
    /// stratum assignment exists. Carries every rule on the cycle.
    #[error("rules cannot be stratified: comprehension cycle through {}", render_cycle(.cycle))]
    Unstratifiable { cycle: Vec<(RuleId, String)> },

    /// A rule's stratum is write-once; it was assigned twice.
    #[error("stratum already set for rule #{}", .0 .0)]
    StratumAlreadySet(RuleId),

    /// A query named a trigger pattern the table never registered.
    #[error("no trigger registered for pattern {0}")]
    UnregisteredTrigger(String),

    /// Proof enumeration was requested on a run that did not record
    /// derivations.
    #[error("derivation tracking was disabled for this run")]
    DerivationsDisabled,

    /// Two rules were registered under the same label.
    #[error("duplicate rule label `{0}`")]
    DuplicateRuleLabel(String),
}

//! Risk classification of candidate shell commands.
//!
//! The classifier is a pure function from command text to a
//! [`Verdict`]: blocked, requires confirmation, or allowed. Three rule
//! tiers are evaluated in order:
//!
//! 1. **Dangerous patterns**: unacceptable blast radius, blocked outright.
//! 2. **Confirmation patterns**: destructive but legitimate, needs a human.
//! 3. **Injection heuristics**: shell metacharacters outside a documented
//!    safe-usage allowlist.
//!
//! Tier ordering matters: a command that is both dangerous and
//! confirmation-worthy must be blocked, so tier 1 is checked
//! unconditionally first.
//!
//! # Security
//!
//! This is a denylist over free-form text, bypassable by obfuscation or
//! encoding. It is advisory only and must never be the sole isolation
//! mechanism; recoverability comes from the snapshot store.

mod patterns;

pub use patterns::INJECTION_RULE;

use aho_corasick::AhoCorasick;
use regex::Regex;
use serde::{Deserialize, Serialize};

use patterns::{CONFIRM_RULES, DANGEROUS_RULES, METACHAR_NEEDLES, SAFE_COMMAND_PREFIXES};

/// Classification outcome for a single command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The command must not run. `reason` is surfaced verbatim.
    Blocked { rule: String, reason: String },
    /// The command may run only with explicit external approval.
    RequiresConfirmation { rule: String, reason: String },
    /// The command may run under the usual limits.
    Allowed,
}

impl Verdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::RequiresConfirmation { .. })
    }

    /// The matched rule's reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Blocked { reason, .. } | Self::RequiresConfirmation { reason, .. } => {
                Some(reason)
            }
            Self::Allowed => None,
        }
    }
}

/// A compiled classification rule.
struct Rule {
    regex: Regex,
    name: &'static str,
    description: &'static str,
}

fn compile(defs: &'static [patterns::RuleDef]) -> Vec<Rule> {
    defs.iter()
        .map(|def| Rule {
            regex: Regex::new(def.pattern).expect("rule table regex must compile"),
            name: def.name,
            description: def.description,
        })
        .collect()
}

/// Pure, deterministic command classifier. Rule tables are compiled once
/// at construction; `classify` holds no state and performs no I/O.
pub struct Classifier {
    dangerous: Vec<Rule>,
    confirm: Vec<Rule>,
    metachars: AhoCorasick,
}

impl Classifier {
    /// Create a classifier with the default rule tables.
    pub fn new() -> Self {
        let metachars =
            AhoCorasick::new(METACHAR_NEEDLES).expect("metachar needles must compile");
        Self {
            dangerous: compile(DANGEROUS_RULES),
            confirm: compile(CONFIRM_RULES),
            metachars,
        }
    }

    /// Classify a command. Never fails: an empty or unparseable command
    /// is `Allowed` (the shell treats it as a no-op).
    pub fn classify(&self, command: &str) -> Verdict {
        let normalized = normalize(command);
        if normalized.is_empty() {
            return Verdict::Allowed;
        }

        // Tier 1: dangerous patterns short-circuit everything else.
        for rule in &self.dangerous {
            if rule.regex.is_match(&normalized) {
                return Verdict::Blocked {
                    rule: rule.name.to_string(),
                    reason: rule.description.to_string(),
                };
            }
        }

        // Tier 2: confirmation-required patterns.
        for rule in &self.confirm {
            if rule.regex.is_match(&normalized) {
                return Verdict::RequiresConfirmation {
                    rule: rule.name.to_string(),
                    reason: rule.description.to_string(),
                };
            }
        }

        // Tier 3: metacharacter heuristics, unless safe usage.
        if self.metachars.is_match(&normalized)
            && !has_safe_prefix(&normalized)
            && !is_simple_conjunction(&normalized)
        {
            return Verdict::Blocked {
                rule: INJECTION_RULE.to_string(),
                reason: "potential injection".to_string(),
            };
        }

        Verdict::Allowed
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase and collapse whitespace so spacing and casing tricks do not
/// dodge the rule tables. The original text is never modified; verdicts
/// and violations carry it verbatim.
fn normalize(command: &str) -> String {
    command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn has_safe_prefix(normalized: &str) -> bool {
    SAFE_COMMAND_PREFIXES
        .iter()
        .any(|prefix| normalized.starts_with(prefix))
}

/// `a && b` where both sides are bare commands (no further
/// metacharacters) is common enough in build workflows to allow.
fn is_simple_conjunction(normalized: &str) -> bool {
    let parts: Vec<&str> = normalized.split("&&").collect();
    parts.len() == 2
        && parts.iter().all(|part| {
            let part = part.trim();
            !part.is_empty()
                && !part.contains([';', '|', '`', '&'])
                && !part.contains("$(")
        })
}

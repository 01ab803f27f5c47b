//! Static rule tables for command classification.
//!
//! Patterns are matched against a normalized copy of the command
//! (lowercased, whitespace collapsed), so casing and spacing tricks do
//! not change the verdict. The tables are deliberately a denylist: they
//! are a heuristic speed bump, not an isolation mechanism.

/// A classification rule: name, regex source, human-readable description.
///
/// The description is surfaced verbatim in verdicts and violation records
/// so a human can judge whether the rule was overly conservative.
pub(crate) struct RuleDef {
    pub name: &'static str,
    pub pattern: &'static str,
    pub description: &'static str,
}

/// Tier 1: commands whose blast radius is unacceptable. Any match blocks
/// the command outright, before the confirmation tier is consulted.
pub(crate) const DANGEROUS_RULES: &[RuleDef] = &[
    RuleDef {
        name: "recursive-delete-root",
        pattern: r"\brm\s+(?:-[a-z]*r[a-z]*|--recursive)(?:\s+-[a-z-]+)*\s+(?:/|~/?|\$home/?)(?:\s|\*|$)",
        description: "recursive delete of the filesystem root or home directory",
    },
    RuleDef {
        name: "raw-disk-write",
        pattern: r"\bdd\b[^|;&]*\bof=/dev/",
        description: "raw write to a block device",
    },
    RuleDef {
        name: "device-redirect",
        pattern: r">\s*/dev/(?:sd|hd|nvme|vd|disk)",
        description: "output redirected onto a block device",
    },
    RuleDef {
        name: "disk-format",
        pattern: r"\bmkfs(?:\.\w+)?\b",
        description: "filesystem format command",
    },
    RuleDef {
        name: "fork-bomb",
        pattern: r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        description: "shell fork bomb",
    },
    RuleDef {
        name: "remote-pipe-exec",
        pattern: r"\b(?:curl|wget)\b[^|;&]*\|\s*(?:sudo\s+)?(?:ba|z|da)?sh\b",
        description: "remote script piped directly into a shell",
    },
    RuleDef {
        name: "privileged-shutdown",
        pattern: r"\b(?:shutdown|reboot|poweroff|halt)\b|\binit\s+0\b",
        description: "host shutdown or reboot",
    },
    RuleDef {
        name: "world-writable-root",
        pattern: r"\bchmod\s+(?:-[a-z]+\s+)*777\s+/(?:\s|\*|$)",
        description: "making the filesystem root world-writable",
    },
];

/// Tier 2: commands that are legitimate but destructive enough to need a
/// human in the loop. Only consulted when no tier-1 rule matched.
pub(crate) const CONFIRM_RULES: &[RuleDef] = &[
    RuleDef {
        name: "force-push",
        pattern: r"\bgit\s+push\b[^|;&]*(?:--force\b|\s-f\b)",
        description: "git force-push rewrites remote history",
    },
    RuleDef {
        name: "sudo",
        pattern: r"^\s*sudo\b",
        description: "privileged execution via sudo",
    },
    RuleDef {
        name: "package-publish",
        pattern: r"\b(?:npm|cargo|yarn|pnpm)\s+publish\b",
        description: "publishing a package to a registry",
    },
    RuleDef {
        name: "container-prune",
        pattern: r"\bdocker\s+(?:system|volume|image|container)\s+prune\b",
        description: "pruning docker state is destructive",
    },
    RuleDef {
        name: "recursive-delete",
        pattern: r"\brm\s+(?:-[a-z]*r[a-z]*|--recursive)\b",
        description: "recursive delete",
    },
    RuleDef {
        name: "git-reset-hard",
        pattern: r"\bgit\s+reset\s+--hard\b",
        description: "git hard reset discards local changes",
    },
    RuleDef {
        name: "git-clean-force",
        pattern: r"\bgit\s+clean\s+-[a-z]*f",
        description: "git clean -f deletes untracked files",
    },
];

/// Shell metacharacters that suggest command chaining or substitution.
/// Scanned with an Aho-Corasick matcher; presence alone is not a verdict,
/// the safe-usage allowlist below is consulted first. `&` is included so
/// that the `a && b` conjunction allowlist is the thing deciding, not an
/// accidental gap in the needle set.
pub(crate) const METACHAR_NEEDLES: &[&str] = &[";", "|", "`", "$(", "&"];

/// Commands whose idiomatic usage routinely involves metacharacters
/// (pipes in `git log | head`, `$(...)` in npm scripts). A command
/// starting with one of these prefixes skips the injection heuristic.
pub(crate) const SAFE_COMMAND_PREFIXES: &[&str] =
    &["git ", "npm ", "cargo ", "echo ", "grep ", "find "];

/// Rule name used for tier-3 injection blocks.
pub const INJECTION_RULE: &str = "potential-injection";

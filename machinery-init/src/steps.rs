//! The canonical Init Pipeline step order (spec §4.3): each step is
//! independently skippable and matched by a leading-character glob so
//! callers can abbreviate (`-steps sh,i` for `shares,images`).

/// One named step in the canonical order. Manager-only steps (spec §4.3
/// table, §5 ordering guarantee) only run on Swarm Mode managers, and only
/// after every machine has completed its worker-class steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStep {
    Shares,
    Files,
    Prelude,
    Registries,
    Images,
    Networks,
    Labels,
    Compose,
    Addendum,
    Applications,
}

/// Canonical execution order (spec §4.3 table), independent of how a
/// caller lists `-steps`.
pub const CANONICAL_ORDER: &[InitStep] = &[
    InitStep::Shares,
    InitStep::Files,
    InitStep::Prelude,
    InitStep::Registries,
    InitStep::Images,
    InitStep::Networks,
    InitStep::Labels,
    InitStep::Compose,
    InitStep::Addendum,
    InitStep::Applications,
];

impl InitStep {
    pub fn name(self) -> &'static str {
        match self {
            InitStep::Shares => "shares",
            InitStep::Files => "files",
            InitStep::Prelude => "prelude",
            InitStep::Registries => "registries",
            InitStep::Images => "images",
            InitStep::Networks => "networks",
            InitStep::Labels => "labels",
            InitStep::Compose => "compose",
            InitStep::Addendum => "addendum",
            InitStep::Applications => "applications",
        }
    }

    /// Manager-only under Swarm Mode (spec §4.3 table's "Manager-only?"
    /// column).
    pub fn manager_only(self) -> bool {
        matches!(self, InitStep::Networks | InitStep::Labels | InitStep::Applications)
    }
}

/// Resolves `-steps` patterns against the canonical set, matching each
/// pattern as a glob anchored at the start of the step name (so `"s"`,
/// `"sh*"` and `"shares"` all select [`InitStep::Shares`]) and preserving
/// canonical order regardless of how the caller listed them. An empty
/// `requested` selects every step.
pub fn resolve_steps(requested: &[String]) -> Vec<InitStep> {
    if requested.is_empty() {
        return CANONICAL_ORDER.to_vec();
    }
    let patterns: Vec<glob::Pattern> = requested
        .iter()
        .filter_map(|p| {
            let starred = if p.ends_with('*') { p.clone() } else { format!("{p}*") };
            glob::Pattern::new(&starred.to_lowercase()).ok()
        })
        .collect();

    CANONICAL_ORDER
        .iter()
        .copied()
        .filter(|step| patterns.iter().any(|p| p.matches(step.name())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_request_selects_everything_in_canonical_order() {
        assert_eq!(resolve_steps(&[]), CANONICAL_ORDER.to_vec());
    }

    #[test]
    fn leading_character_abbreviations_match() {
        let steps = resolve_steps(&["sh".to_string(), "i".to_string()]);
        assert_eq!(steps, vec![InitStep::Shares, InitStep::Images]);
    }

    #[test]
    fn full_name_matches_exactly() {
        let steps = resolve_steps(&["networks".to_string()]);
        assert_eq!(steps, vec![InitStep::Networks]);
    }

    #[test]
    fn manager_only_flags_match_spec_table() {
        assert!(InitStep::Networks.manager_only());
        assert!(InitStep::Labels.manager_only());
        assert!(InitStep::Applications.manager_only());
        assert!(!InitStep::Shares.manager_only());
        assert!(!InitStep::Compose.manager_only());
    }
}

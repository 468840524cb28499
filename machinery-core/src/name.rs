//! Name comparison (spec §4.10): a short name typed on the CLI should match
//! the fully-qualified `prefix-shortname` form stored internally.

/// Default separator between a cluster prefix and a machine's short name.
pub const DEFAULT_SEPARATOR: char = '-';

/// Two names are equal if they are byte-equal, or if `full`'s suffix after
/// the first occurrence of `separator` equals `other`.
pub fn name_eq(full: &str, other: &str, separator: char) -> bool {
    if full == other {
        return true;
    }
    match full.find(separator) {
        Some(idx) => &full[idx + separator.len_utf8()..] == other,
        None => false,
    }
}

/// Convenience wrapper using the default `-` separator.
pub fn name_eq_default(full: &str, other: &str) -> bool {
    name_eq(full, other, DEFAULT_SEPARATOR)
}

/// Prepends `prefix` to `name` unless it is already so prefixed.
pub fn qualify(prefix: &str, name: &str, separator: char) -> String {
    let qualified_form = format!("{prefix}{separator}{name}");
    if name == qualified_form || name.starts_with(&format!("{prefix}{separator}")) {
        name.to_string()
    } else {
        qualified_form
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_equal_names_match() {
        assert!(name_eq_default("proj-n1", "proj-n1"));
    }

    #[test]
    fn short_name_matches_qualified_suffix() {
        assert!(name_eq_default("proj-n1", "n1"));
        assert!(!name_eq_default("proj-n1", "n2"));
    }

    #[test]
    fn no_separator_only_matches_exactly() {
        assert!(!name_eq_default("n1", "proj-n1"));
    }

    #[test]
    fn qualify_adds_prefix_once() {
        assert_eq!(qualify("proj", "n1", '-'), "proj-n1");
        assert_eq!(qualify("proj", "proj-n1", '-'), "proj-n1");
    }

    #[test]
    fn law_name_eq_prefix_suffix() {
        for (prefix, short) in [("proj", "n1"), ("a", "b"), ("cluster", "worker-2")] {
            let full = format!("{prefix}-{short}");
            assert!(name_eq_default(&full, short));
        }
    }
}

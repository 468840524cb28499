//! Parses a tool's `--help` text into the set of recognized flags, so the
//! engine can validate driver `options:` before forwarding them as `--flag`
//! (spec §4.2, §4.9).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static LONG_FLAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"--([a-zA-Z][a-zA-Z0-9-]*)").expect("static regex is valid")
});

/// Extracts every `--flag` token mentioned in `help_text` into a set of bare
/// flag names (without the leading `--`). Used to validate a driver's
/// `options:` map against what `docker-machine create --driver X --help`
/// actually recognizes.
pub fn parse_recognized_options(help_text: &str) -> HashSet<String> {
    LONG_FLAG
        .captures_iter(help_text)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_flags_from_help_text() {
        let help = "\
Usage: docker-machine create --driver virtualbox [OPTIONS]

   --virtualbox-cpu-count \"1\"       number of CPUs
   --virtualbox-memory \"1024\"       memory size in MB
   --virtualbox-disk-size \"20000\"   disk size in MB
";
        let opts = parse_recognized_options(help);
        assert!(opts.contains("virtualbox-cpu-count"));
        assert!(opts.contains("virtualbox-memory"));
        assert!(opts.contains("virtualbox-disk-size"));
    }

    #[test]
    fn empty_text_yields_empty_set() {
        assert!(parse_recognized_options("").is_empty());
    }
}

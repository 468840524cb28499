//! Collapses `docker-machine`'s `key=value` logrus lines into a single
//! leveled message (spec §4.9): `msg=` becomes the log line, `level=` is
//! translated through the fixed map below.

/// A logging level, ordered as the engine's own logger would expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Notice,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Notice => "NOTICE",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }

    /// Ascending severity, for picking the worst level seen across a run's
    /// output (spec §7.3: a failed invocation is re-emitted at the mapped
    /// level of its most severe line).
    pub fn rank(self) -> u8 {
        match self {
            Level::Info => 0,
            Level::Notice => 1,
            Level::Warn => 2,
            Level::Error => 3,
            Level::Fatal => 4,
        }
    }

    fn from_logrus(raw: &str) -> Option<Level> {
        match raw.to_ascii_lowercase().as_str() {
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Notice),
            "error" => Some(Level::Warn),
            "fatal" => Some(Level::Error),
            "panic" => Some(Level::Fatal),
            _ => None,
        }
    }
}

/// A translated logrus record: the leveled, human-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub level: &'static str,
    pub level_enum: Level,
    pub message: String,
}

/// Splits a `key=value key2="quoted value" ...` logrus line into fields,
/// honoring double-quoted values.
fn split_fields(line: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut chars = line.char_indices().peekable();
    let mut current_key = String::new();
    let mut in_key = true;

    while let Some((_, c)) = chars.next() {
        if in_key {
            if c == '=' {
                in_key = false;
            } else if c.is_whitespace() {
                current_key.clear();
            } else {
                current_key.push(c);
            }
            continue;
        }

        let mut value = String::new();
        if c == '"' {
            for (_, c2) in chars.by_ref() {
                if c2 == '"' {
                    break;
                }
                value.push(c2);
            }
        } else {
            value.push(c);
            while let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    break;
                }
                value.push(next);
                chars.next();
            }
        }
        fields.push((std::mem::take(&mut current_key), value));
        in_key = true;
    }
    fields
}

/// Attempts to translate one line of `docker-machine` output. Returns `None`
/// if the line does not look like a logrus record (no recognized `level=`
/// field), in which case the caller should pass the line through verbatim.
pub fn translate_line(line: &str) -> Option<Translated> {
    let fields = split_fields(line);
    let mut level = None;
    let mut msg = None;
    for (key, value) in &fields {
        match key.as_str() {
            "level" => level = Level::from_logrus(value),
            "msg" => msg = Some(value.clone()),
            _ => {}
        }
    }
    let level = level?;
    Some(Translated {
        level: level.as_str(),
        level_enum: level,
        message: msg.unwrap_or_else(|| line.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_info_line() {
        let t = translate_line(r#"time="2024-01-01" level=info msg="Starting VM""#).unwrap();
        assert_eq!(t.level, "INFO");
        assert_eq!(t.message, "Starting VM");
    }

    #[test]
    fn maps_every_known_level() {
        let cases = [
            ("info", "INFO"),
            ("warn", "NOTICE"),
            ("error", "WARN"),
            ("fatal", "ERROR"),
            ("panic", "FATAL"),
        ];
        for (raw, expected) in cases {
            let line = format!(r#"level={raw} msg="x""#);
            assert_eq!(translate_line(&line).unwrap().level, expected);
        }
    }

    #[test]
    fn non_logrus_line_returns_none() {
        assert!(translate_line("plain output, not structured").is_none());
    }

    #[test]
    fn case_insensitive_level_match() {
        let t = translate_line(r#"level=WARN msg="careful""#).unwrap();
        assert_eq!(t.level, "NOTICE");
    }
}

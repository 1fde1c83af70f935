use regex::Regex;
use std::sync::OnceLock;

use crate::engine_descriptor::EngineFamily;

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex"))
}

/// Reserved words rejected regardless of case, shared across the
/// Postgres and MySQL dialects since a name that collides with either is
/// almost always a mistake worth refusing up front.
const RESERVED_WORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "create", "alter", "table", "database",
    "from", "where", "grant", "revoke", "union", "join", "into", "values", "set", "index",
    "primary", "foreign", "key", "references", "default", "null", "true", "false", "user",
    "group", "order", "by", "having", "limit", "offset", "as", "and", "or", "not",
];

/// Validate an identifier per the Engine Adapter Contract's identifier
/// safety rule: shape `^[A-Za-z_][A-Za-z0-9_]{0,62}$`, not a reserved word
/// (case-insensitive). Empty or too-long strings already fail the regex.
pub fn validate_identifier(s: &str) -> bool {
    identifier_regex().is_match(s) && !RESERVED_WORDS.contains(&s.to_ascii_lowercase().as_str())
}

/// Quote an already-validated identifier in the engine family's dialect:
/// double quotes for PG-family (doubling embedded quotes), backticks for
/// MySQL-family. HTTP/KV families have no SQL identifiers and are not
/// expected to call this.
pub fn quote_identifier(family: EngineFamily, ident: &str) -> String {
    match family {
        EngineFamily::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
        EngineFamily::Mysql => format!("`{}`", ident.replace('`', "``")),
        EngineFamily::KeyValue | EngineFamily::Http => ident.to_string(),
    }
}

/// Reverse of [`quote_identifier`]: strip the dialect's quote characters and
/// un-double any escaped quotes, used to verify the round-trip property.
pub fn unquote_identifier(family: EngineFamily, quoted: &str) -> Option<String> {
    let (quote_char, _) = match family {
        EngineFamily::Postgres => ('"', ()),
        EngineFamily::Mysql => ('`', ()),
        EngineFamily::KeyValue | EngineFamily::Http => return Some(quoted.to_string()),
    };
    let inner = quoted
        .strip_prefix(quote_char)
        .and_then(|s| s.strip_suffix(quote_char))?;
    let doubled = quote_char.to_string().repeat(2);
    Some(inner.replace(&doubled, &quote_char.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_identifiers_pass() {
        for s in ["mydb", "my_db", "MyDb1", "_leading_underscore"] {
            assert!(validate_identifier(s), "{s} should be valid");
        }
    }

    #[test]
    fn reserved_words_rejected_case_insensitively() {
        for s in ["select", "SELECT", "Select", "drop", "TABLE"] {
            assert!(!validate_identifier(s), "{s} should be rejected");
        }
    }

    #[test]
    fn empty_and_too_long_are_rejected() {
        assert!(!validate_identifier(""));
        let too_long = "a".repeat(64);
        assert!(!validate_identifier(&too_long));
        let max_len = "a".repeat(63);
        assert!(validate_identifier(&max_len));
    }

    #[test]
    fn shape_violations_rejected() {
        for s in ["1db", "my-db", "my db"] {
            assert!(!validate_identifier(s), "{s} should be rejected");
        }
    }

    #[test]
    fn quote_then_unquote_round_trips() {
        for family in [EngineFamily::Postgres, EngineFamily::Mysql] {
            for ident in ["mydb", "My_Table_1", "weird\"name"] {
                if !validate_identifier(ident) && !ident.contains('"') {
                    continue;
                }
                let quoted = quote_identifier(family, ident);
                let back = unquote_identifier(family, &quoted).unwrap();
                assert_eq!(back, ident);
            }
        }
    }

    #[test]
    fn dialect_quote_characters() {
        assert_eq!(quote_identifier(EngineFamily::Postgres, "mydb"), "\"mydb\"");
        assert_eq!(quote_identifier(EngineFamily::Mysql, "mydb"), "`mydb`");
    }
}

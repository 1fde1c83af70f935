/// Escape a CSV-like field value for interpolation into a synthetic INSERT
/// statement during remote dump (CockroachDB's connection-string path, which
/// has no native archive format).
///
/// This implements the always-string-literal variant named in the design
/// notes: every non-null value is single-quoted with embedded quotes
/// doubled, which avoids mis-typing numeric-looking IDs or boolean-looking
/// strings as their own SQL literal. `quoted_empty` distinguishes a
/// CSV-quoted empty string (`""`, preserved as `''`) from a true NULL marker
/// (bare empty field, emitted as `NULL`).
pub fn escape_sql_value(value: &str, quoted_empty: bool) -> String {
    if value.is_empty() {
        if quoted_empty {
            "''".to_string()
        } else {
            "NULL".to_string()
        }
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_field_semantics() {
        assert_eq!(escape_sql_value("", true), "''");
        assert_eq!(escape_sql_value("", false), "NULL");
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        assert_eq!(escape_sql_value("it's", true), "'it''s'");
    }

    #[test]
    fn scalars_are_always_string_literals() {
        // Chosen variant: every non-null value is a quoted string literal,
        // never a bare numeric or boolean token.
        assert_eq!(escape_sql_value("42", true), "'42'");
        assert_eq!(escape_sql_value("true", true), "'true'");
    }
}

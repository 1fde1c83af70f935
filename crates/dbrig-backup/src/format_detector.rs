use dbrig_common::backup::{BackupDescriptor, FormatTag};
use dbrig_common::engine_descriptor::EngineFamily;
use dbrig_common::error::{DbrigError, DbrigResult};
use std::path::Path;

/// Only the first 263 bytes of a dump file are ever inspected — enough to
/// cover the PG custom-format magic, the tar `ustar` marker at offset 257,
/// and the first line of any text-based dump.
pub const HEADER_BYTES: usize = 263;

/// Reads the first [`HEADER_BYTES`] bytes of `path` for format detection.
/// `detect_format` itself is pure over those bytes — this helper is the only
/// I/O boundary, matching the "pure function of the first ≤263 bytes"
/// invariant.
pub async fn read_header(path: &Path) -> DbrigResult<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await.map_err(|err| {
        DbrigError::dependency_missing(
            format!("could not read backup file: {err}"),
            "verify the backup path exists and is readable",
        )
    })?;
    let mut buf = vec![0u8; HEADER_BYTES];
    let n = file.read(&mut buf).await.map_err(|err| {
        DbrigError::dependency_missing(
            format!("could not read backup file: {err}"),
            "verify the backup path exists and is readable",
        )
    })?;
    buf.truncate(n);
    Ok(buf)
}

/// Classifies a backup file's format from its first ≤263 bytes, applying the
/// eight ordered rules. `family` disambiguates "native" vs "foreign" SQL
/// dumps (rule 4) and gates the KV/vector-only rules (6, 7).
pub fn detect_format(header: &[u8], file_extension: Option<&str>, family: EngineFamily) -> FormatTag {
    if header.starts_with(b"PGDMP") {
        return FormatTag::Custom;
    }
    if header.len() >= 262 && &header[257..262] == b"ustar" {
        return FormatTag::Tar;
    }
    if header.len() >= 2 && header[0] == 0x1f && header[1] == 0x8b {
        return FormatTag::Compressed;
    }

    let first_line = first_non_empty_line(header);
    if let Some(line) = first_line.as_deref() {
        let lower = line.to_ascii_lowercase();
        if lower.contains("-- mysql dump") || lower.contains("-- mariadb dump") {
            return match family {
                EngineFamily::Postgres => FormatTag::MysqlSql,
                EngineFamily::Mysql => FormatTag::Sql,
                _ => FormatTag::Sql,
            };
        }
        if lower.contains("-- postgresql database dump") || lower.contains("pg_dump") {
            return match family {
                EngineFamily::Mysql => FormatTag::PostgresqlSql,
                EngineFamily::Postgres => FormatTag::Sql,
                _ => FormatTag::Sql,
            };
        }
        let trimmed = line.trim_start();
        const SQL_LEADERS: &[&str] = &["--", "/*", "SET ", "CREATE", "DROP", "BEGIN", "USE"];
        if SQL_LEADERS
            .iter()
            .any(|leader| trimmed.to_ascii_uppercase().starts_with(&leader.to_ascii_uppercase()))
        {
            return FormatTag::Sql;
        }
    }

    if family == EngineFamily::KeyValue {
        if header.starts_with(b"REDIS") {
            return FormatTag::Rdb;
        }
        if first_line
            .as_deref()
            .map(looks_like_command_verb)
            .unwrap_or(false)
        {
            return FormatTag::Text;
        }
    }

    if family == EngineFamily::Http {
        if file_extension.map(|ext| ext.eq_ignore_ascii_case("snapshot")).unwrap_or(false) {
            return FormatTag::Snapshot;
        }
    }

    FormatTag::Unknown
}

fn first_non_empty_line(header: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(header);
    text.lines().map(str::to_string).find(|l| !l.trim().is_empty())
}

fn looks_like_command_verb(line: &str) -> bool {
    let first_word = line.trim().split_whitespace().next().unwrap_or("");
    !first_word.is_empty() && first_word.chars().all(|c| c.is_ascii_alphabetic())
}

/// `assertCompatibleFormat`: refuses cross-family dumps, naming both the
/// detected and expected engines in the error (satisfies S4).
pub fn assert_compatible_format(
    format: FormatTag,
    expected_engine: &str,
    detected_engine_for_foreign_format: &str,
) -> DbrigResult<()> {
    let is_foreign = matches!(
        format,
        FormatTag::MysqlSql | FormatTag::PostgresqlSql
    );
    if is_foreign {
        return Err(DbrigError::wrong_engine_dump(
            format,
            expected_engine,
            detected_engine_for_foreign_format,
        ));
    }
    Ok(())
}

pub fn describe(format: FormatTag) -> BackupDescriptor {
    let (description, tool) = match format {
        FormatTag::Sql => ("plain SQL script", None),
        FormatTag::Compressed => ("gzip-compressed dump", None),
        FormatTag::Custom => ("PostgreSQL custom-format archive", Some("pg_restore")),
        FormatTag::Tar => ("tar-format archive", Some("pg_restore")),
        FormatTag::MysqlSql => ("MySQL/MariaDB SQL dump", Some("mysql")),
        FormatTag::PostgresqlSql => ("PostgreSQL SQL dump", Some("psql")),
        FormatTag::PostgresqlCustom => ("PostgreSQL custom-format archive", Some("pg_restore")),
        FormatTag::Rdb => ("Redis/Valkey RDB snapshot", None),
        FormatTag::Text => ("Redis/Valkey command dump", Some("redis-cli")),
        FormatTag::Snapshot => ("vector/search engine snapshot", None),
        FormatTag::Unknown => ("unrecognized format", None),
    };
    BackupDescriptor::new(format, description, tool.map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_mysql_dump_detected_as_foreign_for_postgres() {
        let header = b"-- MySQL dump 10.13  Distrib 8.0.36, for Linux\n".to_vec();
        let format = detect_format(&header, None, EngineFamily::Postgres);
        assert_eq!(format, FormatTag::MysqlSql);
        let err = assert_compatible_format(format, "postgresql", "mysql").unwrap_err();
        assert_eq!(err.code, dbrig_common::error::ErrorCode::WrongEngineDump);
        assert!(err.suggestion.contains("--engine mysql"));
    }

    #[test]
    fn pgdmp_magic_detected_as_custom() {
        let mut header = b"PGDMP".to_vec();
        header.extend([0u8; 10]);
        assert_eq!(
            detect_format(&header, None, EngineFamily::Postgres),
            FormatTag::Custom
        );
    }

    #[test]
    fn gzip_header_detected_as_compressed() {
        let header = vec![0x1f, 0x8b, 0x08, 0x00];
        assert_eq!(
            detect_format(&header, None, EngineFamily::Mysql),
            FormatTag::Compressed
        );
    }

    #[test]
    fn native_postgres_dump_is_plain_sql() {
        let header = b"-- PostgreSQL database dump\n-- Dumped from database version 16.4\n".to_vec();
        assert_eq!(
            detect_format(&header, None, EngineFamily::Postgres),
            FormatTag::Sql
        );
    }

    #[test]
    fn redis_rdb_magic_detected() {
        let header = b"REDIS0011\xfa\x09redis-ver".to_vec();
        assert_eq!(detect_format(&header, None, EngineFamily::KeyValue), FormatTag::Rdb);
    }

    #[test]
    fn classification_is_stable_across_repeated_reads() {
        let header = b"-- MySQL dump 10.13\n".to_vec();
        let first = detect_format(&header, None, EngineFamily::Postgres);
        let second = detect_format(&header, None, EngineFamily::Postgres);
        assert_eq!(first, second);
    }
}

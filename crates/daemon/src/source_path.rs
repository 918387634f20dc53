//! The source-path file format (spec.md §6 "Source-path file"): one
//! address per line, `#` comments, recursive `include <path>`
//! directives, and `$(HOME)`/`$(USER)`/`$(ENV_<NAME>)` substitution.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use error::{ConfError, ConfResult, ErrorKind};

/// Substitutes `$(HOME)`, `$(USER)`, and `$(ENV_<NAME>)` references in
/// `line`. A substitution that resolves to the empty string causes the
/// whole line to be dropped by the caller (spec.md §6): this function
/// returns `None` in that case, `Some(expanded)` otherwise.
fn substitute_variables(line: &str) -> Option<String> {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    let mut saw_empty_substitution = false;
    while let Some(start) = rest.find("$(") {
        let Some(end) = rest[start..].find(')') else {
            out.push_str(rest);
            rest = "";
            break;
        };
        let end = start + end;
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..end];
        let value = if var == "HOME" {
            env::var("HOME").unwrap_or_default()
        } else if var == "USER" {
            env::var("USER").unwrap_or_default()
        } else if let Some(name) = var.strip_prefix("ENV_") {
            env::var(name).unwrap_or_default()
        } else {
            String::new()
        };
        if value.is_empty() {
            saw_empty_substitution = true;
        }
        out.push_str(&value);
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    if saw_empty_substitution {
        None
    } else {
        Some(out)
    }
}

/// Parses `path`, recursively splicing `include`d files, and returns
/// the ordered list of source addresses. `seen` guards against
/// `include` cycles.
fn parse_into(path: &Path, seen: &mut HashSet<PathBuf>, out: &mut Vec<String>) -> ConfResult<()> {
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(canonical) {
        return Err(ConfError::new(
            ErrorKind::ParseError,
            format!("{}: include cycle detected", path.display()),
        ));
    }

    let text = fs::read_to_string(path)
        .map_err(|e| ConfError::new(ErrorKind::ParseError, format!("{}: {e}", path.display())))?;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(expanded) = substitute_variables(line) else {
            continue;
        };
        let expanded = expanded.trim();
        if expanded.is_empty() {
            continue;
        }
        if let Some(included) = expanded.strip_prefix("include ") {
            let included = included.trim();
            let included_path = if Path::new(included).is_absolute() {
                PathBuf::from(included)
            } else {
                path.parent().unwrap_or_else(|| Path::new(".")).join(included)
            };
            parse_into(&included_path, seen, out)?;
        } else {
            out.push(expanded.to_string());
        }
    }
    Ok(())
}

/// Reads and expands a source-path file into an ordered list of
/// source addresses.
pub fn parse_source_path_file(path: impl AsRef<Path>) -> ConfResult<Vec<String>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    parse_into(path.as_ref(), &mut seen, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn skips_comments_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("path");
        fs::write(&path, "# a comment\n\nfile:readwrite:/etc/nconf\n").unwrap();
        let sources = parse_source_path_file(&path).unwrap();
        assert_eq!(sources, vec!["file:readwrite:/etc/nconf".to_string()]);
    }

    #[test]
    fn splices_included_file() {
        let dir = tempfile::tempdir().unwrap();
        let included = dir.path().join("extra");
        fs::write(&included, "file:readonly:/etc/extra\n").unwrap();
        let path = dir.path().join("path");
        fs::write(&path, format!("file:readwrite:/etc/nconf\ninclude {}\n", included.display())).unwrap();
        let sources = parse_source_path_file(&path).unwrap();
        assert_eq!(
            sources,
            vec!["file:readwrite:/etc/nconf".to_string(), "file:readonly:/etc/extra".to_string()]
        );
    }

    #[test]
    fn empty_substitution_drops_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("path");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "file:readwrite:$(ENV_NCONF_TEST_UNSET_VAR_XYZ)/etc").unwrap();
        writeln!(f, "file:readwrite:/etc/kept").unwrap();
        drop(f);
        let sources = parse_source_path_file(&path).unwrap();
        assert_eq!(sources, vec!["file:readwrite:/etc/kept".to_string()]);
    }

    #[test]
    fn home_and_user_substitute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("path");
        fs::write(&path, "file:readwrite:$(HOME)/.nconf\n").unwrap();
        let sources = parse_source_path_file(&path).unwrap();
        let home = env::var("HOME").unwrap_or_default();
        assert_eq!(sources, vec![format!("file:readwrite:{home}/.nconf")]);
    }
}

//! Glob matching for file and exception-name filters.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

/// Compiled-pattern cache, keyed by source pattern text. Configuration
/// glob lists are typically re-checked on every stop, so this avoids
/// recompiling the same handful of patterns repeatedly.
static PATTERN_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn compiled(pattern: &str) -> Option<Regex> {
    let mut cache = PATTERN_CACHE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(re) = cache.get(pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(&pattern_to_regex_source(pattern)).ok()?;
    cache.insert(pattern.to_string(), re.clone());
    Some(re)
}

/// Translate a glob pattern to an anchored regex source string. `**`
/// matches any sequence; `*` matches any character except `\`; every other
/// regex metacharacter is escaped literally.
fn pattern_to_regex_source(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '*' {
            if !literal.is_empty() {
                out.push_str(&regex::escape(&literal));
                literal.clear();
            }
            if chars.get(i + 1) == Some(&'*') {
                out.push_str(".*");
                i += 2;
            } else {
                out.push_str(r"[^\\]*");
                i += 1;
            }
        } else {
            literal.push(chars[i]);
            i += 1;
        }
    }
    if !literal.is_empty() {
        out.push_str(&regex::escape(&literal));
    }
    format!("^{out}$")
}

/// True iff `name` matches any of `patterns` once each is converted to a
/// glob-style regex (`should_ignore_exception` — any match succeeds).
#[must_use]
pub fn matches_any(name: &str, patterns: &[String]) -> bool {
    patterns.iter().filter_map(|p| compiled(p)).any(|re| re.is_match(name))
}

/// True iff the first glob in `globs` that matches `path` (in list order)
/// is a positive (non-`!`-prefixed) pattern. Patterns prefixed with `!`
/// negate the match. Returns `false` if nothing matches.
#[must_use]
pub fn is_positive_match_in_globs(path: &str, globs: &[String]) -> bool {
    for glob in globs {
        let (negated, pattern) = match glob.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, glob.as_str()),
        };
        let Some(re) = compiled(pattern) else { continue };
        if re.is_match(path) {
            return !negated;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must;

    #[test]
    fn single_star_matches_any_file_in_one_segment() {
        let patterns = vec!["*/vendor/*".to_string()];
        assert!(matches_any("src/vendor/autoload.php", &patterns));
    }

    #[test]
    fn single_star_does_not_cross_backslash() {
        let re_source = pattern_to_regex_source(r"C:\Temp\*");
        let re = must(Regex::new(&re_source));
        assert!(re.is_match(r"C:\Temp\foo.php"));
        assert!(!re.is_match(r"C:\Temp\sub\foo.php"));
    }

    #[test]
    fn double_star_matches_any_sequence() {
        let patterns = vec!["**/vendor/**".to_string()];
        assert!(matches_any("app/deep/path/vendor/pkg/autoload.php", &patterns));
    }

    #[test]
    fn exception_name_glob() {
        let patterns = vec!["App\\Exceptions\\*".to_string()];
        assert!(matches_any("App\\Exceptions\\NotFoundException", &patterns));
        assert!(!matches_any("App\\Models\\User", &patterns));
    }

    #[test]
    fn literal_regex_metacharacters_are_escaped() {
        let patterns = vec!["file(1).php".to_string()];
        assert!(matches_any("file(1).php", &patterns));
        assert!(!matches_any("fileX1X.php", &patterns));
    }

    #[test]
    fn positive_match_first_glob_wins() {
        let globs = vec!["**/vendor/**".to_string(), "!**/vendor/important/**".to_string()];
        assert!(is_positive_match_in_globs("app/vendor/lib/a.php", &globs));
    }

    #[test]
    fn negated_glob_wins_when_listed_first() {
        let globs = vec!["!**/vendor/important/**".to_string(), "**/vendor/**".to_string()];
        assert!(!is_positive_match_in_globs("app/vendor/important/a.php", &globs));
        assert!(is_positive_match_in_globs("app/vendor/other/a.php", &globs));
    }

    #[test]
    fn no_match_returns_false() {
        let globs = vec!["**/vendor/**".to_string()];
        assert!(!is_positive_match_in_globs("app/src/a.php", &globs));
    }
}

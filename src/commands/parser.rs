//! Slash-command recognition in comment bodies.
//!
//! Commands sit at the start of a line. A comment may carry several; each
//! recognised line yields one [`Command`], in order of appearance.

use std::sync::LazyLock;

use regex::Regex;

use super::types::Command;

fn compile(re: &str) -> Regex {
    Regex::new(re).unwrap_or_else(|e| unreachable!("command pattern is a literal: {e}"))
}

static TEST_ALL: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^/test all,?($|\s.*)"));
static TEST_ANY: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^/test\s+(\S.*)$"));
static RETEST: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^/retest\s*$"));
static OK_TO_TEST: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^/ok-to-test\s*$"));
static OVERRIDE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^/override\s+(.+?)\s*$"));
static LGTM: LazyLock<Regex> = LazyLock::new(|| compile(r"(?mi)^/lgtm(\s+cancel)?\s*$"));

/// True if the body asks for every applicable presubmit.
pub fn is_test_all(body: &str) -> bool {
    TEST_ALL.is_match(body)
}

pub fn is_retest(body: &str) -> bool {
    RETEST.is_match(body)
}

pub fn is_ok_to_test(body: &str) -> bool {
    OK_TO_TEST.is_match(body)
}

/// True for any `/test ...` line other than `/test all`.
pub fn is_explicit_test(body: &str) -> bool {
    TEST_ANY
        .captures_iter(body)
        .any(|c| c.get(1).is_some_and(|m| !m.as_str().trim_start().starts_with("all")))
}

/// Contexts named by `/override` lines, split on whitespace.
pub fn override_contexts(body: &str) -> Vec<String> {
    OVERRIDE
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .flat_map(|m| m.as_str().split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .collect()
}

/// Every command in `body`, in order.
pub fn parse_commands(body: &str) -> Vec<Command> {
    let mut commands = Vec::new();
    for line in body.lines() {
        let line = line.trim_end();
        if !line.starts_with('/') {
            continue;
        }
        if is_test_all(line) {
            commands.push(Command::TestAll);
        } else if is_explicit_test(line) {
            commands.push(Command::Test(line.to_string()));
        } else if is_retest(line) {
            commands.push(Command::Retest);
        } else if is_ok_to_test(line) {
            commands.push(Command::OkToTest);
        } else if let Some(c) = LGTM.captures(line) {
            commands.push(if c.get(1).is_some() {
                Command::LgtmCancel
            } else {
                Command::Lgtm
            });
        } else {
            let contexts = override_contexts(line);
            if !contexts.is_empty() {
                commands.push(Command::Override(contexts));
            }
        }
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_each_command() {
        assert_eq!(parse_commands("/test all"), vec![Command::TestAll]);
        assert_eq!(parse_commands("/test all, please"), vec![Command::TestAll]);
        assert_eq!(parse_commands("/retest"), vec![Command::Retest]);
        assert_eq!(parse_commands("/ok-to-test"), vec![Command::OkToTest]);
        assert_eq!(parse_commands("/lgtm"), vec![Command::Lgtm]);
        assert_eq!(parse_commands("/LGTM cancel"), vec![Command::LgtmCancel]);
        assert_eq!(
            parse_commands("/test unit"),
            vec![Command::Test("/test unit".to_string())]
        );
        assert_eq!(
            parse_commands("/override ci/lint  ci/unit"),
            vec![Command::Override(vec!["ci/lint".to_string(), "ci/unit".to_string()])]
        );
    }

    #[test]
    fn commands_must_start_a_line() {
        assert!(parse_commands("please /retest").is_empty());
        assert!(parse_commands("/retesting").is_empty());
        assert!(parse_commands("/testall").is_empty());
        assert!(!is_retest("I will /retest later"));
    }

    #[test]
    fn multiple_commands_in_order() {
        let body = "looks good\n/ok-to-test\n/retest\n";
        assert_eq!(parse_commands(body), vec![Command::OkToTest, Command::Retest]);
    }

    #[test]
    fn test_all_is_not_explicit() {
        assert!(!is_explicit_test("/test all"));
        assert!(is_explicit_test("/test unit"));
        assert!(is_test_all("hi\n/test all\n"));
    }

    #[test]
    fn override_needs_an_argument() {
        assert!(override_contexts("/override").is_empty());
        assert!(override_contexts("/override   ").is_empty());
        assert_eq!(override_contexts("/override x"), vec!["x"]);
    }
}

//! The breakpoint data model and its `breakpoint_set` wire serialization.

use dbgp_wire::{CommandBuilder, TransactionId};

/// The operator a `hit_condition` compares the engine's running hit count
/// against. Defaults to [`HitCondition::Equal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitCondition {
    /// `>=`: break once the hit count reaches or exceeds `hit_value`.
    GreaterOrEqual,
    /// `==`: break exactly on the `hit_value`th hit.
    Equal,
    /// `%`: break every `hit_value`th hit.
    Modulo,
}

impl HitCondition {
    fn wire_str(self) -> &'static str {
        match self {
            HitCondition::GreaterOrEqual => ">=",
            HitCondition::Equal => "==",
            HitCondition::Modulo => "%",
        }
    }
}

/// Parse a DAP `hitCondition` string (`"5"`, `">= 5"`, `"% 2"`, …) into an
/// operator and a non-negative integer. Defaults to [`HitCondition::Equal`]
/// when no operator prefix is present.
pub fn parse_hit_condition(raw: &str) -> Result<(HitCondition, u64), String> {
    let trimmed = raw.trim();
    let (op, rest) = if let Some(r) = trimmed.strip_prefix(">=") {
        (HitCondition::GreaterOrEqual, r)
    } else if let Some(r) = trimmed.strip_prefix("==") {
        (HitCondition::Equal, r)
    } else if let Some(r) = trimmed.strip_prefix('%') {
        (HitCondition::Modulo, r)
    } else {
        (HitCondition::Equal, trimmed)
    };
    rest.trim().parse::<u64>().map(|value| (op, value)).map_err(|_| format!("invalid hit_condition: {raw:?}"))
}

/// A hit-count gate shared by every breakpoint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitGate {
    /// The comparison operator.
    pub condition: HitCondition,
    /// The value it compares the running hit count against.
    pub value: u64,
}

/// A breakpoint as the UI describes it, independent of any connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Breakpoint {
    /// An unconditional breakpoint on a line.
    Line {
        /// The server-side file URI.
        file_uri: String,
        /// 1-based line number.
        line: u32,
        /// Optional hit-count gate.
        hit: Option<HitGate>,
    },
    /// A breakpoint on a line, gated additionally by a boolean expression.
    Conditional {
        /// The boolean expression, evaluated by the engine.
        expression: String,
        /// The server-side file URI.
        file_uri: String,
        /// 1-based line number.
        line: u32,
        /// Optional hit-count gate.
        hit: Option<HitGate>,
    },
    /// Breaks when an exception whose class name matches `class_name_pattern` is thrown.
    Exception {
        /// A glob-style pattern over the exception's class name.
        class_name_pattern: String,
    },
    /// Breaks on entry to a named function.
    Call {
        /// The function (or method) name.
        function_name: String,
        /// Optional boolean expression gating the break.
        condition: Option<String>,
        /// Optional hit-count gate.
        hit: Option<HitGate>,
    },
}

impl Breakpoint {
    /// Render this breakpoint as a `breakpoint_set` command for transaction `tx`.
    #[must_use]
    pub fn to_command(&self, tx: TransactionId) -> CommandBuilder {
        match self {
            Breakpoint::Line { file_uri, line, hit } => {
                apply_hit(CommandBuilder::new("breakpoint_set", tx).flag('t', "line").flag('f', file_uri).flag('n', *line), hit)
            }
            Breakpoint::Conditional { expression, file_uri, line, hit } => apply_hit(
                CommandBuilder::new("breakpoint_set", tx)
                    .flag('t', "conditional")
                    .flag('f', file_uri)
                    .flag('n', *line),
                hit,
            )
            .data(expression.as_bytes()),
            Breakpoint::Exception { class_name_pattern } => {
                CommandBuilder::new("breakpoint_set", tx).flag('t', "exception").flag('x', class_name_pattern)
            }
            Breakpoint::Call { function_name, condition, hit } => {
                let builder = apply_hit(CommandBuilder::new("breakpoint_set", tx).flag('t', "call").flag('m', function_name), hit);
                match condition {
                    Some(expr) => builder.data(expr.as_bytes()),
                    None => builder,
                }
            }
        }
    }

    /// The location this breakpoint resolves at, for line-addressable
    /// kinds (`Line`/`Conditional`).
    #[must_use]
    pub fn location(&self) -> Option<(&str, u32)> {
        match self {
            Breakpoint::Line { file_uri, line, .. } | Breakpoint::Conditional { file_uri, line, .. } => Some((file_uri, *line)),
            Breakpoint::Exception { .. } | Breakpoint::Call { .. } => None,
        }
    }
}

fn apply_hit(builder: CommandBuilder, hit: &Option<HitGate>) -> CommandBuilder {
    match hit {
        Some(gate) => builder.flag('h', gate.value).flag('o', gate.condition.wire_str()),
        None => builder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must;

    #[test]
    fn parse_hit_condition_default_operator() {
        let (op, value) = must(parse_hit_condition("5"));
        assert_eq!(op, HitCondition::Equal);
        assert_eq!(value, 5);
    }

    #[test]
    fn parse_hit_condition_with_operator() {
        let (op, value) = must(parse_hit_condition(">= 3"));
        assert_eq!(op, HitCondition::GreaterOrEqual);
        assert_eq!(value, 3);
        let (op, value) = must(parse_hit_condition("%2"));
        assert_eq!(op, HitCondition::Modulo);
        assert_eq!(value, 2);
    }

    #[test]
    fn parse_hit_condition_rejects_garbage() {
        assert!(parse_hit_condition("not a number").is_err());
    }

    #[test]
    fn line_breakpoint_command() {
        let bp = Breakpoint::Line { file_uri: "file:///a.php".to_string(), line: 10, hit: None };
        let cmd = bp.to_command(1).build();
        assert_eq!(cmd, "breakpoint_set -i 1 -t line -f file:///a.php -n 10");
    }

    #[test]
    fn line_breakpoint_with_hit_condition() {
        let bp = Breakpoint::Line {
            file_uri: "file:///a.php".to_string(),
            line: 10,
            hit: Some(HitGate { condition: HitCondition::GreaterOrEqual, value: 3 }),
        };
        let cmd = bp.to_command(1).build();
        assert_eq!(cmd, "breakpoint_set -i 1 -t line -f file:///a.php -n 10 -h 3 -o >=");
    }

    #[test]
    fn conditional_breakpoint_carries_expression_as_data() {
        let bp = Breakpoint::Conditional {
            expression: "$x > 1".to_string(),
            file_uri: "file:///a.php".to_string(),
            line: 10,
            hit: None,
        };
        let cmd = bp.to_command(2).build();
        assert!(cmd.starts_with("breakpoint_set -i 2 -t conditional -f file:///a.php -n 10 -- "));
    }

    #[test]
    fn exception_breakpoint_command() {
        let bp = Breakpoint::Exception { class_name_pattern: "App\\*Exception".to_string() };
        let cmd = bp.to_command(3).build();
        assert_eq!(cmd, "breakpoint_set -i 3 -t exception -x App\\*Exception");
    }

    #[test]
    fn call_breakpoint_without_condition() {
        let bp = Breakpoint::Call { function_name: "my_func".to_string(), condition: None, hit: None };
        let cmd = bp.to_command(4).build();
        assert_eq!(cmd, "breakpoint_set -i 4 -t call -m my_func");
    }

    #[test]
    fn call_breakpoint_with_condition_as_data() {
        let bp =
            Breakpoint::Call { function_name: "my_func".to_string(), condition: Some("$y == 2".to_string()), hit: None };
        let cmd = bp.to_command(4).build();
        assert!(cmd.starts_with("breakpoint_set -i 4 -t call -m my_func -- "));
    }

    #[test]
    fn location_only_for_line_kinds() {
        let line = Breakpoint::Line { file_uri: "file:///a.php".to_string(), line: 1, hit: None };
        assert_eq!(line.location(), Some(("file:///a.php", 1)));
        let exc = Breakpoint::Exception { class_name_pattern: "*".to_string() };
        assert_eq!(exc.location(), None);
    }
}

//! Parser for Clash routing rule lines and structured rule records.
//!
//! The grammar is comma-delimited with balanced-parenthesis condition groups,
//! so the parser is a hand-written scanner; `nom` handles the low-level
//! condition token recognition.

use nom::{
    IResult,
    bytes::complete::{tag, take_while1},
};
use serde::Deserialize;

use crate::error::RuleError;
use crate::ir::{
    ExtraParam, LeafRule, LogicOp, LogicRule, MatchRule, RuleAction, RuleKind, RuleNode, SubRule,
};

/// Maximum nesting depth for logic conditions. Deeper trees are rejected to
/// keep recursive evaluation bounded.
pub const MAX_LOGIC_DEPTH: usize = 16;

/// Structured form of a rule, as stored in configuration records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Option<String>,
    pub conditions: Option<Vec<String>>,
    pub condition: Option<String>,
    pub action: String,
    pub additional_params: Option<String>,
}

/// Parse a single rule line.
pub fn parse_rule_line(line: &str) -> Result<RuleNode, RuleError> {
    let line = line.trim();
    if line.starts_with("AND,") || line.starts_with("OR,") || line.starts_with("NOT,") {
        parse_logic_rule(line)
    } else if line.starts_with("MATCH") {
        parse_match_rule(line)
    } else if line.starts_with("SUB-RULE") {
        parse_sub_rule(line)
    } else {
        parse_leaf_rule(line)
    }
}

/// Parse a structured rule record by reassembling its canonical line form.
pub fn parse_rule_record(record: &RuleRecord) -> Result<RuleNode, RuleError> {
    match record.kind.as_str() {
        "AND" | "OR" | "NOT" => {
            let conditions = record
                .conditions
                .as_deref()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    RuleError::MalformedExpression("a condition list must be provided".to_owned())
                })?;
            let joined = conditions
                .iter()
                .map(|c| strip_redundant_parens(&format!("({c})")))
                .collect::<Vec<_>>()
                .join(",");
            let line = format!("{},({joined}),{}", record.kind, record.action);
            parse_logic_rule(&line)
        }
        "MATCH" => parse_match_rule(&format!("MATCH,{}", record.action)),
        "SUB-RULE" => {
            let condition = record.condition.as_deref().ok_or_else(|| {
                RuleError::MalformedExpression("sub-rule requires a condition".to_owned())
            })?;
            let condition = strip_redundant_parens(&format!("({condition})"));
            parse_sub_rule(&format!("SUB-RULE,{condition},{}", record.action))
        }
        _ => {
            let payload = record.payload.as_deref().unwrap_or_default();
            let mut line = format!("{},{payload},{}", record.kind, record.action);
            if let Some(extra) = &record.additional_params {
                line.push(',');
                line.push_str(extra);
            }
            parse_leaf_rule(&line)
        }
    }
}

/// Parse multiple rules from text, one per line, preserving order. Lines that
/// fail to parse are logged and skipped.
#[must_use]
pub fn parse_rules(text: &str) -> Vec<RuleNode> {
    let mut rules = Vec::new();
    for line in text.trim().lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_rule_line(line) {
            Ok(rule) => rules.push(rule),
            Err(err) => tracing::debug!(line, error = %err, "skipping unparseable rule"),
        }
    }
    rules
}

fn parse_match_rule(line: &str) -> Result<RuleNode, RuleError> {
    let (_, action) = line
        .split_once(',')
        .ok_or_else(|| RuleError::MalformedExpression(format!("invalid rule format: {line}")))?;
    Ok(RuleNode::Match(MatchRule {
        action: RuleAction::parse(action),
    }))
}

fn parse_leaf_rule(line: &str) -> Result<RuleNode, RuleError> {
    let parts: Vec<&str> = line.split(',').collect();
    if !(3..=4).contains(&parts.len()) {
        return Err(RuleError::MalformedExpression(format!(
            "invalid rule format: {line}"
        )));
    }

    let kind = RuleKind::parse(parts[0])?;
    let payload = parts[1].trim();
    if payload.is_empty() {
        return Err(RuleError::MalformedExpression(format!(
            "invalid rule format: {line}"
        )));
    }
    let action = RuleAction::parse(parts[2]);
    let extra = match parts.get(3) {
        Some(raw) => Some(ExtraParam::parse(raw)?),
        None => None,
    };

    Ok(RuleNode::Leaf(LeafRule::new(kind, payload, action, extra)?))
}

fn parse_logic_rule(line: &str) -> Result<RuleNode, RuleError> {
    let (op_token, rest) = line
        .split_once(',')
        .ok_or_else(|| RuleError::MalformedExpression(format!("invalid logic rule: {line}")))?;
    let op = parse_logic_op(op_token)?;

    let last_comma = rest.rfind(',').ok_or_else(|| {
        RuleError::MalformedExpression(format!("invalid logic rule format: {line}"))
    })?;
    let conditions_str = &rest[..last_comma];
    let action_str = &rest[last_comma + 1..];

    if paren_balance(conditions_str) != Some(0) {
        return Err(RuleError::MalformedExpression(format!(
            "mismatched parentheses in logic rule: {line}"
        )));
    }

    let conditions = parse_logic_conditions(conditions_str, 0)?;
    let action = RuleAction::parse(action_str);

    Ok(RuleNode::Logic(LogicRule::new(op, conditions, action)?))
}

fn parse_sub_rule(line: &str) -> Result<RuleNode, RuleError> {
    let (_, rest) = line
        .split_once(',')
        .ok_or_else(|| RuleError::MalformedExpression(format!("invalid sub-rule: {line}")))?;
    let last_comma = rest
        .rfind(',')
        .ok_or_else(|| RuleError::MalformedExpression(format!("invalid sub-rule format: {line}")))?;
    let condition_str = &rest[..last_comma];
    let action = rest[last_comma + 1..].trim().to_owned();

    if paren_balance(condition_str) != Some(0) {
        return Err(RuleError::MalformedExpression(format!(
            "mismatched parentheses in sub-rule: {line}"
        )));
    }

    let mut conditions = parse_logic_conditions(condition_str, 0)?;
    if conditions.len() != 1 {
        return Err(RuleError::MalformedExpression(format!(
            "invalid sub-rule condition: {condition_str}"
        )));
    }

    Ok(RuleNode::Sub(SubRule {
        condition: Box::new(conditions.remove(0)),
        action,
    }))
}

fn parse_logic_op(token: &str) -> Result<LogicOp, RuleError> {
    match token.trim().to_uppercase().as_str() {
        "AND" => Ok(LogicOp::And),
        "OR" => Ok(LogicOp::Or),
        "NOT" => Ok(LogicOp::Not),
        other => Err(RuleError::UnknownRuleKind(other.to_owned())),
    }
}

/// Parenthesis balance of `s`, or `None` when a closing paren appears before
/// its opener.
fn paren_balance(s: &str) -> Option<i32> {
    let mut balance = 0i32;
    for ch in s.chars() {
        match ch {
            '(' => balance += 1,
            ')' => balance -= 1,
            _ => {}
        }
        if balance < 0 {
            return None;
        }
    }
    Some(balance)
}

/// Strip redundant wrapping parentheses: `((DOMAIN,x))` becomes `(DOMAIN,x)`.
///
/// A layer is redundant when the depth-one level carries no direct content,
/// which is detected by collecting the characters seen at depth one.
fn strip_redundant_parens(s: &str) -> String {
    let mut current = s.to_owned();
    loop {
        let mut balance = 0i32;
        let mut has_content = false;
        for ch in current.chars() {
            match ch {
                '(' => balance += 1,
                ')' => balance -= 1,
                ',' => {}
                _ => {
                    if balance == 1 {
                        has_content = true;
                    }
                }
            }
        }
        if has_content || current.len() < 2 || !current.starts_with('(') {
            return current;
        }
        current = current[1..current.len() - 1].to_owned();
    }
}

/// Split a conditions block into its top-level parenthesised groups.
fn extract_condition_groups(conditions_str: &str) -> Vec<String> {
    let cleaned: String = conditions_str.chars().filter(|c| *c != ' ').collect();
    let cleaned = strip_redundant_parens(&cleaned);

    let mut groups = Vec::new();
    let mut balance = 0i32;
    let mut start = 0;
    for (i, ch) in cleaned.char_indices() {
        match ch {
            '(' => {
                if balance == 0 {
                    start = i;
                }
                balance += 1;
            }
            ')' => {
                balance -= 1;
                if balance == 0 {
                    groups.push(cleaned[start..=i].to_owned());
                }
            }
            _ => {}
        }
    }
    groups
}

/// Recognise the `KIND,payload` content of a simple condition group.
fn condition_token(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, kind) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-')(input)?;
    let (payload, _) = tag(",")(input)?;
    Ok(("", (kind, payload)))
}

/// Parse the conditions inside a logic rule, supporting nested logic.
///
/// Nested conditions carry the implicit `COMPATIBLE` action.
fn parse_logic_conditions(conditions_str: &str, depth: usize) -> Result<Vec<RuleNode>, RuleError> {
    if depth > MAX_LOGIC_DEPTH {
        return Err(RuleError::MalformedExpression(format!(
            "logic nesting exceeds maximum depth of {MAX_LOGIC_DEPTH}"
        )));
    }

    if conditions_str.is_empty() {
        return Ok(Vec::new());
    }

    let mut conditions = Vec::new();
    for group in extract_condition_groups(conditions_str) {
        if !group.starts_with('(') || !group.ends_with(')') {
            return Err(RuleError::MalformedExpression(format!(
                "invalid nested logic rule format: {group}"
            )));
        }
        let content = &group[1..group.len() - 1];
        let upper = content.to_uppercase();
        if upper.starts_with("AND,") || upper.starts_with("OR,") || upper.starts_with("NOT,") {
            let (op_token, nested_str) = content.split_once(',').ok_or_else(|| {
                RuleError::MalformedExpression(format!("invalid nested logic rule: {content}"))
            })?;
            let op = parse_logic_op(op_token)?;
            let nested = parse_logic_conditions(&format!("({nested_str})"), depth + 1)?;
            conditions.push(RuleNode::Logic(LogicRule::new(
                op,
                nested,
                RuleAction::Compatible,
            )?));
        } else {
            let (_, (kind_token, payload)) = condition_token(content).map_err(|_| {
                RuleError::MalformedExpression(format!("invalid rule format: {content}"))
            })?;
            let kind = RuleKind::parse(kind_token)?;
            conditions.push(RuleNode::Leaf(LeafRule::new(
                kind,
                payload.trim(),
                RuleAction::Compatible,
                None,
            )?));
        }
    }
    Ok(conditions)
}

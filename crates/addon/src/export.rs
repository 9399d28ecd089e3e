use serde::Serialize;
use tracing::warn;

use fluxgate_rules::parse_rule_line;

use crate::error::AddonError;

/// The rule-provider document shape Clash-compatible clients import.
#[derive(Debug, Serialize)]
struct ProviderDocument {
    payload: Vec<String>,
}

/// Build a Clash rule-provider YAML document from addon rule lines.
///
/// Each line is a condition string without an action; it is parsed with the
/// implicit `COMPATIBLE` action, provider-invalid rules (RULE-SET,
/// sub-rules, match rules) are rejected with a warning, and surviving
/// conditions are re-serialized canonically and deduplicated.
pub fn clash_provider_document<'a, I>(lines: I) -> Result<String, AddonError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut payload: Vec<String> = Vec::new();
    for (addon_id, line) in lines {
        let raw = format!("{line},COMPATIBLE");
        let condition = match parse_rule_line(&raw) {
            Ok(rule) if rule.valid_for_provider() => rule.condition_string(),
            Ok(_) => {
                warn!(addon = addon_id, rule = line, "rule is not provider-valid");
                continue;
            }
            Err(err) => {
                warn!(addon = addon_id, rule = line, error = %err, "invalid rule");
                continue;
            }
        };
        if !payload.contains(&condition) {
            payload.push(condition);
        }
    }

    serde_yaml_ng::to_string(&ProviderDocument { payload })
        .map_err(|e| AddonError::Other(format!("failed to serialize provider document: {e}")))
}

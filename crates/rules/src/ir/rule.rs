use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::ir::kind::{ExtraParam, LogicOp, RuleAction, RuleKind};

/// A single Clash condition with its action and optional trailing parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafRule {
    pub kind: RuleKind,
    pub payload: String,
    pub action: RuleAction,
    pub extra: Option<ExtraParam>,
}

impl LeafRule {
    /// Construct a leaf after validating the payload against the kind.
    pub fn new(
        kind: RuleKind,
        payload: impl Into<String>,
        action: RuleAction,
        extra: Option<ExtraParam>,
    ) -> Result<Self, RuleError> {
        let payload = payload.into();
        validate_payload(kind, &payload)?;
        Ok(Self {
            kind,
            payload,
            action,
            extra,
        })
    }

    /// The condition half of the rule: `KIND,payload`.
    #[must_use]
    pub fn condition_string(&self) -> String {
        format!("{},{}", self.kind, self.payload)
    }
}

impl std::fmt::Display for LeafRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.condition_string(), self.action)?;
        if let Some(extra) = self.extra {
            write!(f, ",{extra}")?;
        }
        Ok(())
    }
}

/// An AND/OR/NOT combination of nested conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicRule {
    pub op: LogicOp,
    pub conditions: Vec<RuleNode>,
    pub action: RuleAction,
}

impl LogicRule {
    /// Construct a logic rule, enforcing operator arity: NOT takes exactly
    /// one condition, AND/OR at least one.
    pub fn new(
        op: LogicOp,
        conditions: Vec<RuleNode>,
        action: RuleAction,
    ) -> Result<Self, RuleError> {
        match op {
            LogicOp::Not if conditions.len() != 1 => {
                return Err(RuleError::MalformedExpression(format!(
                    "NOT takes exactly one condition, got {}",
                    conditions.len()
                )));
            }
            LogicOp::And | LogicOp::Or if conditions.is_empty() => {
                return Err(RuleError::MalformedExpression(
                    "a condition list must be provided".to_owned(),
                ));
            }
            _ => {}
        }
        Ok(Self {
            op,
            conditions,
            action,
        })
    }

    #[must_use]
    pub fn condition_string(&self) -> String {
        let inner = self
            .conditions
            .iter()
            .map(|c| format!("({})", c.condition_string()))
            .collect::<Vec<_>>()
            .join(",");
        format!("{},({inner})", self.op)
    }
}

impl std::fmt::Display for LogicRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.condition_string(), self.action)
    }
}

/// Named sub-rule routing. Kept for config parity; never matched by the hook
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubRule {
    pub condition: Box<RuleNode>,
    pub action: String,
}

impl SubRule {
    #[must_use]
    pub fn condition_string(&self) -> String {
        format!("SUB-RULE,({})", self.condition.condition_string())
    }
}

impl std::fmt::Display for SubRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.condition_string(), self.action)
    }
}

/// The unconditional terminal rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRule {
    pub action: RuleAction,
}

impl MatchRule {
    #[must_use]
    pub fn condition_string() -> &'static str {
        "MATCH"
    }
}

impl std::fmt::Display for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MATCH,{}", self.action)
    }
}

/// A parsed rule tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuleNode {
    Leaf(LeafRule),
    Logic(LogicRule),
    Sub(SubRule),
    Match(MatchRule),
}

impl RuleNode {
    /// Deterministic serialization of the condition (without the action).
    #[must_use]
    pub fn condition_string(&self) -> String {
        match self {
            Self::Leaf(rule) => rule.condition_string(),
            Self::Logic(rule) => rule.condition_string(),
            Self::Sub(rule) => rule.condition_string(),
            Self::Match(_) => MatchRule::condition_string().to_owned(),
        }
    }

    /// The rule's action.
    #[must_use]
    pub fn action_string(&self) -> String {
        match self {
            Self::Leaf(rule) => rule.action.to_string(),
            Self::Logic(rule) => rule.action.to_string(),
            Self::Sub(rule) => rule.action.clone(),
            Self::Match(rule) => rule.action.to_string(),
        }
    }

    /// Whether this rule may be exported to a Clash rule provider. SUB-RULE
    /// and MATCH entries are not provider-valid, and neither is any tree
    /// containing a RULE-SET reference.
    #[must_use]
    pub fn valid_for_provider(&self) -> bool {
        match self {
            Self::Sub(_) | Self::Match(_) => false,
            Self::Leaf(rule) => rule.kind != RuleKind::RuleSet,
            Self::Logic(rule) => rule.conditions.iter().all(Self::valid_for_provider),
        }
    }
}

impl std::fmt::Display for RuleNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(rule) => rule.fmt(f),
            Self::Logic(rule) => rule.fmt(f),
            Self::Sub(rule) => rule.fmt(f),
            Self::Match(rule) => rule.fmt(f),
        }
    }
}

/// Rules compare equal when their canonical text forms agree. This drives
/// deduplication in the config export path.
impl PartialEq for RuleNode {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for RuleNode {}

/// Validate a payload against its rule kind.
pub fn validate_payload(kind: RuleKind, payload: &str) -> Result<(), RuleError> {
    let invalid = || RuleError::InvalidPayload {
        kind: kind.as_str().to_owned(),
        payload: payload.to_owned(),
    };

    if payload.is_empty() {
        return Err(invalid());
    }

    match kind {
        RuleKind::IpCidr | RuleKind::SrcIpCidr => {
            let (addr, prefix) = parse_cidr(payload).ok_or_else(invalid)?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return Err(invalid());
            }
        }
        RuleKind::IpCidr6 => {
            let (addr, prefix) = parse_cidr(payload).ok_or_else(invalid)?;
            if !addr.is_ipv6() || prefix > 128 {
                return Err(invalid());
            }
        }
        RuleKind::IpSuffix | RuleKind::SrcIpSuffix => {
            let (addr, suffix) = parse_cidr(payload).ok_or_else(invalid)?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            if suffix > max {
                return Err(invalid());
            }
        }
        RuleKind::DstPort | RuleKind::SrcPort => {
            for part in payload.split([',', '/']) {
                if let Some((start, end)) = part.split_once('-') {
                    start.parse::<u16>().map_err(|_| invalid())?;
                    end.parse::<u16>().map_err(|_| invalid())?;
                } else {
                    part.parse::<u16>().map_err(|_| invalid())?;
                }
            }
        }
        RuleKind::Network => {
            let upper = payload.to_uppercase();
            if upper != "TCP" && upper != "UDP" {
                return Err(invalid());
            }
        }
        RuleKind::DomainRegex | RuleKind::ProcessPathRegex | RuleKind::ProcessNameRegex => {
            regex::Regex::new(payload).map_err(|_| invalid())?;
        }
        _ => {}
    }

    Ok(())
}

/// Split `addr/prefix` into its parts. A bare address is a host-length
/// network, mirroring non-strict CIDR parsing.
pub(crate) fn parse_cidr(payload: &str) -> Option<(IpAddr, u8)> {
    match payload.split_once('/') {
        Some((addr, prefix)) => {
            let addr: IpAddr = addr.parse().ok()?;
            let prefix: u8 = prefix.parse().ok()?;
            Some((addr, prefix))
        }
        None => {
            let addr: IpAddr = payload.parse().ok()?;
            let prefix = if addr.is_ipv4() { 32 } else { 128 };
            Some((addr, prefix))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(kind: RuleKind, payload: &str) -> LeafRule {
        LeafRule::new(kind, payload, RuleAction::Direct, None).unwrap()
    }

    #[test]
    fn leaf_display() {
        let rule = leaf(RuleKind::Domain, "baidu.com");
        assert_eq!(rule.to_string(), "DOMAIN,baidu.com,DIRECT");
    }

    #[test]
    fn leaf_display_with_extra() {
        let rule = LeafRule::new(
            RuleKind::IpCidr,
            "192.168.1.0/24",
            RuleAction::Reject,
            Some(ExtraParam::NoResolve),
        )
        .unwrap();
        assert_eq!(rule.to_string(), "IP-CIDR,192.168.1.0/24,REJECT,no-resolve");
    }

    #[test]
    fn logic_condition_string_nests() {
        let inner = LogicRule::new(
            LogicOp::Not,
            vec![RuleNode::Leaf(
                LeafRule::new(RuleKind::DstPort, "80", RuleAction::Compatible, None).unwrap(),
            )],
            RuleAction::Compatible,
        )
        .unwrap();
        let outer = LogicRule::new(
            LogicOp::And,
            vec![
                RuleNode::Leaf(
                    LeafRule::new(RuleKind::Domain, "baidu.com", RuleAction::Compatible, None)
                        .unwrap(),
                ),
                RuleNode::Logic(inner),
            ],
            RuleAction::Direct,
        )
        .unwrap();
        assert_eq!(
            outer.to_string(),
            "AND,((DOMAIN,baidu.com),(NOT,(DST-PORT,80))),DIRECT"
        );
    }

    #[test]
    fn not_requires_exactly_one_condition() {
        let err = LogicRule::new(LogicOp::Not, Vec::new(), RuleAction::Direct).unwrap_err();
        assert!(matches!(err, RuleError::MalformedExpression(_)));
    }

    #[test]
    fn and_requires_conditions() {
        let err = LogicRule::new(LogicOp::And, Vec::new(), RuleAction::Direct).unwrap_err();
        assert!(matches!(err, RuleError::MalformedExpression(_)));
    }

    #[test]
    fn equality_is_canonical_text() {
        let a = RuleNode::Leaf(leaf(RuleKind::Domain, "baidu.com"));
        let b = RuleNode::Leaf(leaf(RuleKind::Domain, "baidu.com"));
        let c = RuleNode::Leaf(leaf(RuleKind::Domain, "google.com"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cidr_validation() {
        assert!(LeafRule::new(RuleKind::IpCidr, "192.168.1.0/24", RuleAction::Direct, None).is_ok());
        assert!(
            LeafRule::new(RuleKind::IpCidr6, "2620:0:2d0:200::7/32", RuleAction::Direct, None)
                .is_ok()
        );
        assert!(LeafRule::new(RuleKind::IpCidr, "not-a-cidr", RuleAction::Direct, None).is_err());
        assert!(LeafRule::new(RuleKind::IpCidr, "192.168.1.0/40", RuleAction::Direct, None).is_err());
        assert!(
            LeafRule::new(RuleKind::IpCidr6, "192.168.1.0/24", RuleAction::Direct, None).is_err()
        );
    }

    #[test]
    fn port_validation() {
        assert!(LeafRule::new(RuleKind::DstPort, "80", RuleAction::Direct, None).is_ok());
        assert!(LeafRule::new(RuleKind::DstPort, "8000-9000", RuleAction::Direct, None).is_ok());
        assert!(LeafRule::new(RuleKind::DstPort, "80/443/8000-9000", RuleAction::Direct, None).is_ok());
        assert!(LeafRule::new(RuleKind::DstPort, "http", RuleAction::Direct, None).is_err());
    }

    #[test]
    fn network_validation() {
        assert!(LeafRule::new(RuleKind::Network, "tcp", RuleAction::Direct, None).is_ok());
        assert!(LeafRule::new(RuleKind::Network, "UDP", RuleAction::Direct, None).is_ok());
        assert!(LeafRule::new(RuleKind::Network, "ICMP", RuleAction::Direct, None).is_err());
    }

    #[test]
    fn regex_validation() {
        assert!(LeafRule::new(RuleKind::DomainRegex, r"^.+\.baidu\.com$", RuleAction::Direct, None).is_ok());
        assert!(LeafRule::new(RuleKind::DomainRegex, "(unclosed", RuleAction::Direct, None).is_err());
    }

    #[test]
    fn provider_validity() {
        let plain = RuleNode::Leaf(leaf(RuleKind::Domain, "baidu.com"));
        assert!(plain.valid_for_provider());

        let rule_set = RuleNode::Leaf(
            LeafRule::new(RuleKind::RuleSet, "ads", RuleAction::Reject, None).unwrap(),
        );
        assert!(!rule_set.valid_for_provider());

        let match_rule = RuleNode::Match(MatchRule {
            action: RuleAction::Direct,
        });
        assert!(!match_rule.valid_for_provider());

        let nested = RuleNode::Logic(
            LogicRule::new(LogicOp::And, vec![plain, rule_set], RuleAction::Direct).unwrap(),
        );
        assert!(!nested.valid_for_provider());
    }
}

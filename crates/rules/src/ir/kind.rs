use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// All Clash routing rule kinds the parser recognises.
///
/// Every kind parses and round-trips; only a subset participates in flow
/// matching (the rest exist for config parity and always evaluate false).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuleKind {
    Domain,
    DomainSuffix,
    DomainKeyword,
    DomainRegex,
    DomainWildcard,
    Geosite,
    Geoip,
    IpCidr,
    IpCidr6,
    IpSuffix,
    IpAsn,
    SrcGeoip,
    SrcIpAsn,
    SrcIpCidr,
    SrcIpSuffix,
    DstPort,
    SrcPort,
    InPort,
    InType,
    InUser,
    InName,
    ProcessPath,
    ProcessPathRegex,
    ProcessName,
    ProcessNameRegex,
    Uid,
    Network,
    Dscp,
    RuleSet,
}

impl RuleKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Domain => "DOMAIN",
            Self::DomainSuffix => "DOMAIN-SUFFIX",
            Self::DomainKeyword => "DOMAIN-KEYWORD",
            Self::DomainRegex => "DOMAIN-REGEX",
            Self::DomainWildcard => "DOMAIN-WILDCARD",
            Self::Geosite => "GEOSITE",
            Self::Geoip => "GEOIP",
            Self::IpCidr => "IP-CIDR",
            Self::IpCidr6 => "IP-CIDR6",
            Self::IpSuffix => "IP-SUFFIX",
            Self::IpAsn => "IP-ASN",
            Self::SrcGeoip => "SRC-GEOIP",
            Self::SrcIpAsn => "SRC-IP-ASN",
            Self::SrcIpCidr => "SRC-IP-CIDR",
            Self::SrcIpSuffix => "SRC-IP-SUFFIX",
            Self::DstPort => "DST-PORT",
            Self::SrcPort => "SRC-PORT",
            Self::InPort => "IN-PORT",
            Self::InType => "IN-TYPE",
            Self::InUser => "IN-USER",
            Self::InName => "IN-NAME",
            Self::ProcessPath => "PROCESS-PATH",
            Self::ProcessPathRegex => "PROCESS-PATH-REGEX",
            Self::ProcessName => "PROCESS-NAME",
            Self::ProcessNameRegex => "PROCESS-NAME-REGEX",
            Self::Uid => "UID",
            Self::Network => "NETWORK",
            Self::Dscp => "DSCP",
            Self::RuleSet => "RULE-SET",
        }
    }

    /// Parse an upper-cased kind token.
    pub fn parse(token: &str) -> Result<Self, RuleError> {
        let kind = match token.trim().to_uppercase().as_str() {
            "DOMAIN" => Self::Domain,
            "DOMAIN-SUFFIX" => Self::DomainSuffix,
            "DOMAIN-KEYWORD" => Self::DomainKeyword,
            "DOMAIN-REGEX" => Self::DomainRegex,
            "DOMAIN-WILDCARD" => Self::DomainWildcard,
            "GEOSITE" => Self::Geosite,
            "GEOIP" => Self::Geoip,
            "IP-CIDR" => Self::IpCidr,
            "IP-CIDR6" => Self::IpCidr6,
            "IP-SUFFIX" => Self::IpSuffix,
            "IP-ASN" => Self::IpAsn,
            "SRC-GEOIP" => Self::SrcGeoip,
            "SRC-IP-ASN" => Self::SrcIpAsn,
            "SRC-IP-CIDR" => Self::SrcIpCidr,
            "SRC-IP-SUFFIX" => Self::SrcIpSuffix,
            "DST-PORT" => Self::DstPort,
            "SRC-PORT" => Self::SrcPort,
            "IN-PORT" => Self::InPort,
            "IN-TYPE" => Self::InType,
            "IN-USER" => Self::InUser,
            "IN-NAME" => Self::InName,
            "PROCESS-PATH" => Self::ProcessPath,
            "PROCESS-PATH-REGEX" => Self::ProcessPathRegex,
            "PROCESS-NAME" => Self::ProcessName,
            "PROCESS-NAME-REGEX" => Self::ProcessNameRegex,
            "UID" => Self::Uid,
            "NETWORK" => Self::Network,
            "DSCP" => Self::Dscp,
            "RULE-SET" => Self::RuleSet,
            other => return Err(RuleError::UnknownRuleKind(other.to_owned())),
        };
        Ok(kind)
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for RuleKind {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RuleKind> for String {
    fn from(kind: RuleKind) -> Self {
        kind.as_str().to_owned()
    }
}

/// Logic operators for compound rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicOp {
    And,
    Or,
    Not,
}

impl LogicOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
        }
    }
}

impl std::fmt::Display for LogicOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The action attached to a rule. Opaque to the matcher — only the condition
/// decides hook dispatch; the action is carried through for config export.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleAction {
    Direct,
    Reject,
    RejectDrop,
    Pass,
    /// Implicit action attached to conditions inside logic rules.
    Compatible,
    /// Any other action is a custom proxy-group name.
    Custom(String),
}

impl RuleAction {
    /// Well-known actions parse case-insensitively; everything else is kept
    /// verbatim as a custom proxy group.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        match token.to_uppercase().as_str() {
            "DIRECT" => Self::Direct,
            "REJECT" => Self::Reject,
            "REJECT-DROP" => Self::RejectDrop,
            "PASS" => Self::Pass,
            "COMPATIBLE" => Self::Compatible,
            _ => Self::Custom(token.to_owned()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Direct => "DIRECT",
            Self::Reject => "REJECT",
            Self::RejectDrop => "REJECT-DROP",
            Self::Pass => "PASS",
            Self::Compatible => "COMPATIBLE",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trailing rule parameters (`no-resolve`, `src`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtraParam {
    NoResolve,
    Src,
}

impl ExtraParam {
    pub fn parse(token: &str) -> Result<Self, RuleError> {
        match token.trim() {
            "no-resolve" => Ok(Self::NoResolve),
            "src" => Ok(Self::Src),
            other => Err(RuleError::MalformedExpression(format!(
                "unknown additional param: {other}"
            ))),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoResolve => "no-resolve",
            Self::Src => "src",
        }
    }
}

impl std::fmt::Display for ExtraParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

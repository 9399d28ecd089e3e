//! Rule evaluation against live flows.
//!
//! `matches` is total and side-effect free: malformed runtime input (which
//! parse-time validation should have excluded) evaluates to false rather
//! than erroring.

use std::net::IpAddr;

use fluxgate_core::{Flow, FlowKind};

use crate::ir::{LeafRule, LogicOp, RuleKind, RuleNode};
use crate::ir::rule::parse_cidr;

/// Evaluate a rule tree against a flow.
#[must_use]
pub fn matches(rule: &RuleNode, flow: &Flow) -> bool {
    match flow.kind {
        FlowKind::Http => matches_http(rule, flow),
        // Raw TCP flows carry no HTTP metadata; the TCP matcher variant does
        // not participate in hook dispatch yet.
        FlowKind::Tcp => false,
    }
}

fn matches_http(rule: &RuleNode, flow: &Flow) -> bool {
    match rule {
        RuleNode::Leaf(leaf) => matches_leaf(leaf, flow),
        RuleNode::Logic(logic) => match logic.op {
            LogicOp::And => logic.conditions.iter().all(|c| matches_http(c, flow)),
            LogicOp::Or => logic.conditions.iter().any(|c| matches_http(c, flow)),
            LogicOp::Not => logic
                .conditions
                .first()
                .is_some_and(|c| !matches_http(c, flow)),
        },
        RuleNode::Match(_) => true,
        // Sub-rules reference named rule groups for config export only.
        RuleNode::Sub(_) => false,
    }
}

fn matches_leaf(leaf: &LeafRule, flow: &Flow) -> bool {
    let host = flow.pretty_host();
    match leaf.kind {
        RuleKind::Domain => host == leaf.payload,
        RuleKind::DomainKeyword => host.contains(&leaf.payload),
        RuleKind::DomainSuffix => domain_suffix_matches(&leaf.payload, host),
        RuleKind::DomainRegex => regex_matches_at_start(&leaf.payload, host),
        RuleKind::DomainWildcard => wildcard_matches(&leaf.payload, host),
        RuleKind::DstPort => port_matches(&leaf.payload, flow.dst_port()),
        RuleKind::SrcPort => flow
            .client_addr
            .is_some_and(|addr| port_matches(&leaf.payload, addr.port())),
        RuleKind::IpCidr | RuleKind::IpCidr6 => flow
            .server_addr
            .is_some_and(|addr| cidr_matches(&leaf.payload, addr.ip())),
        RuleKind::IpSuffix => flow
            .server_addr
            .is_some_and(|addr| ip_suffix_matches(&leaf.payload, addr.ip())),
        RuleKind::SrcIpCidr => flow
            .client_addr
            .is_some_and(|addr| cidr_matches(&leaf.payload, addr.ip())),
        RuleKind::SrcIpSuffix => flow
            .client_addr
            .is_some_and(|addr| ip_suffix_matches(&leaf.payload, addr.ip())),
        RuleKind::Network => leaf.payload.to_uppercase() == flow.transport.as_str(),
        // RULE-SET references an external provider; the remaining kinds
        // (geo, process, uid, dscp, inbound) have no flow-side data here.
        _ => false,
    }
}

/// `DOMAIN-SUFFIX`: the host equals the payload or ends with `.payload`.
fn domain_suffix_matches(payload: &str, host: &str) -> bool {
    host == payload || host.ends_with(&format!(".{payload}"))
}

/// Apply a regex anchored at the start of the host.
fn regex_matches_at_start(pattern: &str, host: &str) -> bool {
    regex::Regex::new(&format!("^(?:{pattern})"))
        .map(|re| re.is_match(host))
        .unwrap_or(false)
}

/// Clash wildcard domains:
/// - `*.X` matches exactly one subdomain level of `X`;
/// - `+.X` matches `X` itself and any depth of subdomain;
/// - `.X` matches any non-empty subdomain of `X` but not `X` itself;
/// - anything else treats `*` as `.*` and `.` as a literal dot.
fn wildcard_matches(payload: &str, host: &str) -> bool {
    if let Some(domain) = payload.strip_prefix("*.") {
        let pattern = format!(r"^[^.]+\.{}$", regex::escape(domain));
        regex::Regex::new(&pattern)
            .map(|re| re.is_match(host))
            .unwrap_or(false)
    } else if let Some(domain) = payload.strip_prefix("+.") {
        host == domain || host.ends_with(&format!(".{domain}"))
    } else if let Some(domain) = payload.strip_prefix('.') {
        host.ends_with(&format!(".{domain}"))
    } else {
        let pattern = payload.replace('.', r"\.").replace('*', ".*");
        regex_matches_at_start(&pattern, host)
    }
}

/// Port payloads are comma- or slash-separated numbers and `A-B` ranges.
fn port_matches(payload: &str, port: u16) -> bool {
    for part in payload.split([',', '/']) {
        if let Some((start, end)) = part.split_once('-') {
            let (Ok(start), Ok(end)) = (start.parse::<u16>(), end.parse::<u16>()) else {
                continue;
            };
            if (start..=end).contains(&port) {
                return true;
            }
        } else if part.parse::<u16>().is_ok_and(|p| p == port) {
            return true;
        }
    }
    false
}

fn ip_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// CIDR membership: the address's high `prefix` bits equal the network's.
fn cidr_matches(payload: &str, ip: IpAddr) -> bool {
    let Some((net, prefix)) = parse_cidr(payload) else {
        return false;
    };
    if net.is_ipv4() != ip.is_ipv4() {
        return false;
    }
    let width: u32 = if net.is_ipv4() { 32 } else { 128 };
    let prefix = u32::from(prefix);
    if prefix > width {
        return false;
    }
    if prefix == 0 {
        return true;
    }
    let shift = 128 - (128 - width + prefix);
    (ip_to_u128(ip) >> shift) == (ip_to_u128(net) >> shift)
}

/// `IP-SUFFIX`: the low `suffix` bits of both addresses agree; only the same
/// address family can match.
fn ip_suffix_matches(payload: &str, ip: IpAddr) -> bool {
    let Some((net, suffix)) = parse_cidr(payload) else {
        return false;
    };
    if net.is_ipv4() != ip.is_ipv4() {
        return false;
    }
    let suffix = u32::from(suffix);
    if suffix >= 128 {
        return ip_to_u128(ip) == ip_to_u128(net);
    }
    let mask = (1u128 << suffix) - 1;
    (ip_to_u128(ip) & mask) == (ip_to_u128(net) & mask)
}

pub mod error;
pub mod ir;
pub mod matcher;
pub mod parser;

pub use error::RuleError;
pub use ir::{ExtraParam, LeafRule, LogicOp, LogicRule, MatchRule, RuleAction, RuleKind, RuleNode, SubRule};
pub use matcher::matches;
pub use parser::{RuleRecord, parse_rule_line, parse_rule_record, parse_rules};

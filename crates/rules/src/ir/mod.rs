mod kind;
pub(crate) mod rule;

pub use kind::{ExtraParam, LogicOp, RuleAction, RuleKind};
pub use rule::{LeafRule, LogicRule, MatchRule, RuleNode, SubRule};

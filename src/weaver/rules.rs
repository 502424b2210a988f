//! Forwarding rules for tokens changed by committed manipulations.

use std::collections::{HashMap, HashSet};

use crate::model::TokenId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Killed,
    Token(TokenId),
}

#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: HashMap<TokenId, Target>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A rule from a token onto itself clears any rule for it.
    pub fn add(&mut self, token: TokenId, target: Target) {
        if target == Target::Token(token) {
            self.rules.remove(&token);
        } else {
            self.rules.insert(token, target);
        }
    }

    pub fn get(&self, token: TokenId) -> Option<Target> {
        self.rules.get(&token).copied()
    }

    /// Where `token` lives now, or `None` if it was killed.
    pub fn resolve(&self, token: TokenId) -> Option<TokenId> {
        let mut seen = HashSet::new();
        let mut cur = token;
        while seen.insert(cur) {
            match self.rules.get(&cur) {
                None => return Some(cur),
                Some(Target::Killed) => return None,
                Some(Target::Token(next)) => cur = *next,
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_forwarding_chains() {
        let mut rules = RuleTable::new();
        rules.add(TokenId(1), Target::Token(TokenId(5)));
        rules.add(TokenId(5), Target::Token(TokenId(9)));
        assert_eq!(rules.resolve(TokenId(1)), Some(TokenId(9)));
        assert_eq!(rules.resolve(TokenId(2)), Some(TokenId(2)));

        rules.add(TokenId(9), Target::Killed);
        assert_eq!(rules.resolve(TokenId(1)), None);
    }

    #[test]
    fn rule_onto_itself_removes_the_rule() {
        let mut rules = RuleTable::new();
        rules.add(TokenId(3), Target::Killed);
        assert_eq!(rules.len(), 1);
        rules.add(TokenId(3), Target::Token(TokenId(3)));
        assert!(rules.is_empty());
        assert_eq!(rules.resolve(TokenId(3)), Some(TokenId(3)));
    }

    #[test]
    fn cycles_resolve_to_nothing() {
        let mut rules = RuleTable::new();
        rules.add(TokenId(0), Target::Token(TokenId(1)));
        rules.add(TokenId(1), Target::Token(TokenId(0)));
        assert_eq!(rules.resolve(TokenId(0)), None);
    }
}

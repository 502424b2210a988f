//! Transactional text weaver.
//!
//! Manipulations address gaps in the token stream through `WeavePos`
//! (a token plus a slot around it). They are queued in a `Transaction` and
//! either all validated and applied by `commit`, or none of them is.
//! Tokens killed or moved by committed manipulations are tracked in a
//! `RuleTable`, so later positions referring to them are forwarded or skipped.

pub mod rules;
pub mod tokens;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::model::TokenId;

pub use rules::{RuleTable, Target};
pub use tokens::{Token, TokenCursor, TokenStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Header,
    Before,
    After,
    Footer,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::Header, Slot::Before, Slot::After, Slot::Footer];

    /// Header and before lie in the gap in front of the token.
    pub fn is_front(self) -> bool {
        matches!(self, Slot::Header | Slot::Before)
    }

    pub fn name(self) -> &'static str {
        match self {
            Slot::Header => "header",
            Slot::Before => "before",
            Slot::After => "after",
            Slot::Footer => "footer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WeavePos {
    pub token: TokenId,
    pub slot: Slot,
}

impl WeavePos {
    pub fn new(token: TokenId, slot: Slot) -> Self {
        Self { token, slot }
    }

    pub fn header(token: TokenId) -> Self {
        Self::new(token, Slot::Header)
    }

    pub fn before(token: TokenId) -> Self {
        Self::new(token, Slot::Before)
    }

    pub fn after(token: TokenId) -> Self {
        Self::new(token, Slot::After)
    }

    pub fn footer(token: TokenId) -> Self {
        Self::new(token, Slot::Footer)
    }
}

impl fmt::Display for WeavePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} token {}", self.slot.name(), self.token.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeaveError {
    #[error("token {token} is not part of the unit")]
    InvalidToken { token: usize },
    #[error("range from {from} to {to} is reversed")]
    ReversedRange { from: WeavePos, to: WeavePos },
    #[error("{pos} lies inside the expansion of macro {name}")]
    MacroHygiene { pos: WeavePos, name: String },
    #[error("move destination {dest} lies inside the moved range")]
    MoveIntoRange { dest: WeavePos },
    #[error("token {token}: {message}")]
    BadExpansion { token: usize, message: String },
}

#[derive(Debug, Clone)]
enum Manipulation {
    Insert {
        pos: WeavePos,
        text: String,
        before: bool,
    },
    Replace {
        from: WeavePos,
        to: WeavePos,
        text: String,
    },
    Kill {
        from: WeavePos,
        to: WeavePos,
    },
    Move {
        from: WeavePos,
        to: WeavePos,
        dest: WeavePos,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub applied: usize,
    /// Manipulations that reached a killed token.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct TextWeaver {
    stream: TokenStream,
    /// Output order; killed and moved-away tokens stay in place, unprinted.
    seq: Vec<TokenId>,
    /// Index of every token in `seq`.
    index: HashMap<TokenId, usize>,
    dead: HashSet<TokenId>,
    /// Dead tokens whose leading whitespace is still printed.
    keep_ws: HashSet<TokenId>,
    inserts: BTreeMap<WeavePos, Vec<String>>,
    rules: RuleTable,
    macro_aware: bool,
}

impl TextWeaver {
    pub fn new(stream: TokenStream, macro_aware: bool) -> Self {
        let seq: Vec<TokenId> = stream.ids().collect();
        Self {
            index: index_of_all(&seq),
            seq,
            stream,
            dead: HashSet::new(),
            keep_ws: HashSet::new(),
            inserts: BTreeMap::new(),
            rules: RuleTable::new(),
            macro_aware,
        }
    }

    pub fn stream(&self) -> &TokenStream {
        &self.stream
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn transaction(&mut self) -> Transaction<'_> {
        Transaction {
            weaver: self,
            queue: Vec::new(),
        }
    }

    /// Current position of `pos`, or `None` if its token was killed.
    pub fn resolve(&self, pos: WeavePos) -> Option<WeavePos> {
        self.rules
            .resolve(pos.token)
            .map(|token| WeavePos::new(token, pos.slot))
    }

    /// The woven text.
    pub fn realize(&self) -> String {
        let mut out = String::new();
        let mut prev_exp: Option<usize> = None;
        for &t in &self.seq {
            let Some(tok) = self.stream.get(t) else {
                continue;
            };
            let alive = !self.dead.contains(&t);
            let exp = if alive { tok.expansion } else { None };
            let inside_macro = exp.is_some() && exp == prev_exp;
            if (alive && !inside_macro) || self.keep_ws.contains(&t) {
                out.push_str(&tok.ws);
            }
            self.emit(&mut out, t, &[Slot::Header, Slot::Before]);
            if alive {
                match exp {
                    Some(_) if inside_macro => {}
                    Some(e) => out.push_str(self.stream.expansion(e).map_or("", |x| x.call.as_str())),
                    None => out.push_str(&tok.text),
                }
            }
            self.emit(&mut out, t, &[Slot::After, Slot::Footer]);
            prev_exp = exp;
        }
        out
    }

    fn emit(&self, out: &mut String, token: TokenId, slots: &[Slot]) {
        for &slot in slots {
            if let Some(texts) = self.inserts.get(&WeavePos::new(token, slot)) {
                for text in texts {
                    out.push_str(text);
                }
            }
        }
    }

    fn index_of(&self, token: TokenId) -> Option<usize> {
        self.index.get(&token).copied()
    }

    /// Position in output order, for comparing gaps.
    fn key(&self, pos: WeavePos) -> Option<(usize, Slot)> {
        Some((self.index_of(pos.token)?, pos.slot))
    }

    /// Bounds of the expansion `pos` lies strictly inside. Only the front
    /// slots of its first token and the back slots of its last token are
    /// outside; anything else is a hygiene error unless macro-aware.
    fn enclosing_expansion(&self, pos: WeavePos) -> Result<Option<(TokenId, TokenId)>, WeaveError> {
        if pos.token.0 >= self.stream.len() {
            return Err(WeaveError::InvalidToken { token: pos.token.0 });
        }
        let Some((first, last)) = self.stream.expansion_bounds(pos.token) else {
            return Ok(None);
        };
        let boundary = if pos.slot.is_front() { first } else { last };
        if pos.token == boundary {
            return Ok(None);
        }
        if self.macro_aware {
            return Ok(Some((first, last)));
        }
        let name = self
            .stream
            .get(pos.token)
            .and_then(|t| t.expansion)
            .and_then(|e| self.stream.expansion(e))
            .map_or_else(String::new, |e| e.name.clone());
        Err(WeaveError::MacroHygiene { pos, name })
    }

    /// A single position snaps to the boundary its slot faces.
    fn check_pos(&self, pos: WeavePos) -> Result<WeavePos, WeaveError> {
        Ok(match self.enclosing_expansion(pos)? {
            Some((first, _)) if pos.slot.is_front() => WeavePos::new(first, pos.slot),
            Some((_, last)) => WeavePos::new(last, pos.slot),
            None => pos,
        })
    }

    /// Range ends snap away from each other, so the range grows to cover
    /// the whole expansion.
    fn check_range(&self, from: WeavePos, to: WeavePos) -> Result<(WeavePos, WeavePos), WeaveError> {
        let from = match self.enclosing_expansion(from)? {
            Some((first, _)) => WeavePos::before(first),
            None => from,
        };
        let to = match self.enclosing_expansion(to)? {
            Some((_, last)) => WeavePos::after(last),
            None => to,
        };
        let resolved = self
            .resolve(from)
            .and_then(|f| self.key(f))
            .zip(self.resolve(to).and_then(|t| self.key(t)));
        if let Some((a, b)) = resolved {
            if a > b {
                return Err(WeaveError::ReversedRange { from, to });
            }
        }
        Ok((from, to))
    }

    fn validate(&self, m: Manipulation) -> Result<Manipulation, WeaveError> {
        Ok(match m {
            Manipulation::Insert { pos, text, before } => Manipulation::Insert {
                pos: self.check_pos(pos)?,
                text,
                before,
            },
            Manipulation::Replace { from, to, text } => {
                let (from, to) = self.check_range(from, to)?;
                Manipulation::Replace { from, to, text }
            }
            Manipulation::Kill { from, to } => {
                let (from, to) = self.check_range(from, to)?;
                Manipulation::Kill { from, to }
            }
            Manipulation::Move { from, to, dest } => {
                let (from, to) = self.check_range(from, to)?;
                let dest = self.check_pos(dest)?;
                let keys = (
                    self.resolve(from).and_then(|p| self.key(p)),
                    self.resolve(to).and_then(|p| self.key(p)),
                    self.resolve(dest).and_then(|p| self.key(p)),
                );
                if let (Some(a), Some(b), Some(d)) = keys {
                    if a < d && d < b {
                        return Err(WeaveError::MoveIntoRange { dest });
                    }
                }
                Manipulation::Move { from, to, dest }
            }
        })
    }

    /// Apply one validated manipulation; false if it was skipped.
    fn apply(&mut self, m: Manipulation) -> bool {
        match m {
            Manipulation::Insert { pos, text, before } => {
                let Some(pos) = self.resolve(pos) else {
                    return false;
                };
                self.insert_text(pos, text, before);
                true
            }
            Manipulation::Replace { from, to, text } => {
                let Some((from, to)) = self.resolve_range(from, to) else {
                    return false;
                };
                self.kill_range(from, to);
                self.insert_text(from, text, false);
                true
            }
            Manipulation::Kill { from, to } => {
                let Some((from, to)) = self.resolve_range(from, to) else {
                    return false;
                };
                self.kill_range(from, to);
                true
            }
            Manipulation::Move { from, to, dest } => {
                let Some((from, to)) = self.resolve_range(from, to) else {
                    return false;
                };
                let Some(dest) = self.resolve(dest) else {
                    return false;
                };
                self.move_range(from, to, dest);
                true
            }
        }
    }

    fn insert_text(&mut self, pos: WeavePos, text: String, before: bool) {
        let list = self.inserts.entry(pos).or_default();
        if before {
            list.insert(0, text);
        } else {
            list.push(text);
        }
    }

    fn resolve_range(&self, from: WeavePos, to: WeavePos) -> Option<(WeavePos, WeavePos)> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        (self.key(from)? <= self.key(to)?).then_some((from, to))
    }

    /// Indices in `seq` of the tokens between the gaps `from` and `to`.
    fn covered(&self, from: WeavePos, to: WeavePos) -> Option<(usize, usize)> {
        let (fi, _) = self.key(from)?;
        let (ti, _) = self.key(to)?;
        let first = if from.slot.is_front() { fi } else { fi + 1 };
        let last = if to.slot.is_front() { ti.checked_sub(1)? } else { ti };
        (first <= last).then_some((first, last))
    }

    /// Insertions strictly between `from` and `to`.
    fn inner_inserts(&self, from: WeavePos, to: WeavePos) -> Vec<WeavePos> {
        let (Some(lo), Some(hi)) = (self.key(from), self.key(to)) else {
            return Vec::new();
        };
        self.seq[lo.0..=hi.0]
            .iter()
            .enumerate()
            .flat_map(|(i, &t)| Slot::ALL.map(|slot| ((lo.0 + i, slot), WeavePos::new(t, slot))))
            .filter(|(k, pos)| *k > lo && *k < hi && self.inserts.contains_key(pos))
            .map(|(_, pos)| pos)
            .collect()
    }

    fn kill_range(&mut self, from: WeavePos, to: WeavePos) {
        for pos in self.inner_inserts(from, to) {
            self.inserts.remove(&pos);
        }
        let Some((first, last)) = self.covered(from, to) else {
            return;
        };
        let mut leading = true;
        for i in first..=last {
            let t = self.seq[i];
            if !self.dead.insert(t) {
                continue;
            }
            if leading {
                self.keep_ws.insert(t);
                leading = false;
            }
            self.rules.add(t, Target::Killed);
        }
    }

    fn move_range(&mut self, from: WeavePos, to: WeavePos, dest: WeavePos) {
        let moved_inserts = self.inner_inserts(from, to);
        let Some((first, last)) = self.covered(from, to) else {
            return;
        };
        let originals: Vec<TokenId> = self.seq[first..=last]
            .iter()
            .copied()
            .filter(|t| !self.dead.contains(t))
            .collect();
        let mut clones = Vec::with_capacity(originals.len());
        for &t in &originals {
            let clone = self.stream.push_clone(t);
            self.rules.add(t, Target::Token(clone));
            self.dead.insert(t);
            clones.push(clone);
        }
        for pos in moved_inserts {
            let Some(texts) = self.inserts.remove(&pos) else {
                continue;
            };
            let target = self.rules.resolve(pos.token).unwrap_or(pos.token);
            self.inserts.insert(WeavePos::new(target, pos.slot), texts);
        }
        let Some(di) = self.index_of(dest.token) else {
            return;
        };
        let at = if dest.slot.is_front() { di } else { di + 1 };
        self.seq.splice(at..at, clones);
        self.index = index_of_all(&self.seq);
    }
}

fn index_of_all(seq: &[TokenId]) -> HashMap<TokenId, usize> {
    seq.iter().enumerate().map(|(i, &t)| (t, i)).collect()
}

/// Pending manipulations. Dropping a transaction without committing
/// discards them.
#[derive(Debug)]
pub struct Transaction<'w> {
    weaver: &'w mut TextWeaver,
    queue: Vec<Manipulation>,
}

impl Transaction<'_> {
    /// Insert `text` at `pos`; `before` puts it in front of text already there.
    pub fn insert(&mut self, pos: WeavePos, text: impl Into<String>, before: bool) -> &mut Self {
        self.queue.push(Manipulation::Insert {
            pos,
            text: text.into(),
            before,
        });
        self
    }

    pub fn replace(&mut self, from: WeavePos, to: WeavePos, text: impl Into<String>) -> &mut Self {
        self.queue.push(Manipulation::Replace {
            from,
            to,
            text: text.into(),
        });
        self
    }

    pub fn kill(&mut self, from: WeavePos, to: WeavePos) -> &mut Self {
        self.queue.push(Manipulation::Kill { from, to });
        self
    }

    /// Move the tokens between `from` and `to` to `dest`.
    pub fn move_range(&mut self, from: WeavePos, to: WeavePos, dest: WeavePos) -> &mut Self {
        self.queue.push(Manipulation::Move { from, to, dest });
        self
    }

    pub fn stream(&self) -> &TokenStream {
        &self.weaver.stream
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn rollback(self) {}

    /// Validate every manipulation, then apply them in queue order. Any
    /// invalid manipulation aborts the whole transaction unchanged.
    pub fn commit(self) -> Result<CommitReport, WeaveError> {
        let Transaction { weaver, queue } = self;
        let validated = queue
            .into_iter()
            .map(|m| weaver.validate(m))
            .collect::<Result<Vec<_>, _>>()?;
        let mut report = CommitReport::default();
        for m in validated {
            if weaver.apply(m) {
                report.applied += 1;
            } else {
                report.skipped += 1;
            }
        }
        debug!(
            "commit: {} applied, {} skipped",
            report.applied, report.skipped
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExpansionSpec;

    fn t(i: usize) -> TokenId {
        TokenId(i)
    }

    fn words(text: &str) -> TextWeaver {
        TextWeaver::new(TokenStream::from_words(text), false)
    }

    fn with_macro(macro_aware: bool) -> TextWeaver {
        let tok = |text: &str, expansion: Option<usize>| Token {
            text: text.to_string(),
            ws: String::new(),
            expansion,
        };
        let stream = TokenStream::new(
            vec![
                tok("f", None),
                tok("(", None),
                tok("puts", Some(0)),
                tok("(", Some(0)),
                tok("x", Some(0)),
                tok(")", Some(0)),
                tok(")", None),
                tok(";", None),
            ],
            vec![ExpansionSpec {
                name: "LOG".to_string(),
                call: "LOG(x)".to_string(),
            }],
        )
        .unwrap();
        TextWeaver::new(stream, macro_aware)
    }

    #[test]
    fn untouched_stream_realizes_source() {
        assert_eq!(words("int main ( ) { }").realize(), "int main ( ) { }");
        assert_eq!(with_macro(false).realize(), "f(LOG(x));");
    }

    #[test]
    fn inserts_at_one_position_honor_before_flag() {
        let mut w = words("int main ( ) { }");
        let mut tx = w.transaction();
        tx.insert(WeavePos::before(t(1)), "a ", false)
            .insert(WeavePos::before(t(1)), "b ", false)
            .insert(WeavePos::before(t(1)), "c ", true)
            .insert(WeavePos::header(t(1)), "h ", false)
            .insert(WeavePos::footer(t(5)), " // end", false);
        let report = tx.commit().unwrap();
        assert_eq!(report, CommitReport { applied: 5, skipped: 0 });
        assert_eq!(w.realize(), "int h c a b main ( ) { } // end");
    }

    #[test]
    fn replace_keeps_leading_whitespace() {
        let mut w = words("int main ( ) { }");
        let mut tx = w.transaction();
        tx.replace(WeavePos::before(t(4)), WeavePos::after(t(5)), "{ return 0; }");
        tx.commit().unwrap();
        assert_eq!(w.realize(), "int main ( ) { return 0; }");
    }

    #[test]
    fn kill_drops_text_inserted_inside_the_range() {
        let mut w = words("a b c d");
        let mut tx = w.transaction();
        tx.insert(WeavePos::after(t(1)), "X", false)
            .insert(WeavePos::before(t(1)), "<", false)
            .kill(WeavePos::before(t(1)), WeavePos::after(t(2)));
        tx.commit().unwrap();
        assert_eq!(w.realize(), "a < d");
    }

    #[test]
    fn edit_of_killed_token_is_skipped() {
        let mut w = words("int main ( ) { }");
        let mut tx = w.transaction();
        tx.kill(WeavePos::before(t(1)), WeavePos::after(t(1)))
            .insert(WeavePos::after(t(1)), "x", false);
        let report = tx.commit().unwrap();
        assert_eq!(report, CommitReport { applied: 1, skipped: 1 });
        assert_eq!(w.realize(), "int  ( ) { }");
        assert_eq!(w.rules().get(t(1)), Some(Target::Killed));
    }

    #[test]
    fn move_then_kill_reaches_the_moved_token() {
        let mut w = words("a b c d");
        let mut tx = w.transaction();
        tx.move_range(WeavePos::before(t(1)), WeavePos::after(t(1)), WeavePos::after(t(3)));
        tx.commit().unwrap();
        assert_eq!(w.realize(), "a c d b");
        let clone = w.resolve(WeavePos::before(t(1))).unwrap().token;
        assert_eq!(clone, t(4));

        let mut tx = w.transaction();
        tx.kill(WeavePos::before(t(1)), WeavePos::after(t(1)));
        assert_eq!(tx.commit().unwrap().applied, 1);
        assert_eq!(w.realize(), "a c d ");
        assert_eq!(w.resolve(WeavePos::before(t(1))), None);
    }

    #[test]
    fn kill_after_move_in_one_transaction_follows_the_clone() {
        let mut w = words("a b c d");
        let mut tx = w.transaction();
        tx.move_range(WeavePos::before(t(1)), WeavePos::after(t(1)), WeavePos::after(t(3)))
            .kill(WeavePos::before(t(1)), WeavePos::after(t(1)));
        let report = tx.commit().unwrap();
        assert_eq!(report, CommitReport { applied: 2, skipped: 0 });
        assert_eq!(w.realize(), "a c d ");
        assert_eq!(w.rules().get(t(1)), Some(Target::Token(t(4))));
        assert_eq!(w.rules().get(t(4)), Some(Target::Killed));
    }

    #[test]
    fn positions_after_a_move_still_resolve() {
        let mut w = words("a b c d");
        let mut tx = w.transaction();
        tx.move_range(WeavePos::before(t(3)), WeavePos::after(t(3)), WeavePos::before(t(0)))
            .kill(WeavePos::before(t(1)), WeavePos::after(t(1)))
            .insert(WeavePos::after(t(2)), ";", false);
        tx.commit().unwrap();
        assert_eq!(w.realize(), " da  c;");
    }

    #[test]
    fn move_into_own_range_is_rejected() {
        let mut w = words("a b c d");
        let mut tx = w.transaction();
        tx.move_range(WeavePos::before(t(0)), WeavePos::after(t(2)), WeavePos::after(t(1)));
        assert!(matches!(tx.commit(), Err(WeaveError::MoveIntoRange { .. })));
        assert_eq!(w.realize(), "a b c d");
    }

    #[test]
    fn invalid_manipulation_aborts_everything() {
        let mut w = words("a b c");
        let mut tx = w.transaction();
        tx.insert(WeavePos::before(t(0)), "ok ", false)
            .insert(WeavePos::after(t(9)), "bad", false);
        assert_eq!(tx.commit(), Err(WeaveError::InvalidToken { token: 9 }));
        assert_eq!(w.realize(), "a b c");

        let mut tx = w.transaction();
        tx.kill(WeavePos::after(t(2)), WeavePos::before(t(0)));
        assert!(matches!(tx.commit(), Err(WeaveError::ReversedRange { .. })));
    }

    #[test]
    fn dropped_transaction_changes_nothing() {
        let mut w = words("a b c");
        let mut tx = w.transaction();
        tx.kill(WeavePos::before(t(0)), WeavePos::after(t(2)));
        assert_eq!(tx.len(), 1);
        tx.rollback();
        assert_eq!(w.realize(), "a b c");
        assert!(w.rules().is_empty());
    }

    #[test]
    fn macro_hygiene_rejects_positions_inside_an_expansion() {
        let mut w = with_macro(false);
        let mut tx = w.transaction();
        tx.insert(WeavePos::after(t(0)), "/*ok*/", false)
            .insert(WeavePos::before(t(3)), "/*bad*/", false);
        let err = tx.commit().unwrap_err();
        assert_eq!(
            err,
            WeaveError::MacroHygiene {
                pos: WeavePos::before(t(3)),
                name: "LOG".to_string(),
            }
        );
        assert_eq!(w.realize(), "f(LOG(x));");

        // the expansion boundary itself is fine
        let mut tx = w.transaction();
        tx.insert(WeavePos::before(t(2)), "<", false)
            .insert(WeavePos::after(t(5)), ">", false);
        tx.commit().unwrap();
        assert_eq!(w.realize(), "f(<LOG(x)>);");
    }

    #[test]
    fn macro_aware_mode_snaps_to_the_expansion() {
        let mut w = with_macro(true);
        let mut tx = w.transaction();
        tx.insert(WeavePos::before(t(3)), "/*a*/", false)
            .insert(WeavePos::after(t(4)), "/*b*/", false);
        tx.commit().unwrap();
        assert_eq!(w.realize(), "f(/*a*/LOG(x)/*b*/);");
    }

    #[test]
    fn macro_aware_range_covers_the_whole_expansion() {
        let mut w = with_macro(true);
        let mut tx = w.transaction();
        tx.kill(WeavePos::before(t(3)), WeavePos::before(t(4)));
        tx.commit().unwrap();
        assert_eq!(w.realize(), "f();");

        let mut w = with_macro(true);
        let mut tx = w.transaction();
        tx.replace(WeavePos::after(t(3)), WeavePos::after(t(4)), "LOG(y)");
        tx.commit().unwrap();
        assert_eq!(w.realize(), "f(LOG(y));");

        let mut w = with_macro(false);
        let mut tx = w.transaction();
        tx.kill(WeavePos::before(t(3)), WeavePos::before(t(4)));
        assert!(matches!(tx.commit(), Err(WeaveError::MacroHygiene { .. })));
    }

    #[test]
    fn rules_persist_across_transactions() {
        let mut w = words("a b c");
        let mut tx = w.transaction();
        tx.kill(WeavePos::before(t(2)), WeavePos::after(t(2)));
        tx.commit().unwrap();
        let mut tx = w.transaction();
        tx.replace(WeavePos::before(t(2)), WeavePos::after(t(2)), "z");
        assert_eq!(tx.commit().unwrap(), CommitReport { applied: 0, skipped: 1 });
        assert_eq!(w.rules().len(), 1);
    }
}

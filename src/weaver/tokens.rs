use crate::model::{ExpansionSpec, TokenId, TokenSpan, TokenSpec, UnitDocument};

use super::WeaveError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// Whitespace in front of the token.
    pub ws: String,
    pub expansion: Option<usize>,
}

impl From<&TokenSpec> for Token {
    fn from(spec: &TokenSpec) -> Self {
        Self {
            text: spec.text.clone(),
            ws: spec.ws.clone(),
            expansion: spec.expansion,
        }
    }
}

/// Token stream of one unit. Tokens are never removed; clones created by
/// moves are appended after the original tokens.
#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    tokens: Vec<Token>,
    expansions: Vec<ExpansionSpec>,
    /// First and last token of each expansion.
    bounds: Vec<Option<(TokenId, TokenId)>>,
}

impl TokenStream {
    /// Tokens of one expansion must be contiguous.
    pub fn new(tokens: Vec<Token>, expansions: Vec<ExpansionSpec>) -> Result<Self, WeaveError> {
        let mut bounds: Vec<Option<(TokenId, TokenId)>> = vec![None; expansions.len()];
        for (i, tok) in tokens.iter().enumerate() {
            let Some(exp) = tok.expansion else { continue };
            let Some(slot) = bounds.get_mut(exp) else {
                return Err(WeaveError::BadExpansion {
                    token: i,
                    message: format!("unknown expansion {exp}"),
                });
            };
            match slot {
                None => *slot = Some((TokenId(i), TokenId(i))),
                Some((_, last)) if last.0 + 1 == i => *last = TokenId(i),
                Some(_) => {
                    return Err(WeaveError::BadExpansion {
                        token: i,
                        message: format!("tokens of expansion {exp} are not contiguous"),
                    });
                }
            }
        }
        Ok(Self {
            tokens,
            expansions,
            bounds,
        })
    }

    pub fn from_document(doc: &UnitDocument) -> Result<Self, WeaveError> {
        Self::new(
            doc.tokens.iter().map(Token::from).collect(),
            doc.expansions.clone(),
        )
    }

    /// Stream without macro expansions, one token per word of `text`.
    pub fn from_words(text: &str) -> Self {
        let tokens = text
            .split_whitespace()
            .enumerate()
            .map(|(i, w)| Token {
                text: w.to_string(),
                ws: if i == 0 { String::new() } else { " ".to_string() },
                expansion: None,
            })
            .collect();
        Self {
            tokens,
            expansions: Vec::new(),
            bounds: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, id: TokenId) -> Option<&Token> {
        self.tokens.get(id.0)
    }

    pub fn text(&self, id: TokenId) -> &str {
        self.tokens.get(id.0).map_or("", |t| t.text.as_str())
    }

    pub fn ids(&self) -> impl Iterator<Item = TokenId> + '_ {
        (0..self.tokens.len()).map(TokenId)
    }

    pub(super) fn push_clone(&mut self, id: TokenId) -> TokenId {
        let clone = self.tokens[id.0].clone();
        self.tokens.push(clone);
        TokenId(self.tokens.len() - 1)
    }

    pub fn expansion(&self, index: usize) -> Option<&ExpansionSpec> {
        self.expansions.get(index)
    }

    /// First and last original token of the expansion `id` belongs to.
    pub fn expansion_bounds(&self, id: TokenId) -> Option<(TokenId, TokenId)> {
        let exp = self.tokens.get(id.0)?.expansion?;
        self.bounds.get(exp).copied().flatten()
    }

    /// Source text of the unit, with macro calls instead of their expansions.
    pub fn source_text(&self) -> String {
        let mut out = String::new();
        let mut prev: Option<usize> = None;
        for tok in &self.tokens {
            match tok.expansion {
                Some(exp) if prev == Some(exp) => {}
                Some(exp) => {
                    out.push_str(&tok.ws);
                    out.push_str(self.expansions.get(exp).map_or("", |e| e.call.as_str()));
                }
                None => {
                    out.push_str(&tok.ws);
                    out.push_str(&tok.text);
                }
            }
            prev = tok.expansion;
        }
        out
    }

    pub fn cursor(&self) -> TokenCursor<'_> {
        TokenCursor {
            stream: self,
            pos: 0,
            recording: None,
        }
    }
}

/// Forward iteration over the original tokens with optional recording of
/// the range consumed in between.
#[derive(Debug)]
pub struct TokenCursor<'s> {
    stream: &'s TokenStream,
    pos: usize,
    recording: Option<usize>,
}

impl TokenCursor<'_> {
    pub fn next(&mut self) -> Option<TokenId> {
        if self.pos >= self.stream.len() {
            return None;
        }
        self.pos += 1;
        Some(TokenId(self.pos - 1))
    }

    /// The token `n` positions ahead without consuming anything; `look_ahead(0)`
    /// is the token `next` would return.
    pub fn look_ahead(&self, n: usize) -> Option<TokenId> {
        let i = self.pos + n;
        (i < self.stream.len()).then_some(TokenId(i))
    }

    pub fn start_recording(&mut self) {
        self.recording = Some(self.pos);
    }

    /// Tokens consumed since `start_recording`, if any.
    pub fn stop_recording(&mut self) -> Option<TokenSpan> {
        let start = self.recording.take()?;
        (self.pos > start).then(|| TokenSpan {
            first: TokenId(start),
            last: TokenId(self.pos - 1),
        })
    }
}

//! OSC address patterns.
//!
//! `?` matches one character, `*` a possibly empty run, `[abc]`/`[!abc]` one
//! character in or out of a set, `{foo,bar}` one of several literal strings.
//! None of them ever matches `/`, so path segments line up exactly.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\*|\?|\[[^\]]*\]|\{[^\}]*\}|.").expect("token regex is valid"));

// Matches nothing; used for empty sets and empty alternations.
const NEVER: &str = r"[^\s\S]";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
    Set { negated: bool, chars: BTreeSet<char> },
    Alternatives(Vec<String>),
}

impl Token {
    fn parse(atom: &str) -> Token {
        match atom {
            "*" => Token::AnyRun,
            "?" => Token::AnyChar,
            _ if atom.len() > 1 && atom.starts_with('[') => {
                let inner = &atom[1..atom.len() - 1];
                let (negated, inner) = match inner.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, inner),
                };
                Token::Set {
                    negated,
                    chars: inner.chars().collect(),
                }
            }
            _ if atom.len() > 1 && atom.starts_with('{') => Token::Alternatives(
                atom[1..atom.len() - 1]
                    .split(',')
                    .filter(|alt| !alt.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            // The regex yields exactly one character for everything else.
            _ => Token::Literal(atom.chars().next().unwrap_or('/')),
        }
    }

    /// Whether this set can match some character other than `/`.
    fn set_admits_any(negated: bool, chars: &BTreeSet<char>) -> bool {
        // Nobody writes a negated set of every printable character.
        negated || chars.iter().any(|&c| c != '/')
    }

    fn set_admits(negated: bool, chars: &BTreeSet<char>, c: char) -> bool {
        c != '/' && chars.contains(&c) != negated
    }

    /// Whether two single-character tokens can match the same character.
    fn shares_char(&self, other: &Token) -> bool {
        use Token::*;
        match (self, other) {
            (Literal(c), Literal(d)) => c == d,
            (AnyChar, AnyChar) => true,
            (AnyChar, Literal(c)) | (Literal(c), AnyChar) => *c != '/',
            (AnyChar, Set { negated, chars }) | (Set { negated, chars }, AnyChar) => {
                Token::set_admits_any(*negated, chars)
            }
            (Set { negated, chars }, Literal(c)) | (Literal(c), Set { negated, chars }) => {
                Token::set_admits(*negated, chars, *c)
            }
            (
                Set {
                    negated: xneg,
                    chars: xs,
                },
                Set {
                    negated: yneg,
                    chars: ys,
                },
            ) => match (*xneg, *yneg) {
                // Assume two negated sets always leave something in common.
                (true, true) => true,
                (true, false) => ys.iter().any(|&c| Token::set_admits(true, xs, c)),
                (false, true) => xs.iter().any(|&c| Token::set_admits(true, ys, c)),
                (false, false) => xs.intersection(ys).any(|&c| c != '/'),
            },
            _ => false,
        }
    }

    fn push_regex(&self, out: &mut String) {
        match self {
            Token::Literal(c) => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            Token::AnyChar => out.push_str("[^/]"),
            Token::AnyRun => out.push_str("[^/]*"),
            Token::Set { negated: true, chars } => {
                out.push_str("[^/");
                for c in chars {
                    out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
                }
                out.push(']');
            }
            Token::Set { negated: false, chars } => {
                let admitted: Vec<_> = chars.iter().filter(|&&c| c != '/').collect();
                if admitted.is_empty() {
                    out.push_str(NEVER);
                } else {
                    out.push('[');
                    for c in admitted {
                        out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
                    }
                    out.push(']');
                }
            }
            Token::Alternatives(alts) if alts.is_empty() => out.push_str(NEVER),
            Token::Alternatives(alts) => {
                let escaped: Vec<_> = alts.iter().map(|alt| regex::escape(alt)).collect();
                out.push_str("(?:");
                out.push_str(&escaped.join("|"));
                out.push(')');
            }
        }
    }
}

/// A compiled OSC address pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Compiles `source`. Every string is a valid pattern: unbalanced
    /// brackets are simply literal characters.
    pub fn compile(source: &str) -> Pattern {
        let tokens = TOKEN_RE
            .find_iter(source)
            .map(|m| Token::parse(m.as_str()))
            .collect();
        Pattern {
            source: source.to_string(),
            tokens,
        }
    }

    /// A pattern that matches `address` and nothing else, even if it
    /// contains metacharacters.
    pub fn literal(address: &str) -> Pattern {
        Pattern {
            source: address.to_string(),
            tokens: address.chars().map(Token::Literal).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether this pattern matches the concrete `address`.
    pub fn matches(&self, address: &str) -> bool {
        self.intersects(&Pattern::literal(address))
    }

    /// Whether some concrete address exists that both patterns match.
    pub fn intersects(&self, other: &Pattern) -> bool {
        intersect(&self.tokens, &other.tokens)
    }

    /// The equivalent anchored regular expression. It agrees with
    /// [`Pattern::matches`] on every concrete address.
    pub fn to_regex(&self) -> Result<Regex, regex::Error> {
        let mut re = String::from("^");
        for token in &self.tokens {
            token.push_regex(&mut re);
        }
        re.push('$');
        Regex::new(&re)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl From<&str> for Pattern {
    fn from(source: &str) -> Self {
        Pattern::compile(source)
    }
}

impl From<String> for Pattern {
    fn from(source: String) -> Self {
        Pattern::compile(&source)
    }
}

// Remaining tokens of each side, stored reversed so the next token is last.
type State = (Vec<Token>, Vec<Token>);

fn with(mut rest: Vec<Token>, head: Token) -> Vec<Token> {
    rest.push(head);
    rest
}

fn with_literal(mut rest: Vec<Token>, alt: &str) -> Vec<Token> {
    rest.extend(alt.chars().rev().map(Token::Literal));
    rest
}

/// Depth-first search over pairs of remaining token sequences. Every branch
/// consumes a token from at least one side or re-enters an already visited
/// pair, so the visited set bounds the search.
fn intersect(a: &[Token], b: &[Token]) -> bool {
    let start: State = (a.iter().rev().cloned().collect(), b.iter().rev().cloned().collect());
    let mut stack = vec![start];
    let mut seen: HashSet<State> = HashSet::new();

    while let Some(state) = stack.pop() {
        if !seen.insert(state.clone()) {
            continue;
        }
        let (mut a, mut b) = state;
        match (a.pop(), b.pop()) {
            (None, None) => return true,
            // A trailing `*` can match the empty string.
            (Some(Token::AnyRun), None) | (None, Some(Token::AnyRun)) => stack.push((a, b)),
            (None, Some(_)) | (Some(_), None) => {}
            (Some(x), Some(y)) => step(x, y, a, b, &mut stack),
        }
    }
    false
}

fn step(x: Token, y: Token, a: Vec<Token>, b: Vec<Token>, stack: &mut Vec<State>) {
    match (&x, &y) {
        (Token::Alternatives(alts), _) => {
            for alt in alts {
                stack.push((with_literal(a.clone(), alt), with(b.clone(), y.clone())));
            }
        }
        (_, Token::Alternatives(alts)) => {
            for alt in alts {
                stack.push((with(a.clone(), x.clone()), with_literal(b.clone(), alt)));
            }
        }
        (Token::AnyRun, Token::AnyRun) => {
            stack.push((a.clone(), b.clone()));
            stack.push((with(a.clone(), x.clone()), b.clone()));
            stack.push((a, with(b, y.clone())));
        }
        // `*` either swallows the other side's next character or ends here.
        (Token::AnyRun, other) => {
            if Token::AnyChar.shares_char(other) {
                stack.push((with(a.clone(), x.clone()), b.clone()));
            }
            stack.push((a, with(b, y.clone())));
        }
        (other, Token::AnyRun) => {
            if Token::AnyChar.shares_char(other) {
                stack.push((a.clone(), with(b.clone(), y.clone())));
            }
            stack.push((with(a, x.clone()), b));
        }
        (x, y) => {
            if x.shares_char(y) {
                stack.push((a, b));
            }
        }
    }
}

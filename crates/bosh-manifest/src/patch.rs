//! Ops file application.
//!
//! An ops file is a YAML list of operations:
//!
//! ```yaml
//! - type: replace
//!   path: /instance_groups/name=nats/instances
//!   value: 3
//! - type: remove
//!   path: /instance_groups/name=nats/jobs/name=debug?
//! ```
//!
//! Paths are `/` separated tokens. A token is an array index (negative indices count from the
//! end), `-` for "after the last element", `key=value` to select the array element whose `key`
//! field equals `value`, or a plain map key. A trailing `?` makes the token, and every token
//! after it, optional: `replace` then creates what is missing and `remove` becomes a no-op.
use std::fmt;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::debug;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse ops document"))]
    ParseOps { source: ParseErrorWrapper },

    #[snafu(display("unknown operation type {op_type:?} for path {path:?}"))]
    UnknownOpType { op_type: String, path: String },

    #[snafu(display("replace operation for path {path:?} is missing a value"))]
    MissingValue { path: String },

    #[snafu(display("path {path:?} must start with '/'"))]
    InvalidPointer { path: String },

    #[snafu(display("cannot remove the entire document"))]
    RemoveRoot,

    #[snafu(display("expected to find a map key {key:?} for path {path:?}"))]
    MissingKey { key: String, path: String },

    #[snafu(display("expected to find exactly one array item matching {key}={value} for path {path:?}, found {found}"))]
    NoUniqueMatch {
        key: String,
        value: String,
        found: usize,
        path: String,
    },

    #[snafu(display("index {index} is out of bounds for an array of length {len} at path {path:?}"))]
    IndexOutOfBounds {
        index: i64,
        len: usize,
        path: String,
    },

    #[snafu(display("expected a {expected} at token {token:?} of path {path:?}"))]
    UnexpectedType {
        expected: &'static str,
        token: String,
        path: String,
    },

    #[snafu(display("the after-last-index token '-' must be the last token of a replace path, got {path:?}"))]
    AfterLastIndexNotLast { path: String },

    #[snafu(display("cannot remove with the after-last-index token '-' in path {path:?}"))]
    RemoveAfterLastIndex { path: String },
}

impl Error {
    /// Whether the error means the addressed location does not exist.
    fn is_missing_location(&self) -> bool {
        matches!(
            self,
            Self::MissingKey { .. } | Self::NoUniqueMatch { .. } | Self::IndexOutOfBounds { .. }
        )
    }
}

/// [`serde_yaml::Error`] does not implement [`PartialEq`], this keeps the message so errors can
/// still be compared in tests.
#[derive(Debug, PartialEq, Eq)]
pub struct ParseErrorWrapper(String);

impl fmt::Display for ParseErrorWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseErrorWrapper {}

impl From<serde_yaml::Error> for ParseErrorWrapper {
    fn from(value: serde_yaml::Error) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatchOptions {
    /// Skip operations whose path cannot be resolved instead of failing.
    pub tolerate_missing_keys: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Replace { path: Pointer, value: Value },
    Remove { path: Pointer },
}

impl Op {
    pub fn path(&self) -> &Pointer {
        match self {
            Self::Replace { path, .. } | Self::Remove { path } => path,
        }
    }

    pub fn apply(&self, doc: &mut Value) -> Result<()> {
        match self {
            Self::Replace { path, value } => {
                if path.tokens.is_empty() {
                    *doc = value.clone();
                    return Ok(());
                }
                replace(doc, &path.tokens, value, path)
            }
            Self::Remove { path } => {
                if path.tokens.is_empty() {
                    return RemoveRootSnafu.fail();
                }
                remove(doc, &path.tokens, path)
            }
        }
    }
}

#[derive(Deserialize)]
struct RawOp {
    #[serde(rename = "type")]
    op_type: String,
    path: String,
    value: Option<Value>,
}

impl TryFrom<RawOp> for Op {
    type Error = Error;

    fn try_from(raw: RawOp) -> Result<Self> {
        let path = Pointer::parse(&raw.path)?;
        match raw.op_type.as_str() {
            "replace" => Ok(Self::Replace {
                value: raw.value.context(MissingValueSnafu { path: raw.path })?,
                path,
            }),
            "remove" => Ok(Self::Remove { path }),
            _ => UnknownOpTypeSnafu {
                op_type: raw.op_type,
                path: raw.path,
            }
            .fail(),
        }
    }
}

/// An ordered list of operations, usually the content of one ops file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ops(Vec<Op>);

impl Ops {
    pub fn new(ops: Vec<Op>) -> Self {
        Self(ops)
    }

    pub fn from_yaml(input: &str) -> Result<Self> {
        let raw: Option<Vec<RawOp>> = serde_yaml::from_str(input)
            .map_err(ParseErrorWrapper::from)
            .context(ParseOpsSnafu)?;
        raw.unwrap_or_default()
            .into_iter()
            .map(Op::try_from)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Op> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Applies all operations in order. Each operation sees the result of the previous ones.
    pub fn apply(&self, doc: &mut Value, options: &PatchOptions) -> Result<()> {
        for op in &self.0 {
            match op.apply(doc) {
                Ok(()) => {}
                Err(err) if options.tolerate_missing_keys && err.is_missing_location() => {
                    debug!(path = %op.path(), error = %err, "skipping operation on missing path");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Ops {
    type IntoIter = std::slice::Iter<'a, Op>;
    type Item = &'a Op;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Index(i64),
    AfterLastIndex,
    MatchingIndex {
        key: String,
        value: String,
        optional: bool,
    },
    Key {
        key: String,
        optional: bool,
    },
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let optional = |optional: bool| if optional { "?" } else { "" };
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::AfterLastIndex => f.write_str("-"),
            Self::MatchingIndex {
                key,
                value,
                optional: opt,
            } => write!(f, "{}={}{}", escape(key), escape(value), optional(*opt)),
            Self::Key { key, optional: opt } => write!(f, "{}{}", escape(key), optional(*opt)),
        }
    }
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// A parsed ops path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pointer {
    tokens: Vec<Token>,
}

impl Pointer {
    pub fn parse(path: &str) -> Result<Self> {
        let Some(rest) = path.strip_prefix('/') else {
            return InvalidPointerSnafu { path }.fail();
        };
        if rest.is_empty() {
            return Ok(Self { tokens: Vec::new() });
        }

        let mut optional = false;
        let tokens = rest
            .split('/')
            .map(|raw| {
                let raw = unescape(raw);
                if raw == "-" {
                    return Token::AfterLastIndex;
                }
                if let Ok(index) = raw.parse::<i64>() {
                    return Token::Index(index);
                }
                let raw = match raw.strip_suffix('?') {
                    Some(stripped) => {
                        optional = true;
                        stripped.to_owned()
                    }
                    None => raw,
                };
                match raw.split_once('=') {
                    Some((key, value)) => Token::MatchingIndex {
                        key: key.to_owned(),
                        value: value.to_owned(),
                        optional,
                    },
                    None => Token::Key { key: raw, optional },
                }
            })
            .collect();
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tokens.is_empty() {
            return f.write_str("/");
        }
        for token in &self.tokens {
            write!(f, "/{token}")?;
        }
        Ok(())
    }
}

fn resolve_index(index: i64, len: usize, path: &Pointer) -> Result<usize> {
    let len_signed = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if index < 0 { len_signed + index } else { index };
    if resolved < 0 || resolved >= len_signed {
        return IndexOutOfBoundsSnafu {
            index,
            len,
            path: path.to_string(),
        }
        .fail();
    }
    Ok(resolved as usize)
}

fn matching_indices(items: &[Value], key: &str, value: &str) -> Vec<usize> {
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.get(key).and_then(Value::as_str) == Some(value))
        .map(|(idx, _)| idx)
        .collect()
}

fn as_sequence<'a>(
    doc: &'a mut Value,
    token: &Token,
    path: &Pointer,
) -> Result<&'a mut Vec<Value>> {
    doc.as_sequence_mut().context(UnexpectedTypeSnafu {
        expected: "array",
        token: token.to_string(),
        path: path.to_string(),
    })
}

fn as_mapping<'a>(doc: &'a mut Value, token: &Token, path: &Pointer) -> Result<&'a mut Mapping> {
    doc.as_mapping_mut().context(UnexpectedTypeSnafu {
        expected: "map",
        token: token.to_string(),
        path: path.to_string(),
    })
}

fn replace(doc: &mut Value, tokens: &[Token], value: &Value, path: &Pointer) -> Result<()> {
    let Some((token, rest)) = tokens.split_first() else {
        *doc = value.clone();
        return Ok(());
    };

    match token {
        Token::Index(index) => {
            let items = as_sequence(doc, token, path)?;
            let idx = resolve_index(*index, items.len(), path)?;
            replace(&mut items[idx], rest, value, path)
        }
        Token::AfterLastIndex => {
            if !rest.is_empty() {
                return AfterLastIndexNotLastSnafu {
                    path: path.to_string(),
                }
                .fail();
            }
            as_sequence(doc, token, path)?.push(value.clone());
            Ok(())
        }
        Token::MatchingIndex {
            key,
            value: expected,
            optional,
        } => {
            let items = as_sequence(doc, token, path)?;
            let mut found = matching_indices(items, key, expected);
            if found.is_empty() && *optional {
                let mut item = Mapping::new();
                item.insert(Value::from(key.as_str()), Value::from(expected.as_str()));
                items.push(Value::Mapping(item));
                found.push(items.len() - 1);
            }
            match found.as_slice() {
                [idx] => replace(&mut items[*idx], rest, value, path),
                _ => NoUniqueMatchSnafu {
                    key,
                    value: expected,
                    found: found.len(),
                    path: path.to_string(),
                }
                .fail(),
            }
        }
        Token::Key { key, optional } => {
            let map = as_mapping(doc, token, path)?;
            if rest.is_empty() {
                map.insert(Value::from(key.as_str()), value.clone());
                return Ok(());
            }
            if !map.contains_key(key.as_str()) {
                if !*optional {
                    return MissingKeySnafu {
                        key,
                        path: path.to_string(),
                    }
                    .fail();
                }
                let child = match rest.first() {
                    Some(Token::Key { .. }) | None => Value::Mapping(Mapping::new()),
                    Some(_) => Value::Sequence(Vec::new()),
                };
                map.insert(Value::from(key.as_str()), child);
            }
            let child = map.get_mut(key.as_str()).context(MissingKeySnafu {
                key,
                path: path.to_string(),
            })?;
            replace(child, rest, value, path)
        }
    }
}

fn remove(doc: &mut Value, tokens: &[Token], path: &Pointer) -> Result<()> {
    let Some((token, rest)) = tokens.split_first() else {
        return RemoveRootSnafu.fail();
    };

    match token {
        Token::Index(index) => {
            let items = as_sequence(doc, token, path)?;
            let idx = resolve_index(*index, items.len(), path)?;
            if rest.is_empty() {
                items.remove(idx);
                Ok(())
            } else {
                remove(&mut items[idx], rest, path)
            }
        }
        Token::AfterLastIndex => RemoveAfterLastIndexSnafu {
            path: path.to_string(),
        }
        .fail(),
        Token::MatchingIndex {
            key,
            value,
            optional,
        } => {
            let items = as_sequence(doc, token, path)?;
            let found = matching_indices(items, key, value);
            match found.as_slice() {
                [] if *optional => Ok(()),
                [idx] if rest.is_empty() => {
                    items.remove(*idx);
                    Ok(())
                }
                [idx] => remove(&mut items[*idx], rest, path),
                _ => NoUniqueMatchSnafu {
                    key,
                    value,
                    found: found.len(),
                    path: path.to_string(),
                }
                .fail(),
            }
        }
        Token::Key { key, optional } => {
            let map = as_mapping(doc, token, path)?;
            if !map.contains_key(key.as_str()) {
                if *optional {
                    return Ok(());
                }
                return MissingKeySnafu {
                    key,
                    path: path.to_string(),
                }
                .fail();
            }
            if rest.is_empty() {
                map.remove(key.as_str());
                return Ok(());
            }
            let child = map.get_mut(key.as_str()).context(MissingKeySnafu {
                key,
                path: path.to_string(),
            })?;
            remove(child, rest, path)
        }
    }
}

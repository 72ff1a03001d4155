//! Alignment edge payloads.
//!
//! An edge is never interpreted by the index itself. The conservation filter
//! and the edge filters on a slice read it through [`EdgeInfo`].

use crate::error::{NlmsaError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const SCORE: &str = "score";
pub const P_IDENTITY: &str = "pIdentity";
pub const P_ALIGNED: &str = "pAligned";
const EMPTY_ATTRS: &str = ".";

/// Backslash escapes for the characters that would break a dump column.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '=' => out.push_str("\\e"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            '\\' => '\\',
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            'e' => '=',
            'c' => ':',
            _ => return None,
        });
    }
    Some(out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn tag(&self) -> char {
        match self {
            Value::Int(_) => 'i',
            Value::Float(_) => 'f',
            Value::Text(_) => 's',
        }
    }

    /// Parse a dump column value of the given type tag.
    fn parse_tagged(tag: &str, raw: &str) -> Option<Value> {
        match tag {
            "i" => raw.parse::<i64>().ok().map(Value::Int),
            "f" => raw.parse::<f64>().ok().map(Value::Float),
            "s" => unescape(raw).map(Value::Text),
            _ => None,
        }
    }

    fn to_column_value(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Float(x) => format!("{:?}", x),
            Value::Text(t) => escape(t),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            Value::Text(_) => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Int(_) => 0,
            Value::Float(_) => 1,
            Value::Text(_) => 2,
        }
    }

    fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeScores {
    pub score: f64,
    pub p_identity: f64,
    pub p_aligned: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Edge {
    Scores(EdgeScores),
    Attrs(BTreeMap<String, Value>),
}

/// Accessors shared by every edge representation.
pub trait EdgeInfo {
    fn attr(&self, name: &str) -> Result<Value>;

    fn percent_identity(&self) -> Result<f64> {
        numeric(self.attr(P_IDENTITY)?, P_IDENTITY)
    }

    fn percent_aligned(&self) -> Result<f64> {
        numeric(self.attr(P_ALIGNED)?, P_ALIGNED)
    }
}

fn numeric(value: Value, name: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| NlmsaError::NoSuchAttribute(format!("{} is not numeric", name)))
}

impl EdgeInfo for Edge {
    fn attr(&self, name: &str) -> Result<Value> {
        match self {
            Edge::Scores(s) => match name {
                SCORE => Ok(Value::Float(s.score)),
                P_IDENTITY => Ok(Value::Float(s.p_identity)),
                P_ALIGNED => Ok(Value::Float(s.p_aligned)),
                _ => Err(NlmsaError::NoSuchAttribute(name.to_string())),
            },
            Edge::Attrs(map) => map
                .get(name)
                .cloned()
                .ok_or_else(|| NlmsaError::NoSuchAttribute(name.to_string())),
        }
    }
}

impl Edge {
    pub fn scores(score: f64, p_identity: f64, p_aligned: f64) -> Self {
        Edge::Scores(EdgeScores {
            score,
            p_identity,
            p_aligned,
        })
    }

    /// Dump columns, in a stable order.
    ///
    /// Scores are written as plain `key=value`. Attribute maps carry a type tag
    /// on every key (`key:i=`, `key:f=`, `key:s=`) so values come back with
    /// their original type; an empty map is written as a single `.`.
    pub fn to_columns(&self) -> Vec<String> {
        match self {
            Edge::Scores(s) => vec![
                format!("{}={:?}", SCORE, s.score),
                format!("{}={:?}", P_IDENTITY, s.p_identity),
                format!("{}={:?}", P_ALIGNED, s.p_aligned),
            ],
            Edge::Attrs(map) if map.is_empty() => vec![EMPTY_ATTRS.to_string()],
            Edge::Attrs(map) => map
                .iter()
                .map(|(k, v)| format!("{}:{}={}", escape(k), v.tag(), v.to_column_value()))
                .collect(),
        }
    }

    /// Inverse of [`Edge::to_columns`].
    pub fn from_columns(columns: &[&str]) -> Result<Self> {
        let bad = |message: String| NlmsaError::Parse { line: 0, message };
        if columns.len() == 1 && columns[0] == EMPTY_ATTRS {
            return Ok(Edge::Attrs(BTreeMap::new()));
        }
        let mut plain: BTreeMap<&str, f64> = BTreeMap::new();
        let mut attrs = BTreeMap::new();
        for col in columns {
            let (key, raw) = col
                .split_once('=')
                .ok_or_else(|| bad(format!("payload column '{}' is not key=value", col)))?;
            match key.rsplit_once(':') {
                Some((name, tag)) => {
                    let name = unescape(name)
                        .ok_or_else(|| bad(format!("bad escape in payload key '{}'", name)))?;
                    let value = Value::parse_tagged(tag, raw)
                        .ok_or_else(|| bad(format!("invalid {}-tagged value '{}'", tag, raw)))?;
                    attrs.insert(name, value);
                }
                None => {
                    let value = raw
                        .parse::<f64>()
                        .map_err(|_| bad(format!("invalid score value '{}'", raw)))?;
                    plain.insert(key, value);
                }
            }
        }
        match (plain.is_empty(), attrs.is_empty()) {
            (true, _) => Ok(Edge::Attrs(attrs)),
            (false, true) => match (plain.get(SCORE), plain.get(P_IDENTITY), plain.get(P_ALIGNED)) {
                (Some(&score), Some(&p_identity), Some(&p_aligned)) if plain.len() == 3 => {
                    Ok(Edge::scores(score, p_identity, p_aligned))
                }
                _ => Err(bad(format!(
                    "untagged payload columns must be exactly {}, {} and {}",
                    SCORE, P_IDENTITY, P_ALIGNED
                ))),
            },
            (false, false) => Err(bad("payload mixes score and attribute columns".to_string())),
        }
    }

    /// Total order used to lay out records with identical coordinates.
    pub fn total_cmp(&self, other: &Edge) -> Ordering {
        match (self, other) {
            (Edge::Scores(a), Edge::Scores(b)) => a
                .score
                .total_cmp(&b.score)
                .then(a.p_identity.total_cmp(&b.p_identity))
                .then(a.p_aligned.total_cmp(&b.p_aligned)),
            (Edge::Attrs(a), Edge::Attrs(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Edge::Scores(_), Edge::Attrs(_)) => Ordering::Less,
            (Edge::Attrs(_), Edge::Scores(_)) => Ordering::Greater,
        }
    }
}

pub fn cmp_optional(a: &Option<Edge>, b: &Option<Edge>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.total_cmp(b),
    }
}

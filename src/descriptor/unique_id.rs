use crate::errors::ArborError;
use std::{fmt, str::FromStr};

/// One `[type:value]` segment of a [UniqueId].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub kind: String,
    pub value: String,
}

/// Hierarchical identifier of a node, e.g.
/// `[engine:arbor]/[class:Calc]/[method:adds]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueId {
    segments: Vec<Segment>,
}

const RESERVED: [char; 5] = ['%', '/', '[', ']', ':'];

fn encode(raw: &str) -> String {
    let mut buf = String::with_capacity(raw.len());
    for c in raw.chars() {
        if RESERVED.contains(&c) {
            buf.push_str(&format!("%{:02X}", c as u32));
        } else {
            buf.push(c);
        }
    }
    buf
}

fn decode(raw: &str) -> Option<String> {
    let mut buf = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            let code = u32::from_str_radix(&hex, 16).ok()?;
            buf.push(char::from_u32(code)?);
        } else {
            buf.push(c);
        }
    }
    Some(buf)
}

impl UniqueId {
    /// A single-segment id.
    pub fn root(kind: impl Into<String>, value: impl Into<String>) -> Self {
        UniqueId {
            segments: vec![Segment {
                kind: kind.into(),
                value: value.into(),
            }],
        }
    }

    /// A new id that extends this one by one segment.
    pub fn append(&self, kind: impl Into<String>, value: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment {
            kind: kind.into(),
            value: value.into(),
        });
        UniqueId { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last(&self) -> &Segment {
        // Ids are never empty: every constructor creates at least one segment.
        &self.segments[self.segments.len() - 1]
    }

    pub fn parent(&self) -> Option<UniqueId> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(UniqueId {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Whether `prefix` is a (non-strict) prefix of this id.
    pub fn has_prefix(&self, prefix: &UniqueId) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Whether every segment has a non-empty type.
    pub fn is_well_formed(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(|s| !s.kind.is_empty())
    }

    pub fn parse(raw: &str) -> Result<Self, ArborError> {
        let invalid = || ArborError::InvalidUniqueId(raw.to_string());
        if raw.is_empty() {
            return Err(invalid());
        }
        let segments = raw
            .split('/')
            .map(|part| {
                let inner = part
                    .strip_prefix('[')
                    .and_then(|p| p.strip_suffix(']'))
                    .ok_or_else(invalid)?;
                let (kind, value) = inner.split_once(':').ok_or_else(invalid)?;
                if kind.is_empty() {
                    return Err(invalid());
                }
                Ok(Segment {
                    kind: decode(kind).ok_or_else(invalid)?,
                    value: decode(value).ok_or_else(invalid)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(UniqueId { segments })
    }
}

impl FromStr for UniqueId {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UniqueId::parse(s)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (idx, segment) in self.segments.iter().enumerate() {
            if idx > 0 {
                write!(f, "/")?;
            }
            write!(f, "[{}:{}]", encode(&segment.kind), encode(&segment.value))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn renders_and_nests() {
        let engine = UniqueId::root("engine", "arbor");
        let class = engine.append("class", "Calc");
        let method = class.append("method", "adds");
        assert_eq!(method.to_string(), "[engine:arbor]/[class:Calc]/[method:adds]");
        assert!(method.has_prefix(&class));
        assert!(!class.has_prefix(&method));
        assert_eq!(method.parent(), Some(class));
        assert_eq!(engine.parent(), None);
        assert_eq!(method.last().value, "adds");
    }

    #[test]
    fn reserved_characters_are_encoded() {
        let id = UniqueId::root("engine", "arbor").append("method", "a/b[c]:d");
        let rendered = id.to_string();
        assert_eq!(rendered, "[engine:arbor]/[method:a%2Fb%5Bc%5D%3Ad]");
        assert_eq!(UniqueId::parse(&rendered).unwrap(), id);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for raw in ["", "engine:arbor", "[engine:arbor]/", "[:x]", "[engine]", "[a:%zz]"] {
            assert!(UniqueId::parse(raw).is_err(), "{} should not parse", raw);
        }
    }

    proptest! {
        #[test]
        fn rendering_and_parsing_agree(
            parts in proptest::collection::vec(("[a-z]{1,8}", "\\PC{0,12}"), 1..5)
        ) {
            let mut iter = parts.into_iter();
            let (kind, value) = iter.next().unwrap();
            let mut id = UniqueId::root(kind, value);
            for (kind, value) in iter {
                id = id.append(kind, value);
            }
            prop_assert_eq!(UniqueId::parse(&id.to_string()).unwrap(), id);
        }
    }
}

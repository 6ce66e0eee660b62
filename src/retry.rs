//! Retry counter: a finite non-negative remaining-attempts count, or the
//! `nolimit` sentinel (spec §3). JSON encodes as an integer or the literal
//! string `"nolimit"`.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Limited(i64),
    NoLimit,
}

impl Retry {
    /// +1 for the current attempt, per the "retry counter represents
    /// remaining attempts including the current one" convention.
    pub fn incr(&mut self) {
        if let Retry::Limited(n) = self {
            *n += 1;
        }
    }

    pub fn decr(&mut self) {
        if let Retry::Limited(n) = self {
            *n -= 1;
        }
    }

    /// A retry-remaining of <= 0 (and not no-limit) means the envelope
    /// must never be returned and is discarded on encounter.
    pub fn is_valid(&self) -> bool {
        match self {
            Retry::NoLimit => true,
            Retry::Limited(n) => *n > 0,
        }
    }
}

impl fmt::Display for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retry::NoLimit => write!(f, "nolimit"),
            Retry::Limited(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for Retry {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Retry::NoLimit => s.serialize_str("nolimit"),
            Retry::Limited(n) => s.serialize_i64(*n),
        }
    }
}

struct RetryVisitor;

impl<'de> Visitor<'de> for RetryVisitor {
    type Value = Retry;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or the string \"nolimit\"")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Retry, E> {
        if v == "nolimit" {
            Ok(Retry::NoLimit)
        } else {
            v.parse::<i64>()
                .map(Retry::Limited)
                .map_err(|_| de::Error::custom(format!("invalid retry value: {v}")))
        }
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Retry, E> {
        Ok(Retry::Limited(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Retry, E> {
        Ok(Retry::Limited(v as i64))
    }
}

impl<'de> Deserialize<'de> for Retry {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        d.deserialize_any(RetryVisitor)
    }
}

//! Content hashing and HashRef identifiers (spec §4.1)

use crate::canonical::canonical_bytes;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::cmp::Ordering;
use std::fmt;

/// Hash algorithms recognized in a HashRef.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algo {
    Sha256,
    Blake3,
}

impl Algo {
    fn as_str(self) -> &'static str {
        match self {
            Algo::Sha256 => "sha256",
            Algo::Blake3 => "blake3",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Algo::Sha256),
            "blake3" => Ok(Algo::Blake3),
            other => Err(Error::UnknownAlgo(other.to_string())),
        }
    }

    /// Expected lowercase-hex length for this algorithm's digest (both are 32 bytes).
    fn hex_len(self) -> usize {
        64
    }
}

/// The sentinel tip value for a tile with no segments yet.
pub const GENESIS: &str = "sha256:GENESIS";

/// Content-addressed identifier `"<algo>:<hex>"`. The only identifier used
/// for immutable content; never reused for different bytes. Compared
/// lexicographically as a total order over its string form.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct HashRef(String);

impl HashRef {
    fn new_unchecked(s: String) -> Self {
        HashRef(s)
    }

    /// Parse and validate a HashRef string (`<algo>:<hex>`), rejecting the
    /// GENESIS sentinel -- callers that accept GENESIS should check for it
    /// explicitly via [`is_genesis`](Self::is_genesis) or parse into a `Tip`.
    pub fn parse(s: &str) -> Result<Self> {
        let (algo_str, hex_part) = s
            .split_once(':')
            .ok_or_else(|| Error::MalformedHashRef(s.to_string()))?;
        let algo = Algo::from_str(algo_str)?;
        if hex_part.len() != algo.hex_len()
            || !hex_part.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(Error::MalformedHashRef(s.to_string()));
        }
        Ok(HashRef(s.to_string()))
    }

    pub fn algo(&self) -> Algo {
        let (algo_str, _) = self.0.split_once(':').expect("validated at construction");
        Algo::from_str(algo_str).expect("validated at construction")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_genesis(&self) -> bool {
        self.0 == GENESIS
    }
}

impl fmt::Display for HashRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for HashRef {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        HashRef::parse(&s)
    }
}

impl From<HashRef> for String {
    fn from(h: HashRef) -> String {
        h.0
    }
}

impl PartialOrd for HashRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HashRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// Hash raw bytes with SHA-256, the default ledger-content algorithm.
pub fn hash_bytes(bytes: &[u8]) -> HashRef {
    hash_bytes_with(Algo::Sha256, bytes)
}

/// Hash raw bytes with an explicit algorithm.
pub fn hash_bytes_with(algo: Algo, bytes: &[u8]) -> HashRef {
    match algo {
        Algo::Sha256 => {
            let mut hasher = sha2::Sha256::new();
            hasher.update(bytes);
            HashRef::new_unchecked(format!("sha256:{}", hex::encode(hasher.finalize())))
        }
        Algo::Blake3 => {
            let digest = blake3::hash(bytes);
            HashRef::new_unchecked(format!("blake3:{}", digest.to_hex()))
        }
    }
}

/// Hash the canonical byte image of any serializable value.
pub fn hash_json<T: Serialize>(value: &T) -> Result<HashRef> {
    Ok(hash_bytes(&canonical_bytes(value)?))
}

/// `verify(content, ref) = (hash_bytes(content) == ref)`, using whichever
/// algorithm `ref` declares.
pub fn verify(content: &[u8], reference: &HashRef) -> bool {
    hash_bytes_with(reference.algo(), content) == *reference
}

/// A structural pointer (HD path) identifier. Derived from a path string of
/// the form `m/world/{space_id}/tiles/{tile_id}/{role}`; stable but mutable
/// in the sense that it names a location, not content -- must never be used
/// as a content identifier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Sid(String);

impl Sid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the canonical HD path string for a tile role.
pub fn hd_path(space_id: &str, tile_id: &str, role: &str) -> String {
    format!("m/world/{space_id}/tiles/{tile_id}/{role}")
}

/// Derive a stable pointer identifier from an HD path.
pub fn derive_sid(path: &str) -> Sid {
    let digest = blake3::hash(path.as_bytes());
    Sid(format!("sid:{}", digest.to_hex()))
}

/// One entry in an ordered-input hash (spec §4.1 "Ordered-input hashing").
#[derive(Clone, Debug, PartialEq)]
pub struct OrderedInput {
    pub kind: String,
    pub ts: Option<i64>,
    pub rid: String,
}

#[derive(Serialize)]
struct OrderedInputNorm {
    #[serde(rename = "type")]
    kind: String,
    ts: serde_json::Value,
    rid: String,
}

/// Sort inputs by `(type ASC, ts ASC with absent=0, rid ASC)`, normalize an
/// absent timestamp to the sentinel string `"null"`, and hash the canonical
/// image of the resulting array.
pub fn ordered_input_hash(inputs: &[OrderedInput]) -> Result<HashRef> {
    let mut sorted = inputs.to_vec();
    sorted.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| a.ts.unwrap_or(0).cmp(&b.ts.unwrap_or(0)))
            .then_with(|| a.rid.cmp(&b.rid))
    });
    let normalized: Vec<OrderedInputNorm> = sorted
        .into_iter()
        .map(|input| OrderedInputNorm {
            kind: input.kind,
            ts: match input.ts {
                Some(ts) => serde_json::Value::from(ts),
                None => serde_json::Value::String("null".to_string()),
            },
            rid: input.rid,
        })
        .collect();
    hash_json(&normalized)
}

impl Clone for OrderedInput {
    fn clone(&self) -> Self {
        OrderedInput {
            kind: self.kind.clone(),
            ts: self.ts,
            rid: self.rid.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_roundtrips_through_verify() {
        let content = b"hello world";
        let r = hash_bytes(content);
        assert!(verify(content, &r));
        let other = HashRef::parse(&format!("sha256:{}", "0".repeat(64))).unwrap();
        if other != r {
            assert!(!verify(content, &other));
        }
    }

    #[test]
    fn hash_json_is_deterministic_across_clones() {
        let v = serde_json::json!({"b": 1, "a": [1,2,3]});
        let h1 = hash_json(&v).unwrap();
        let h2 = hash_json(&v.clone()).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn malformed_hash_refs_are_rejected() {
        assert!(HashRef::parse("not-a-ref").is_err());
        assert!(HashRef::parse("md5:abcd").is_err());
        assert!(HashRef::parse("sha256:short").is_err());
        assert!(HashRef::parse(&format!("sha256:{}", "G".repeat(64))).is_err());
    }

    #[test]
    fn sid_is_not_a_valid_hash_ref() {
        let sid = derive_sid(&hd_path("demo", "z0/x0/y0", "tip"));
        assert!(HashRef::parse(sid.as_str()).is_err());
    }

    #[test]
    fn ordered_input_hash_is_order_independent() {
        let a = vec![
            OrderedInput { kind: "b".into(), ts: Some(2), rid: "x".into() },
            OrderedInput { kind: "a".into(), ts: None, rid: "y".into() },
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(ordered_input_hash(&a).unwrap(), ordered_input_hash(&b).unwrap());
    }
}

//! Object identifiers.
//!
//! Every stored object is named `<cluster>-<infix>-<suffix>`: the cluster
//! prefix, a 5-character infix derived from the object's class name, and a
//! 15-character random suffix. All parts are lowercase base-36.
//!
//! The infix is stable across processes: it is the last five base-36 digits
//! of the MD5 digest of the class name read as a big-endian integer. That
//! makes `User` map to `tpzed` and `Group` to `j7d0g`, matching identifiers
//! minted by existing clusters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{WardenError, WardenResult};

pub const INFIX_LEN: usize = 5;
pub const SUFFIX_LEN: usize = 15;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Validated cluster prefix (the first component of every UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(prefix: impl Into<String>) -> WardenResult<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || !prefix.bytes().all(is_base36_byte) {
            return Err(WardenError::Validation {
                message: format!("invalid cluster prefix {prefix:?}"),
            });
        }
        Ok(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClusterId {
    /// The conventional development cluster prefix.
    fn default() -> Self {
        Self("zzzzz".into())
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClusterId {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ClusterId {
    type Error = WardenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClusterId> for String {
    fn from(value: ClusterId) -> Self {
        value.0
    }
}

/// Entities that receive a UUID when they are created.
///
/// Returning `None` from [`AssignUuid::uuid_target`] means the entity has no
/// UUID attribute, in which case assignment is a no-op.
pub trait AssignUuid {
    /// The class name used for the infix and the slot holding the UUID.
    fn uuid_target(&mut self) -> Option<(&'static str, &mut Option<String>)>;
}

/// Assign a UUID to `target` unless it already has one.
///
/// Returns the UUID the entity ends up with, or `None` when the entity type
/// does not carry a UUID.
pub fn assign_uuid_to<T: AssignUuid + ?Sized>(cluster: &ClusterId, target: &mut T) -> Option<String> {
    let (class_name, slot) = target.uuid_target()?;
    let uuid = slot.get_or_insert_with(|| assign_uuid(cluster, class_name));
    Some(uuid.clone())
}

/// Mint a fresh UUID for an object of `class_name` in `cluster`.
pub fn assign_uuid(cluster: &ClusterId, class_name: &str) -> String {
    format!(
        "{cluster}-{}-{}",
        class_uuid_prefix(class_name),
        random_suffix()
    )
}

/// Deterministic 5-character infix for a class name.
pub fn class_uuid_prefix(class_name: &str) -> String {
    let digest = md5::compute(class_name.as_bytes());
    last_digits(&to_base36(&digest.0), INFIX_LEN)
}

/// 15 base-36 characters taken from a 256-bit value drawn from the
/// thread-local CSPRNG.
pub fn random_suffix() -> String {
    let bytes: [u8; 32] = rand::Rng::random(&mut rand::rng());
    last_digits(&to_base36(&bytes), SUFFIX_LEN)
}

/// UUID with a fixed, all-zero suffix. Used for well-known objects such as
/// the system user.
pub fn well_known_uuid(cluster: &ClusterId, class_name: &str) -> String {
    format!(
        "{cluster}-{}-{}",
        class_uuid_prefix(class_name),
        "0".repeat(SUFFIX_LEN)
    )
}

/// The system user, which owns itself and every user record by default.
pub fn system_user_uuid(cluster: &ClusterId) -> String {
    well_known_uuid(cluster, "User")
}

/// Check the wire format `^[a-z0-9]+-[a-z0-9]{5}-[a-z0-9]{15}$`.
pub fn is_valid_uuid(uuid: &str) -> bool {
    let mut parts = uuid.split('-');
    let (Some(cluster), Some(infix), Some(suffix), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    !cluster.is_empty()
        && cluster.bytes().all(is_base36_byte)
        && infix.len() == INFIX_LEN
        && infix.bytes().all(is_base36_byte)
        && suffix.len() == SUFFIX_LEN
        && suffix.bytes().all(is_base36_byte)
}

/// The class infix of a well-formed UUID.
pub fn uuid_infix(uuid: &str) -> Option<&str> {
    if !is_valid_uuid(uuid) {
        return None;
    }
    uuid.split('-').nth(1)
}

/// Base-36 rendering of a big-endian unsigned integer.
pub fn to_base36(bytes: &[u8]) -> String {
    let mut num: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if num.is_empty() {
        return "0".into();
    }

    let mut digits = Vec::new();
    while !num.is_empty() {
        let mut rem: u32 = 0;
        let mut quotient = Vec::with_capacity(num.len());
        for &byte in &num {
            let acc = (rem << 8) | u32::from(byte);
            let q = acc / 36;
            rem = acc % 36;
            if !quotient.is_empty() || q != 0 {
                quotient.push(q as u8);
            }
        }
        digits.push(BASE36_DIGITS[rem as usize]);
        num = quotient;
    }

    digits.iter().rev().map(|d| char::from(*d)).collect()
}

fn last_digits(encoded: &str, n: usize) -> String {
    if encoded.len() >= n {
        encoded[encoded.len() - n..].to_string()
    } else {
        format!("{encoded:0>n$}")
    }
}

fn is_base36_byte(b: u8) -> bool {
    b.is_ascii_digit() || b.is_ascii_lowercase()
}

//! Identifier types and DID documents.
//!
//! `Did` and `Handle` are validating newtypes: once constructed, the string
//! inside is known to match the strict grammar. Both are attacker-controlled
//! at the point of entry, so nothing downstream accepts a bare `&str`.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use smol_str::SmolStr;
use url::Url;

use crate::resolver::IdentityError;

pub static DID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").unwrap());

pub static HANDLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$")
        .unwrap()
});

/// A decentralized identifier, `did:<method>:<id>`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Did(SmolStr);

impl Did {
    /// Fallible constructor, validates the grammar.
    pub fn new(did: impl AsRef<str>) -> Result<Self, IdentityError> {
        let did = did.as_ref();
        if did.len() > 2048 || !DID_REGEX.is_match(did) {
            return Err(IdentityError::InvalidDid(did.into()));
        }
        Ok(Self(SmolStr::new(did)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The DID method name (`plc` in `did:plc:abc123`).
    pub fn method(&self) -> &str {
        // grammar guarantees two colons
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// The method-specific identifier (everything after the second colon).
    pub fn method_specific_id(&self) -> &str {
        self.0
            .splitn(3, ':')
            .nth(2)
            .unwrap_or_default()
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({})", self.0)
    }
}

impl Deref for Did {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Did {
    type Err = IdentityError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = SmolStr::deserialize(deserializer)?;
        Did::new(&s).map_err(D::Error::custom)
    }
}

/// A handle: a DNS-name-shaped account alias, bidirectionally bound to a DID.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Handle(SmolStr);

impl Handle {
    /// Fallible constructor, validates. Accepts (and strips) a leading `@`.
    pub fn new(handle: impl AsRef<str>) -> Result<Self, IdentityError> {
        let handle = handle.as_ref();
        let handle = handle.strip_prefix('@').unwrap_or(handle);
        if handle.len() > 253 || !HANDLE_REGEX.is_match(handle) {
            return Err(IdentityError::InvalidHandle(handle.into()));
        }
        Ok(Self(SmolStr::new(handle.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl Deref for Handle {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Handle {
    type Err = IdentityError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = SmolStr::deserialize(deserializer)?;
        Handle::new(&s).map_err(D::Error::custom)
    }
}

/// A DID document, reduced to the fields the atproto profile consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    pub id: Did,
    #[serde(default, rename = "alsoKnownAs")]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub service: Vec<Service>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

impl DidDocument {
    /// The PDS endpoint: service entry with id `#atproto_pds`.
    pub fn pds_endpoint(&self) -> Result<Url, IdentityError> {
        let svc = self
            .service
            .iter()
            .find(|svc| svc.id == "#atproto_pds" || svc.id.ends_with("#atproto_pds"))
            .ok_or(IdentityError::EndpointNotFound)?;
        Url::parse(&svc.service_endpoint).map_err(|_| IdentityError::EndpointNotFound)
    }

    /// The handle this document declares, from the first `at://` alias.
    pub fn declared_handle(&self) -> Option<Handle> {
        self.also_known_as
            .iter()
            .find_map(|aka| aka.strip_prefix("at://"))
            .and_then(|h| Handle::new(h).ok())
    }
}

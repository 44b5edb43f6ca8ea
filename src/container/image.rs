// Image references: [registry/]repository[:tag][@digest]
use crate::errors::{DindError, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

fn path_component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid path regex")
    })
}

fn registry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*(?::[0-9]+)?$",
        )
        .expect("valid registry regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid tag regex"))
}

fn digest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$")
            .expect("valid digest regex")
    })
}

/// A parsed image reference.
///
/// The original text is kept verbatim: displaying a reference yields exactly
/// what was parsed, so `docker:24` never turns into `docker.io/library/docker:24`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    raw: String,
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| DindError::Resolution {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }
        if reference.len() > 255 + 128 + 72 {
            return Err(invalid("reference too long"));
        }

        let (name_and_tag, digest) = match reference.split_once('@') {
            Some((rest, digest)) => {
                if !digest_re().is_match(digest) {
                    return Err(invalid("malformed digest"));
                }
                (rest, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a registry port.
        let last_slash = name_and_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name_and_tag[split + 1..];
                if !tag_re().is_match(tag) {
                    return Err(invalid("malformed tag"));
                }
                (&name_and_tag[..split], Some(tag.to_string()))
            }
            None => (name_and_tag, None),
        };

        let mut components: Vec<&str> = name.split('/').collect();
        let registry = match components.first() {
            Some(first)
                if components.len() > 1
                    && (first.contains('.') || first.contains(':') || *first == "localhost") =>
            {
                if !registry_re().is_match(first) {
                    return Err(invalid("malformed registry host"));
                }
                Some(components.remove(0).to_string())
            }
            _ => None,
        };

        if components.is_empty() || components.iter().any(|c| !path_component_re().is_match(c))
        {
            return Err(invalid("repository must be lowercase path components"));
        }

        Ok(Self {
            raw: reference.to_string(),
            registry,
            repository: components.join("/"),
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Select an image variant by extending the tag, e.g. `docker:24` + `-cli`
    pub fn with_tag_suffix(&self, suffix: &str) -> Result<Self> {
        if self.digest.is_some() {
            return Err(DindError::Resolution {
                reference: self.raw.clone(),
                reason: "cannot select a variant of a digest-pinned reference".to_string(),
            });
        }
        if self.tag.is_none() {
            return Err(DindError::Resolution {
                reference: self.raw.clone(),
                reason: format!("cannot append '{}' to an untagged reference", suffix),
            });
        }
        Self::parse(&format!("{}{}", self.raw, suffix))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ImageRef {
    type Err = DindError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

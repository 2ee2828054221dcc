//! Container image references.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Docker tag grammar.
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid regex"));

/// A container image: `registry/path/repository:tag[@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    /// Registry host and repository path (e.g. `123.dkr.ecr.us-east-1.amazonaws.com/demo-app`).
    pub repository: String,
    /// Explicit tag, if the reference carried one.
    pub tag: Option<String>,
    pub digest: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid image repository: {0}")]
    InvalidRepository(String),
    #[error("invalid image tag: {0}")]
    InvalidTag(String),
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, ImageError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ImageError::Empty);
        }

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (reference, None),
        };

        // A ':' before the last '/' is a registry port, not a tag.
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(&name[split + 1..]))
            }
            None => (name, None),
        };

        if repository.is_empty() || repository.ends_with('/') || repository.contains(' ') {
            return Err(ImageError::InvalidRepository(reference.to_string()));
        }
        if let Some(tag) = tag {
            if !TAG_RE.is_match(tag) {
                return Err(ImageError::InvalidTag(tag.to_string()));
            }
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// The tag the runtime pulls: the explicit one or `latest`.
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    /// Same repository with a different tag. Drops any digest.
    pub fn with_tag(&self, tag: &str) -> Result<Self, ImageError> {
        if !TAG_RE.is_match(tag) {
            return Err(ImageError::InvalidTag(tag.to_string()));
        }
        Ok(Self {
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ImageRef::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(image: ImageRef) -> Self {
        image.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_tag() {
        let image = ImageRef::parse("demo-app:v1.2.0").unwrap();
        assert_eq!(image.repository, "demo-app");
        assert_eq!(image.tag(), "v1.2.0");
    }

    #[test]
    fn untagged_reference_pulls_latest() {
        let image = ImageRef::parse("123.dkr.ecr.us-east-1.amazonaws.com/demo-app").unwrap();
        assert_eq!(image.tag, None);
        assert_eq!(image.tag(), "latest");
        assert_eq!(
            image.to_string(),
            "123.dkr.ecr.us-east-1.amazonaws.com/demo-app"
        );
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let image = ImageRef::parse("localhost:5000/team/demo-app").unwrap();
        assert_eq!(image.repository, "localhost:5000/team/demo-app");
        assert_eq!(image.tag, None);

        let image = ImageRef::parse("localhost:5000/demo-app:42").unwrap();
        assert_eq!(image.repository, "localhost:5000/demo-app");
        assert_eq!(image.tag(), "42");
    }

    #[test]
    fn digest_is_preserved() {
        let image = ImageRef::parse("demo-app:v1@sha256:abcd").unwrap();
        assert_eq!(image.digest.as_deref(), Some("sha256:abcd"));
        assert_eq!(image.to_string(), "demo-app:v1@sha256:abcd");
    }

    #[test]
    fn digest_only_reference_round_trips() {
        let image = ImageRef::parse("demo-app@sha256:abcd").unwrap();
        assert_eq!(image.tag, None);
        assert_eq!(image.digest.as_deref(), Some("sha256:abcd"));
        assert_eq!(image.to_string(), "demo-app@sha256:abcd");

        let json = serde_json::to_string(&image).unwrap();
        let back: ImageRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(ImageRef::parse("  "), Err(ImageError::Empty));
        assert!(matches!(
            ImageRef::parse("demo-app:"),
            Err(ImageError::InvalidTag(_))
        ));
        assert!(matches!(
            ImageRef::parse(":v1"),
            Err(ImageError::InvalidRepository(_))
        ));
        assert!(matches!(
            ImageRef::parse("demo-app:-bad"),
            Err(ImageError::InvalidTag(_))
        ));
    }

    #[test]
    fn with_tag_replaces_tag() {
        let image = ImageRef::parse("demo-app:v1@sha256:abcd").unwrap();
        let next = image.with_tag("build-57").unwrap();
        assert_eq!(next.to_string(), "demo-app:build-57");
        assert!(image.with_tag("no spaces").is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let image = ImageRef::parse("demo-app:v3").unwrap();
        let json = serde_json::to_string(&image).unwrap();
        assert_eq!(json, "\"demo-app:v3\"");
        let back: ImageRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, image);
    }
}

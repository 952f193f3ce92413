//! Image reference parsing
//!
//! Turns raw image strings such as `nginx:1.25`, `ghcr.io/org/app@sha256:...` or
//! `localhost:5000/tools/builder` into a structured [`ImageReference`].
//! Parsing is total: input that cannot be split sensibly degrades to a reference
//! on the default registry whose repository is the whole input.

use std::fmt;

/// Registry used when the reference names none
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when the reference carries neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

/// Host names that all refer to Docker Hub
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Structured container image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host, possibly with a port (e.g. "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g. "library/nginx", "org/app")
    pub repository: String,
    /// Tag, if present
    pub tag: Option<String>,
    /// Content digest (e.g. "sha256:abc..."), if present
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a raw image string. Never fails.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        let (name_tag, digest) = match raw.rfind('@') {
            Some(pos) if raw[pos + 1..].contains(':') => {
                (&raw[..pos], Some(raw[pos + 1..].to_string()))
            }
            _ => (raw, None),
        };

        // A tag colon can only appear after the last path separator;
        // anything before it may be a registry port.
        let last_segment = name_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_tag[last_segment..].rfind(':') {
            Some(i) => {
                let pos = last_segment + i;
                let tag = &name_tag[pos + 1..];
                (&name_tag[..pos], (!tag.is_empty()).then(|| tag.to_string()))
            }
            None => (name_tag, None),
        };

        let Some((registry, repository)) = split_registry(name) else {
            return Self::fallback(raw);
        };
        if repository.contains(['@', ':']) {
            return Self::fallback(raw);
        }

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Self {
            registry,
            repository,
            tag,
            digest,
        }
    }

    fn fallback(raw: &str) -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            repository: raw.to_string(),
            tag: Some(DEFAULT_TAG.to_string()),
            digest: None,
        }
    }

    /// Whether this reference came from input that could not be split.
    ///
    /// Degraded references keep the raw input as repository and format as that input.
    fn is_degraded(&self) -> bool {
        self.repository.contains(['@', ':']) || split_registry(&self.repository).is_none()
    }

    /// Whether this reference points at Docker Hub
    pub fn is_docker_hub(&self) -> bool {
        self.registry == DEFAULT_REGISTRY
    }

    /// Tag or digest to request from the registry; the tag wins when both are present
    pub fn manifest_reference(&self) -> &str {
        self.tag
            .as_deref()
            .or(self.digest.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// `registry/repository` without tag or digest
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Whether `other` names the same repository on the same registry
    pub fn same_repository(&self, other: &ImageReference) -> bool {
        self.registry == other.registry && self.repository == other.repository
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_degraded() {
            return f.write_str(&self.repository);
        }
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Split `name` into registry host and repository.
///
/// The first path segment is a registry host when it contains a dot or a colon,
/// or is `localhost`. Returns `None` when no usable repository remains.
fn split_registry(name: &str) -> Option<(String, String)> {
    if name.is_empty() {
        return None;
    }

    let (registry, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (normalize_registry(first), rest.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
    };

    if repository.is_empty() || repository.starts_with('/') || repository.ends_with('/') {
        return None;
    }

    let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
        format!("library/{repository}")
    } else {
        repository
    };

    Some((registry, repository))
}

fn normalize_registry(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    if DOCKER_HUB_ALIASES.contains(&host.as_str()) {
        DEFAULT_REGISTRY.to_string()
    } else {
        host
    }
}

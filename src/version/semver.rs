//! Semantic version parsing of image tags
//!
//! Image tags are looser than semver: `1`, `1.2`, `v1.2.3` and `1.2.3-rc.1` are all
//! accepted. Missing components compare as zero, but the original tag text is what
//! callers get back.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use semver::{BuildMetadata, Prerelease, Version};

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:-([0-9A-Za-z.-]+))?$")
        .expect("tag pattern is valid")
});

/// Suffix labels that mark a prerelease rather than an image variant
const PRERELEASE_LABELS: [&str; 6] = ["alpha", "beta", "rc", "pre", "preview", "dev"];

/// A tag that parsed as a semantic version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagVersion {
    pub version: Version,
    /// Number of numeric components written in the tag (1 to 3)
    pub segments: usize,
    /// Whether the tag carries a leading `v`
    pub prefixed: bool,
}

impl TagVersion {
    /// Ordering used to pick the display form among version-equal tags:
    /// more explicit segments first, then the unprefixed spelling.
    fn display_rank(&self) -> (usize, bool) {
        (self.segments, !self.prefixed)
    }
}

/// Parse an image tag as a semantic version.
///
/// Tags like `1.25-alpine` parse with `alpine` as the prerelease, so they sort
/// below the matching plain release. Use [`variant`] to keep such tags apart.
pub fn parse_tag(tag: &str) -> Option<TagVersion> {
    let captures = TAG_PATTERN.captures(tag)?;
    let number = |i: usize| -> Option<u64> {
        match captures.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };

    let major = number(1)?;
    let minor = number(2)?;
    let patch = number(3)?;
    let pre = match captures.get(4) {
        Some(m) => Prerelease::new(m.as_str()).ok()?,
        None => Prerelease::EMPTY,
    };
    let segments = 1 + captures.get(2).is_some() as usize + captures.get(3).is_some() as usize;

    Some(TagVersion {
        version: Version {
            major,
            minor,
            patch,
            pre,
            build: BuildMetadata::EMPTY,
        },
        segments,
        prefixed: tag.starts_with('v'),
    })
}

/// Find the tag with the highest semantic version.
///
/// Version-equal tags (`1.2` and `1.2.0`) tie-break on the more explicit spelling,
/// then the unprefixed one, then whichever was listed first. Returns `None` when no
/// tag parses.
pub fn find_best_version(tags: &[String]) -> Option<String> {
    let mut best: Option<(&String, TagVersion)> = None;

    for tag in tags {
        let Some(parsed) = parse_tag(tag) else {
            continue;
        };
        let replace = match &best {
            None => true,
            Some((_, current)) => match parsed.version.cmp(&current.version) {
                Ordering::Greater => true,
                Ordering::Equal => parsed.display_rank() > current.display_rank(),
                Ordering::Less => false,
            },
        };
        if replace {
            best = Some((tag, parsed));
        }
    }

    best.map(|(tag, _)| tag.clone())
}

/// Variant suffix of a version tag, such as `alpine` in `1.25-alpine`.
///
/// Prerelease suffixes (`rc.1`, `beta2`) and numeric revisions (`-1`) are not variants.
/// Returns `None` for plain versions and for tags that do not parse.
pub fn variant(tag: &str) -> Option<&str> {
    parse_tag(tag)?;
    let (_, suffix) = tag.split_once('-')?;
    let label = suffix
        .split(['.', '-'])
        .next()
        .unwrap_or_default()
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_ascii_lowercase();
    if label.is_empty() || PRERELEASE_LABELS.contains(&label.as_str()) {
        None
    } else {
        Some(suffix)
    }
}

/// Whether `candidate` is a strictly greater version than `current`
pub fn is_newer(current: &str, candidate: &str) -> bool {
    match (parse_tag(current), parse_tag(candidate)) {
        (Some(current), Some(candidate)) => candidate.version > current.version,
        _ => false,
    }
}

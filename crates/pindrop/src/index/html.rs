//! Parsing of PEP 503 "simple index" HTML project pages, the fallback for indexes that do
//! not speak the PEP 691 JSON API.

use std::borrow::Borrow;
use std::str::FromStr;

use crate::types::{
    ArtifactHashes, ArtifactInfo, ArtifactName, DistInfoMetadata, NormalizedPackageName,
    ProjectInfo, Specifiers, Yanked,
};
use miette::{miette, IntoDiagnostic};
use rattler_digest::{parse_digest_from_hex, Sha256};
use tl::HTMLTag;
use url::Url;

/// Parses a `sha256=<hex>` url fragment into a hash set.
pub fn parse_hash(s: &str) -> Option<ArtifactHashes> {
    if let Some(("sha256", hex)) = s.split_once('=') {
        Some(ArtifactHashes {
            sha256: parse_digest_from_hex::<Sha256>(hex),
        })
    } else {
        None
    }
}

fn into_artifact_info(
    base: &Url,
    normalized_package_name: &NormalizedPackageName,
    tag: &HTMLTag,
) -> Option<ArtifactInfo> {
    let attributes = tag.attributes();
    // The href names the file
    let href = attributes.get("href").flatten()?.as_utf8_str();

    let url = base.join(href.as_ref()).ok()?;
    let filename = url.path_segments().and_then(|mut s| s.next_back());
    let filename = filename
        .map(|s| ArtifactName::from_filename(s, normalized_package_name))?
        .ok()?;

    // We found a valid link
    let hash = url.fragment().and_then(parse_hash);
    let requires_python = attributes
        .get("data-requires-python")
        .flatten()
        // filter empty strings
        .filter(|a| !a.as_utf8_str().is_empty())
        .map(|a| {
            Specifiers::from_str(
                html_escape::decode_html_entities(a.as_utf8_str().as_ref()).as_ref(),
            )
        })
        .transpose()
        .ok()?;

    let metadata_attr = attributes
        .get("data-dist-info-metadata")
        .flatten()
        .map(|a| a.as_utf8_str());

    let dist_info_metadata = match metadata_attr {
        None => DistInfoMetadata {
            available: false,
            hashes: ArtifactHashes::default(),
        },
        Some(cow) if cow.as_ref() == "true" => DistInfoMetadata {
            available: true,
            hashes: ArtifactHashes::default(),
        },
        Some(value) => DistInfoMetadata {
            available: true,
            hashes: parse_hash(value.borrow()).unwrap_or_default(),
        },
    };

    let yanked_reason = attributes
        .get("data-yanked")
        .flatten()
        .map(|a| a.as_utf8_str());
    let yanked = match yanked_reason {
        None => Yanked {
            yanked: false,
            reason: None,
        },
        Some(reason) => Yanked {
            yanked: true,
            reason: Some(reason.to_string()),
        },
    };

    Some(ArtifactInfo {
        filename,
        url,
        hashes: hash,
        requires_python,
        dist_info_metadata,
        yanked,
    })
}

/// Parses the artifact links of a project page.
pub fn parse_project_info_html(base: &Url, body: &str) -> miette::Result<ProjectInfo> {
    let dom = tl::parse(body, tl::ParserOptions::default()).into_diagnostic()?;
    let links = dom.query_selector("a");
    let mut project_info = ProjectInfo::default();

    // The last path segment of the project url is the (normalized) package name
    let last_non_empty_segment = base.path_segments().and_then(|segments| {
        segments
            .rev()
            .find(|segment| !segment.is_empty())
            .map(|s| s.to_string())
    });

    let normalized_package_name = if let Some(last_segment) = last_non_empty_segment {
        last_segment
            .parse::<NormalizedPackageName>()
            .map_err(|e| {
                miette!(
                    "error parsing segment '{last_segment}' from url '{base}' into a normalized package name, error: {e}"
                )
            })?
    } else {
        return Err(miette!("no package segments found in url: '{base}'"));
    };

    // An explicit <base href="..."> overrides the url the page was fetched from
    let base = dom
        .query_selector("base")
        .and_then(|mut v| v.next())
        .and_then(|v| v.get(dom.parser()))
        .and_then(|v| v.as_tag())
        .and_then(|v| v.attributes().get("href"))
        .and_then(|v| v.map(|v| v.as_utf8_str().to_string()))
        .and_then(|v| Url::parse(&v).ok())
        .unwrap_or_else(|| base.clone());

    if let Some(links) = links {
        let a_tags = links
            .filter_map(|a| a.get(dom.parser()))
            .filter_map(|h| h.as_tag());

        for a in a_tags {
            if let Some(artifact_info) = into_artifact_info(&base, &normalized_package_name, a) {
                project_info.files.push(artifact_info);
            }
        }
    };

    Ok(project_info)
}

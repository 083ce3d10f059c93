//! Document loading and region extraction.
//!
//! Turns a source (file path or URL) into ordered content regions ready for
//! chunking: text regions for plain text, Markdown, and the PDF text layer;
//! image regions for Markdown image references and standalone image files.
//! Malformed or unreadable sources fail with
//! [`PipelineError::DocumentParse`], which the pipeline reports and skips
//! rather than retries.

use base64::Engine;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::models::{ContentType, Region};

/// Upper bound on raw document size; larger sources are rejected rather
/// than buffered.
const MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024;

/// A source document loaded into memory, before chunking.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub source: String,
    pub title: Option<String>,
    pub content_type: ContentType,
    pub dedup_hash: String,
    pub regions: Vec<Region>,
}

/// Whether a source string is an http(s) URL rather than a filesystem path.
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Resolve the content type for a source: an explicit hint wins, then the
/// extension, then plain text.
pub fn detect_content_type(source: &str, hint: Option<ContentType>) -> ContentType {
    if let Some(ct) = hint {
        return ct;
    }
    let tail = source.rsplit('/').next().unwrap_or(source);
    tail.rsplit_once('.')
        .and_then(|(_, ext)| ContentType::from_extension(ext))
        .unwrap_or(ContentType::Text)
}

/// Load a source document from disk or over HTTP and extract its regions.
pub async fn load_source(
    source: &str,
    hint: Option<ContentType>,
    timeout_secs: u64,
) -> Result<LoadedDocument, PipelineError> {
    let bytes = if is_url(source) {
        fetch_url(source, timeout_secs).await?
    } else {
        std::fs::read(source).map_err(|e| parse_err(source, e))?
    };
    if bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(parse_err(
            source,
            format!("document exceeds size limit ({MAX_DOCUMENT_BYTES} bytes)"),
        ));
    }

    let content_type = detect_content_type(source, hint);
    let regions = parse_regions(source, &bytes, content_type)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let dedup_hash = format!("{:x}", hasher.finalize());

    Ok(LoadedDocument {
        source: source.to_string(),
        title: title_for(source),
        content_type,
        dedup_hash,
        regions,
    })
}

/// Extract content regions from raw bytes according to the content type.
pub fn parse_regions(
    source: &str,
    bytes: &[u8],
    content_type: ContentType,
) -> Result<Vec<Region>, PipelineError> {
    match content_type {
        ContentType::Text => Ok(vec![Region::Text {
            text: String::from_utf8_lossy(bytes).into_owned(),
            page: None,
        }]),
        ContentType::Markdown => Ok(parse_markdown_regions(&String::from_utf8_lossy(bytes))),
        ContentType::Pdf => parse_pdf_regions(source, bytes),
        ContentType::Image => Ok(vec![Region::Image {
            reference: source.to_string(),
            caption: None,
            data_base64: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            page: None,
        }]),
    }
}

/// Split Markdown into text regions interleaved with `![alt](target)` image
/// regions. The alt text becomes the image caption; targets are kept as
/// references and never fetched.
fn parse_markdown_regions(text: &str) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut buf = String::new();
    let mut rest = text;
    while let Some((start, end, alt, target)) = find_image_ref(rest) {
        buf.push_str(&rest[..start]);
        if !buf.trim().is_empty() {
            regions.push(Region::Text {
                text: std::mem::take(&mut buf),
                page: None,
            });
        } else {
            buf.clear();
        }
        let caption = alt.trim();
        regions.push(Region::Image {
            reference: target.to_string(),
            caption: (!caption.is_empty()).then(|| caption.to_string()),
            data_base64: None,
            page: None,
        });
        rest = &rest[end..];
    }
    buf.push_str(rest);
    if !buf.trim().is_empty() {
        regions.push(Region::Text {
            text: buf,
            page: None,
        });
    }
    if regions.is_empty() {
        regions.push(Region::Text {
            text: text.to_string(),
            page: None,
        });
    }
    regions
}

/// Find the next `![alt](target)` reference. Returns the byte range of the
/// whole reference plus the alt and target slices. Targets with spaces or
/// newlines are left as literal text.
fn find_image_ref(text: &str) -> Option<(usize, usize, &str, &str)> {
    let mut from = 0;
    while let Some(rel) = text[from..].find("![") {
        let start = from + rel;
        let after_bang = &text[start + 2..];
        if let Some(alt_len) = after_bang.find("](") {
            let alt = &after_bang[..alt_len];
            let target_start = start + 2 + alt_len + 2;
            if let Some(close_rel) = text[target_start..].find(')') {
                let target = &text[target_start..target_start + close_rel];
                if !alt.contains('\n')
                    && !target.contains('\n')
                    && !target.contains(' ')
                    && !target.is_empty()
                {
                    return Some((start, target_start + close_rel + 1, alt, target));
                }
            }
        }
        from = start + 2;
    }
    None
}

/// Extract the PDF text layer. Page breaks (form feeds) become one region
/// per page; without them the whole text is a single region.
fn parse_pdf_regions(source: &str, bytes: &[u8]) -> Result<Vec<Region>, PipelineError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| parse_err(source, e))?;
    if !text.contains('\u{c}') {
        return Ok(vec![Region::Text { text, page: None }]);
    }
    Ok(text
        .split('\u{c}')
        .enumerate()
        .map(|(i, page_text)| Region::Text {
            text: page_text.to_string(),
            page: Some(i as i64 + 1),
        })
        .collect())
}

async fn fetch_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, PipelineError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| parse_err(url, e))?;
    let resp = client.get(url).send().await.map_err(|e| parse_err(url, e))?;
    if !resp.status().is_success() {
        return Err(parse_err(url, format!("HTTP {}", resp.status())));
    }
    let bytes = resp.bytes().await.map_err(|e| parse_err(url, e))?;
    Ok(bytes.to_vec())
}

fn title_for(source: &str) -> Option<String> {
    let tail = source.trim_end_matches('/').rsplit('/').next()?;
    if tail.is_empty() {
        return None;
    }
    Some(tail.to_string())
}

fn parse_err(source_ref: &str, reason: impl std::fmt::Display) -> PipelineError {
    PipelineError::DocumentParse {
        source_ref: source_ref.to_string(),
        reason: reason.to_string(),
    }
}

/// Expand a directory source into its supported files (by extension),
/// honoring exclude globs. Results are sorted for deterministic ingestion
/// order.
pub fn expand_dir(root: &Path, extra_excludes: &[String]) -> anyhow::Result<Vec<String>> {
    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend_from_slice(extra_excludes);
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) {
            continue;
        }
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ContentType::from_extension)
            .is_some();
        if supported {
            files.push(path.to_string_lossy().to_string());
        }
    }
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

//! Deterministic output names.
//!
//! Names depend only on the source name, the workflow and the target
//! format, so rerunning a batch always yields the same download names.

use crate::params::{OutputFormat, Workflow};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

/// Trailing extension: a dot followed by anything but another dot or slash.
static EXTENSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[^/.]+$").unwrap());

/// Replace (or append) the extension of `name`.
pub fn with_extension(name: &str, ext: &str) -> String {
    if EXTENSION_RE.is_match(name) {
        EXTENSION_RE
            .replace(name, format!(".{ext}").as_str())
            .into_owned()
    } else {
        format!("{name}.{ext}")
    }
}

/// Name of the artifact derived from `source_name`.
///
/// `format` is only consulted by the workflows that change the file type.
pub fn output_name(workflow: Workflow, source_name: &str, format: Option<OutputFormat>) -> String {
    match (workflow, format) {
        (Workflow::Compress, _) => format!("compressed_{source_name}"),
        (Workflow::Resize, _) => format!("resized_{source_name}"),
        (Workflow::Convert | Workflow::SvgExport, Some(f)) => with_extension(source_name, f.extension()),
        (Workflow::Convert | Workflow::SvgExport, None) => source_name.to_string(),
    }
}

/// Name of the bundle produced when more than one artifact is downloaded.
pub fn archive_name(workflow: Workflow) -> &'static str {
    match workflow {
        Workflow::Compress => "compressed_images.zip",
        Workflow::Resize => "resized_images.zip",
        Workflow::Convert => "converted_files.zip",
        Workflow::SvgExport => "converted_svgs.zip",
    }
}

/// Make names unique, keeping order. Later duplicates get a ` (n)` suffix
/// before the extension: `a.png`, `a (2).png`, `a (3).png`.
pub fn dedupe<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut taken = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            if taken.insert(name.to_string()) {
                return name.to_string();
            }
            let path = Path::new(name);
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
            let ext = path.extension().and_then(|e| e.to_str());
            (2..)
                .map(|n| match ext {
                    Some(ext) => format!("{stem} ({n}).{ext}"),
                    None => format!("{stem} ({n})"),
                })
                .find(|candidate| taken.insert(candidate.clone()))
                .unwrap_or_else(|| name.to_string())
        })
        .collect()
}

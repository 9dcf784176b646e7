//! Archive packager: bundle artifacts into one downloadable blob.
//!
//! * no artifacts → [`PipelineError::NothingToPackage`]
//! * one artifact → returned verbatim, never wrapped
//! * several → a ZIP archive, one entry per artifact in batch order
//!
//! Entry names are taken verbatim from the artifacts. Making them unique is
//! the caller's job (see [`crate::naming::dedupe`]).

use crate::error::PipelineError;
use crate::output::{Artifact, Download};
use std::io::{Cursor, Write};
use tracing::debug;

pub const ARCHIVE_MEDIA_TYPE: &str = "application/zip";

/// Package `artifacts` into a single download named `archive_name` (when
/// an archive is needed).
pub fn package(artifacts: &[Artifact], archive_name: &str) -> Result<Download, PipelineError> {
    match artifacts {
        [] => Err(PipelineError::NothingToPackage),
        [single] => Ok(single.clone().into_download()),
        many => {
            let bytes = write_zip(many).map_err(|e| PipelineError::PackagingFailed(e.to_string()))?;
            debug!(
                "Packaged {} artifacts into {} ({} bytes)",
                many.len(),
                archive_name,
                bytes.len()
            );
            Ok(Download {
                name: archive_name.to_string(),
                media_type: ARCHIVE_MEDIA_TYPE.to_string(),
                bytes: bytes.into(),
            })
        }
    }
}

/// [`package`] on the blocking pool; deflating large batches is CPU-bound.
pub async fn package_async(
    artifacts: Vec<Artifact>,
    archive_name: String,
) -> Result<Download, PipelineError> {
    tokio::task::spawn_blocking(move || package(&artifacts, &archive_name))
        .await
        .map_err(|e| PipelineError::Internal(format!("Packaging task panicked: {e}")))?
}

fn write_zip(artifacts: &[Artifact]) -> zip::result::ZipResult<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for artifact in artifacts {
        zip.start_file(artifact.name(), options)?;
        zip.write_all(artifact.bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn artifact(name: &str, bytes: &[u8]) -> Artifact {
        Artifact::new(name, "image/png", bytes.to_vec())
    }

    fn entries(download: &Download) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(download.bytes.to_vec())).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).unwrap();
                (file.name().to_string(), buf)
            })
            .collect()
    }

    #[test]
    fn empty_is_an_error() {
        assert!(matches!(
            package(&[], "x.zip"),
            Err(PipelineError::NothingToPackage)
        ));
    }

    #[test]
    fn single_artifact_is_verbatim() {
        let a = artifact("one.png", b"payload");
        let d = package(std::slice::from_ref(&a), "images.zip").unwrap();
        assert_eq!(d.name, "one.png");
        assert_eq!(d.media_type, "image/png");
        assert_eq!(&*d.bytes, b"payload");
        assert!(!d.is_archive());
    }

    #[test]
    fn many_artifacts_become_a_zip_in_order() {
        let d = package(
            &[artifact("a.png", b"AAA"), artifact("b.png", b"BB")],
            "images.zip",
        )
        .unwrap();
        assert_eq!(d.name, "images.zip");
        assert!(d.is_archive());
        assert_eq!(
            entries(&d),
            vec![
                ("a.png".to_string(), b"AAA".to_vec()),
                ("b.png".to_string(), b"BB".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn async_packaging_matches_sync() {
        let items = vec![artifact("a.png", b"1"), artifact("b.png", b"2")];
        let d = package_async(items, "x.zip".into()).await.unwrap();
        assert_eq!(entries(&d).len(), 2);
    }

    #[test]
    fn async_packaging_from_sync_caller() {
        let d = tokio_test::block_on(package_async(
            vec![artifact("only.png", b"z")],
            "x.zip".into(),
        ))
        .unwrap();
        assert_eq!(d.name, "only.png");
    }
}

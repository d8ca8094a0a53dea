use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use dicom_dictionary_std::tags;
use dicom_object::OpenFileOptions;
use futures_util::StreamExt;
use reqwest::{header, multipart, Body, Method};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    client::{AuthScheme, EncephalonClient, Resource},
    error::{EncephalonError, Result},
    structs::Dicom,
};

/// A file on disk that was checked to be DICOM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DicomFile {
    pub path: PathBuf,
    pub study_instance_uid: String,
    pub sop_instance_uid: String,
}

/// Reads the header of a DICOM file, stopping before the pixel data.
pub fn inspect_dicom(path: &Path) -> Result<DicomFile> {
    let object = OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)
        .map_err(|e| EncephalonError::Dicom(format!("{}: {}", path.display(), e)))?;

    let read_uid = |name: &str| -> Result<String> {
        let value = object
            .element_by_name(name)
            .map_err(|e| EncephalonError::Dicom(format!("{}: {}", path.display(), e)))?
            .to_str()
            .map_err(|e| EncephalonError::Dicom(format!("{}: {}", path.display(), e)))?;
        Ok(value.trim_end_matches(|c: char| c == '\0' || c == ' ').to_string())
    };

    Ok(DicomFile {
        path: path.to_owned(),
        study_instance_uid: read_uid("StudyInstanceUID")?,
        sop_instance_uid: read_uid("SOPInstanceUID")?,
    })
}

/// Expands files and directories into the DICOM files they contain.
///
/// Directories are only descended into when `recursive` is set. Anything
/// that is not a readable DICOM file is skipped with a warning.
pub fn collect_dicom_files(paths: &[PathBuf], recursive: bool) -> Vec<DicomFile> {
    let mut candidates = Vec::new();
    for path in paths {
        if path.is_dir() {
            let walker = match recursive {
                true => WalkDir::new(path),
                false => WalkDir::new(path).max_depth(1),
            };
            candidates.extend(
                walker
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|entry| match entry {
                        Ok(entry) if entry.file_type().is_file() => Some(entry.into_path()),
                        Ok(_) => None,
                        Err(e) => {
                            warn!("Skipping unreadable entry: {}", e);
                            None
                        }
                    }),
            );
        } else {
            candidates.push(path.clone());
        }
    }

    let inspected = candidates
        .into_iter()
        .filter_map(|path| match inspect_dicom(&path) {
            Ok(dicom) => Some(dicom),
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect();
    dedup_instances(inspected)
}

/// Keeps the first file of each SOPInstanceUID.
fn dedup_instances(dicoms: Vec<DicomFile>) -> Vec<DicomFile> {
    let mut seen = HashSet::new();
    dicoms
        .into_iter()
        .filter(|dicom| {
            if !seen.insert(dicom.sop_instance_uid.clone()) {
                warn!(
                    "Skipping {}: instance {} is already in the dataset",
                    dicom.path.display(),
                    dicom.sop_instance_uid
                );
                return false;
            }
            info!(
                "File {} added to the dataset to be analyzed.",
                dicom.path.display()
            );
            true
        })
        .collect()
}

/// Returns the StudyInstanceUID shared by every file.
///
/// A study created on the remote holds a single exam, files coming from
/// several studies are refused before anything is uploaded.
pub fn check_study_uids(dicoms: &[DicomFile]) -> Result<&str> {
    let first = dicoms
        .first()
        .ok_or_else(|| EncephalonError::Dicom("no DICOM file to upload".to_string()))?;
    match dicoms
        .iter()
        .find(|dicom| dicom.study_instance_uid != first.study_instance_uid)
    {
        Some(other) => Err(EncephalonError::Dicom(format!(
            "{} belongs to study {} but {} belongs to study {}",
            other.path.display(),
            other.study_instance_uid,
            first.path.display(),
            first.study_instance_uid
        ))),
        None => Ok(&first.study_instance_uid),
    }
}

/// Multipart part streaming a file from disk instead of loading it in memory.
async fn file_part(path: &Path) -> Result<multipart::Part> {
    let file = File::open(path).await?;
    let length = file.metadata().await?.len();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.dcm".to_string());

    let stream = FramedRead::new(file, BytesCodec::new());
    let part = multipart::Part::stream_with_length(Body::wrap_stream(stream), length)
        .file_name(file_name)
        .mime_str("application/dicom")?;
    Ok(part)
}

impl EncephalonClient {
    /// Uploads a DICOM file into an existing study.
    pub async fn upload_dicom(&self, study_uuid: &str, path: &Path) -> Result<Dicom> {
        let form = multipart::Form::new()
            .text("study", study_uuid.to_string())
            .part("file", file_part(path).await?);

        let request = self
            .request(
                Method::POST,
                &self.collection_url(Resource::Dicom),
                Resource::Dicom.auth_scheme(),
            )?
            .multipart(form);

        let start = std::time::Instant::now();
        let dicom: Dicom = self.send_json(request).await?;
        debug!(
            "Time to upload {} : {:?}",
            path.display(),
            start.elapsed()
        );
        Ok(dicom)
    }

    /// Uploads a DICOM file and lets the remote file it into a study,
    /// creating the study when the file does not belong to one yet.
    pub async fn idempotent_upload(&self, path: &Path) -> Result<Dicom> {
        let form = multipart::Form::new().part("file", file_part(path).await?);

        let request = self
            .request(
                Method::POST,
                &self.endpoint("idempotent_dicom/"),
                AuthScheme::Bearer,
            )?
            .multipart(form);

        self.send_json(request).await
    }

    /// Downloads the content of an uploaded file to `output_dir/filename`.
    pub async fn download_dicom(
        &self,
        uuid: &str,
        filename: &str,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let url = self.endpoint(&format!("dicoms/file/{}/{}/", uuid, filename));
        let request = self
            .request(Method::GET, &url, AuthScheme::Bearer)?
            .header(header::ACCEPT, "*/*");
        let response = self.send(request).await?;

        tokio::fs::create_dir_all(output_dir).await?;
        let output = output_dir.join(filename);
        let mut file = File::create(&output).await?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        debug!("DICOM {} saved to {}", uuid, output.display());
        Ok(output)
    }
}

//! In-process descriptor gallery

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use capture_session::{
    FaceDescriptor, Identity, IdentityLookup, LookupError, LookupOutcome, Submission,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::LookupConfig;

/// Enrollment file errors
#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("Cannot read enrollment file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid enrollment file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Patient {0} has an empty descriptor")]
    EmptyDescriptor(i64),
}

/// One entry of an enrollment file
#[derive(Debug, Deserialize)]
struct EnrollmentRecord {
    #[serde(alias = "paciente")]
    patient: Identity,
    descriptor: Vec<f32>,
}

struct Enrollment {
    identity: Identity,
    descriptor: FaceDescriptor,
}

/// Nearest-neighbour matching over enrolled patients.
///
/// Descriptors are stored unit length; a submission matches the closest
/// enrollment when its Euclidean distance is at most the threshold.
pub struct GalleryLookup {
    enrolled: RwLock<Vec<Enrollment>>,
    threshold: f32,
}

impl GalleryLookup {
    pub fn new(threshold: f32) -> Self {
        Self {
            enrolled: RwLock::new(Vec::new()),
            threshold,
        }
    }

    /// Gallery with the configured threshold, enrolled from
    /// `lookup.gallery_path` when set
    pub async fn from_config(config: &LookupConfig) -> Result<Self, GalleryError> {
        let gallery = Self::new(config.match_threshold);
        match &config.gallery_path {
            Some(path) => {
                let count = gallery.enroll_file(path).await?;
                info!("Gallery loaded {} patients from {}", count, path.display());
            }
            None => warn!("No enrollment file configured; gallery starts empty"),
        }
        Ok(gallery)
    }

    /// Enroll every patient in a JSON file of
    /// `[{"patient": {...}, "descriptor": [...]}]` records.
    ///
    /// The file is validated before anything is enrolled.
    pub async fn enroll_file(&self, path: &Path) -> Result<usize, GalleryError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let records: Vec<EnrollmentRecord> =
            serde_json::from_slice(&bytes).map_err(|source| GalleryError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(empty) = records.iter().find(|r| r.descriptor.is_empty()) {
            return Err(GalleryError::EmptyDescriptor(empty.patient.id));
        }

        let count = records.len();
        for record in records {
            self.enroll(record.patient, FaceDescriptor(record.descriptor))
                .await;
        }
        Ok(count)
    }

    /// Add a patient. Re-enrolling an id replaces its descriptor.
    pub async fn enroll(&self, identity: Identity, descriptor: FaceDescriptor) {
        let descriptor = descriptor.normalized();
        let mut enrolled = self.enrolled.write().await;
        enrolled.retain(|e| e.identity.id != identity.id);
        info!("Enrolled patient {} ({})", identity.id, identity.name);
        enrolled.push(Enrollment {
            identity,
            descriptor,
        });
    }

    /// Remove a patient; returns whether it was enrolled
    pub async fn remove(&self, id: i64) -> bool {
        let mut enrolled = self.enrolled.write().await;
        let before = enrolled.len();
        enrolled.retain(|e| e.identity.id != id);
        enrolled.len() != before
    }

    pub async fn len(&self) -> usize {
        self.enrolled.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.enrolled.read().await.is_empty()
    }
}

#[async_trait]
impl IdentityLookup for GalleryLookup {
    async fn identify(&self, submission: &Submission) -> Result<LookupOutcome, LookupError> {
        let probe = submission
            .descriptor
            .clone()
            .ok_or(LookupError::MissingDescriptor)?
            .normalized();

        let enrolled = self.enrolled.read().await;
        let nearest = enrolled
            .iter()
            .filter_map(|e| probe.distance(&e.descriptor).map(|d| (e, d)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match nearest {
            Some((entry, distance)) if distance <= self.threshold => {
                debug!("Nearest patient {} at {:.3}", entry.identity.id, distance);
                let mut identity = entry.identity.clone();
                identity.distance = Some(distance);
                Ok(LookupOutcome::Match(identity))
            }
            Some((_, distance)) => {
                debug!("Nearest enrollment at {:.3}, above threshold", distance);
                Ok(LookupOutcome::NotFound)
            }
            None => Ok(LookupOutcome::NotFound),
        }
    }
}

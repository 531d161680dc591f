//! The identify pipeline: decode, analyze, match, tally, annotate, save.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::annotate::{Annotator, UNKNOWN_LABEL};
use crate::matcher::MatchPolicy;
use crate::roster::{Decade, Roster};
use crate::tally::Tally;
use crate::types::{DetectedFace, PixelRect};
use image::{ImageReader, RgbImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("not a readable image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("failed to write annotated image {path}: {source}")]
    Save {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// A detected face and the name it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelledFace {
    pub rect: PixelRect,
    /// Roster index of the matched reference, `None` for unknown faces.
    pub reference: Option<usize>,
    pub label: String,
}

/// Outcome of labelling every face in one image.
#[derive(Debug, Clone)]
pub struct Identification {
    pub faces: Vec<LabelledFace>,
    pub tally: Tally,
}

/// Serializable result of one identify request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub faces: Vec<FaceReport>,
    pub identities: Vec<IdentityCount>,
    pub decades: Vec<DecadeCount>,
    pub wikipedia: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaceReport {
    pub label: String,
    #[serde(flatten)]
    pub rect: PixelRect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityCount {
    pub name: String,
    pub plural: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecadeCount {
    pub decade: Decade,
    pub count: u32,
}

/// Matches faces against a fixed roster and annotates the image.
///
/// Holds only immutable configuration; every call starts a fresh [`Tally`].
pub struct Identifier {
    roster: Roster,
    policy: MatchPolicy,
    threshold: f32,
    annotator: Annotator,
}

impl Identifier {
    pub fn new(roster: Roster, policy: MatchPolicy, threshold: f32, annotator: Annotator) -> Self {
        Self { roster, policy, threshold, annotator }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Label, count and draw every face, in the order given.
    ///
    /// A face within tolerance of several references takes the one chosen by
    /// the match policy (by default the lowest roster index). Unmatched faces
    /// are labelled "Unknown" and counted nowhere.
    pub fn label_faces(&self, faces: &[DetectedFace], image: &mut RgbImage) -> Identification {
        let mut tally = Tally::new(self.roster.len());
        let mut labelled = Vec::with_capacity(faces.len());

        for face in faces {
            let matched = self
                .policy
                .select(self.roster.encodings(), &face.embedding, self.threshold)
                .and_then(|idx| self.roster.get(idx).map(|reference| (idx, reference)));

            let label = match matched {
                Some((idx, reference)) => {
                    tally.record(idx, reference);
                    reference.name.clone()
                }
                None => UNKNOWN_LABEL.to_string(),
            };

            let rect = face.bbox.to_pixel_rect(image.width(), image.height());
            self.annotator.draw(image, rect, &label);

            labelled.push(LabelledFace {
                rect,
                reference: matched.map(|(idx, _)| idx),
                label,
            });
        }

        Identification { faces: labelled, tally }
    }

    /// Analyze `image` and label everything found in it.
    pub fn identify(
        &self,
        analyzer: &mut dyn FaceAnalyzer,
        image: &mut RgbImage,
    ) -> Result<Identification, AnalyzerError> {
        let faces = analyzer.analyze(image)?;
        let identification = self.label_faces(&faces, image);
        tracing::info!(
            faces = identification.faces.len(),
            matched = identification.tally.matched(),
            "identify complete"
        );
        Ok(identification)
    }

    /// Run the whole pipeline on a saved upload and write the annotated copy to `output`.
    pub fn identify_file(
        &self,
        analyzer: &mut dyn FaceAnalyzer,
        input: &Path,
        output: &Path,
    ) -> Result<Report, IdentifyError> {
        let mut image = load_rgb(input)?;
        let identification = self.identify(analyzer, &mut image)?;

        image.save(output).map_err(|source| IdentifyError::Save {
            path: output.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %output.display(), "annotated image written");

        Ok(self.report(&identification))
    }

    pub fn report(&self, identification: &Identification) -> Report {
        let tally = &identification.tally;
        Report {
            faces: identification
                .faces
                .iter()
                .map(|f| FaceReport { label: f.label.clone(), rect: f.rect })
                .collect(),
            identities: self
                .roster
                .references()
                .iter()
                .enumerate()
                .map(|(idx, r)| IdentityCount {
                    name: r.name.clone(),
                    plural: r.plural.clone(),
                    count: tally.identity(idx),
                })
                .collect(),
            decades: tally
                .decades()
                .iter()
                .map(|(decade, count)| DecadeCount { decade, count })
                .collect(),
            wikipedia: tally.wikipedia(),
        }
    }
}

/// Decode an image file, sniffing the format from its content, into 8-bit RGB.
///
/// Whatever the decoded layout (greyscale, alpha, 16-bit), the result is the
/// RGB buffer the annotator draws on.
pub fn load_rgb(path: &Path) -> Result<RgbImage, IdentifyError> {
    let read_err = |source| IdentifyError::Read {
        path: path.to_path_buf(),
        source,
    };
    let image = ImageReader::open(path)
        .map_err(read_err)?
        .with_guessed_format()
        .map_err(read_err)?
        .decode()
        .map_err(IdentifyError::Decode)?;
    Ok(image.to_rgb8())
}

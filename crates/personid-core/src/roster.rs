//! The ordered set of known reference people.
//!
//! A roster is described by [`RosterConfig`] (names, reference images, decade
//! and Wikipedia lookups) and turned into a [`Roster`] at startup by encoding
//! each reference image once. Roster order is match priority.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read roster file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid roster file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("roster has no references")]
    Empty,
    #[error("duplicate reference name: {0}")]
    DuplicateName(String),
    #[error("reference image {path} could not be loaded: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("no face found in reference image {0}")]
    NoFace(PathBuf),
    #[error("face analysis failed for reference image {path}: {source}")]
    Analyzer {
        path: PathBuf,
        source: AnalyzerError,
    },
}

/// One of the nine decade buckets, 1940s through 2020s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Decade {
    #[serde(rename = "1940s")]
    Forties,
    #[serde(rename = "1950s")]
    Fifties,
    #[serde(rename = "1960s")]
    Sixties,
    #[serde(rename = "1970s")]
    Seventies,
    #[serde(rename = "1980s")]
    Eighties,
    #[serde(rename = "1990s")]
    Nineties,
    #[serde(rename = "2000s")]
    Noughties,
    #[serde(rename = "2010s")]
    Tens,
    #[serde(rename = "2020s")]
    Twenties,
}

impl Decade {
    /// All buckets in display order.
    pub const ALL: [Decade; 9] = [
        Decade::Forties,
        Decade::Fifties,
        Decade::Sixties,
        Decade::Seventies,
        Decade::Eighties,
        Decade::Nineties,
        Decade::Noughties,
        Decade::Tens,
        Decade::Twenties,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Decade::Forties => "1940s",
            Decade::Fifties => "1950s",
            Decade::Sixties => "1960s",
            Decade::Seventies => "1970s",
            Decade::Eighties => "1980s",
            Decade::Nineties => "1990s",
            Decade::Noughties => "2000s",
            Decade::Tens => "2010s",
            Decade::Twenties => "2020s",
        }
    }

    /// Position in [`Decade::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Decade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Decade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decade::ALL
            .into_iter()
            .find(|d| d.label() == s.trim())
            .ok_or_else(|| format!("unknown decade {s:?} (expected 1940s..2020s)"))
    }
}

/// Static description of one reference person.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReferenceEntry {
    pub name: String,
    /// Plural used in the result view ("Number of Celebrities"); defaults to `name` + "s".
    pub plural: Option<String>,
    /// Reference photograph containing this person's face.
    pub image: PathBuf,
    pub decade: Option<Decade>,
    /// Whether this person has a Wikipedia article.
    #[serde(default)]
    pub wikipedia: bool,
}

impl ReferenceEntry {
    fn new(name: &str, plural: &str, image: &str, decade: Decade) -> Self {
        Self {
            name: name.to_string(),
            plural: Some(plural.to_string()),
            image: PathBuf::from(image),
            decade: Some(decade),
            wikipedia: true,
        }
    }
}

/// Roster definition, as read from a TOML file or the built-in default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RosterConfig {
    #[serde(rename = "reference")]
    pub references: Vec<ReferenceEntry>,
}

impl Default for RosterConfig {
    /// The four bundled references, with images relative to the working directory.
    fn default() -> Self {
        Self {
            references: vec![
                ReferenceEntry::new("Celebrity", "Celebrities", "celebrity.jpg", Decade::Eighties),
                ReferenceEntry::new("Billionaire", "Billionaires", "billionaire.jpg", Decade::Nineties),
                ReferenceEntry::new("Actor", "Actors", "actor.jpg", Decade::Noughties),
                ReferenceEntry::new("Musician", "Musicians", "musician.jpg", Decade::Tens),
            ],
        }
    }
}

impl RosterConfig {
    /// Load a roster file. Relative image paths are resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, RosterError> {
        let text = std::fs::read_to_string(path).map_err(|source| RosterError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: RosterConfig = toml::from_str(&text).map_err(|source| RosterError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            for entry in &mut config.references {
                if entry.image.is_relative() {
                    entry.image = base.join(&entry.image);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the roster is non-empty and names are unique.
    pub fn validate(&self) -> Result<(), RosterError> {
        if self.references.is_empty() {
            return Err(RosterError::Empty);
        }
        let mut seen = HashSet::new();
        for entry in &self.references {
            if !seen.insert(entry.name.as_str()) {
                return Err(RosterError::DuplicateName(entry.name.clone()));
            }
        }
        Ok(())
    }
}

/// A known person with everything needed to tally a match.
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    pub name: String,
    pub plural: String,
    pub decade: Option<Decade>,
    pub wikipedia: bool,
}

impl From<&ReferenceEntry> for Reference {
    fn from(entry: &ReferenceEntry) -> Self {
        Self {
            name: entry.name.clone(),
            plural: entry.plural.clone().unwrap_or_else(|| format!("{}s", entry.name)),
            decade: entry.decade,
            wikipedia: entry.wikipedia,
        }
    }
}

/// Immutable reference set: people and their encodings, in match-priority order.
#[derive(Debug, Clone)]
pub struct Roster {
    references: Vec<Reference>,
    encodings: Vec<Embedding>,
}

impl Roster {
    /// Encode every reference image with `analyzer`.
    ///
    /// Each image contributes exactly one encoding: its most confident face.
    /// Fails if any image is missing, undecodable, or has no detectable face.
    pub fn build(config: &RosterConfig, analyzer: &mut dyn FaceAnalyzer) -> Result<Self, RosterError> {
        config.validate()?;

        let mut entries = Vec::with_capacity(config.references.len());
        for entry in &config.references {
            let image = image::open(&entry.image)
                .map_err(|source| RosterError::Image {
                    path: entry.image.clone(),
                    source,
                })?
                .to_rgb8();

            let faces = analyzer.analyze(&image).map_err(|source| RosterError::Analyzer {
                path: entry.image.clone(),
                source,
            })?;
            let face = faces
                .into_iter()
                .next()
                .ok_or_else(|| RosterError::NoFace(entry.image.clone()))?;

            tracing::info!(
                name = %entry.name,
                image = %entry.image.display(),
                confidence = face.bbox.confidence,
                "reference encoded"
            );
            entries.push((Reference::from(entry), face.embedding));
        }

        Self::from_entries(entries)
    }

    /// Assemble a roster from already-computed encodings.
    pub fn from_entries(entries: Vec<(Reference, Embedding)>) -> Result<Self, RosterError> {
        if entries.is_empty() {
            return Err(RosterError::Empty);
        }
        let mut seen = HashSet::new();
        for (reference, _) in &entries {
            if !seen.insert(reference.name.clone()) {
                return Err(RosterError::DuplicateName(reference.name.clone()));
            }
        }
        let (references, encodings) = entries.into_iter().unzip();
        Ok(Self { references, encodings })
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn encodings(&self) -> &[Embedding] {
        &self.encodings
    }

    pub fn get(&self, idx: usize) -> Option<&Reference> {
        self.references.get(idx)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.references.iter().map(|r| r.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::StaticAnalyzer;
    use crate::types::{BoundingBox, DetectedFace};
    use image::{Rgb, RgbImage};

    fn face(values: &[f32]) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x: 1.0, y: 1.0, width: 4.0, height: 4.0, confidence: 0.9, landmarks: None,
            },
            embedding: Embedding::new(values.to_vec()),
        }
    }

    fn write_image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(8, 8, Rgb([90, 90, 90])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_decade_labels_cover_1940s_to_2020s() {
        let labels: Vec<&str> = Decade::ALL.iter().map(|d| d.label()).collect();
        assert_eq!(
            labels,
            ["1940s", "1950s", "1960s", "1970s", "1980s", "1990s", "2000s", "2010s", "2020s"]
        );
        for (i, d) in Decade::ALL.iter().enumerate() {
            assert_eq!(d.index(), i);
            assert_eq!(d.label().parse::<Decade>(), Ok(*d));
        }
        assert!("1930s".parse::<Decade>().is_err());
    }

    #[test]
    fn test_default_roster() {
        let config = RosterConfig::default();
        let names: Vec<&str> = config.references.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Celebrity", "Billionaire", "Actor", "Musician"]);
        let decades: Vec<Option<Decade>> = config.references.iter().map(|r| r.decade).collect();
        assert_eq!(
            decades,
            [Some(Decade::Eighties), Some(Decade::Nineties), Some(Decade::Noughties), Some(Decade::Tens)]
        );
        assert!(config.references.iter().all(|r| r.wikipedia));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_roster_file_resolves_relative_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.toml");
        std::fs::write(
            &path,
            r#"
[[reference]]
name = "Poet"
image = "poet.jpg"
decade = "1950s"
wikipedia = true

[[reference]]
name = "Neighbour"
image = "/abs/neighbour.png"
"#,
        )
        .unwrap();

        let config = RosterConfig::from_file(&path).unwrap();
        assert_eq!(config.references.len(), 2);
        assert_eq!(config.references[0].image, dir.path().join("poet.jpg"));
        assert_eq!(config.references[0].decade, Some(Decade::Fifties));
        assert_eq!(config.references[1].image, PathBuf::from("/abs/neighbour.png"));
        assert_eq!(config.references[1].decade, None);
        assert!(!config.references[1].wikipedia);
        assert_eq!(Reference::from(&config.references[1]).plural, "Neighbours");
    }

    #[test]
    fn test_roster_file_rejects_unknown_decade() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.toml");
        std::fs::write(&path, "[[reference]]\nname = \"A\"\nimage = \"a.jpg\"\ndecade = \"1930s\"\n").unwrap();
        assert!(matches!(RosterConfig::from_file(&path), Err(RosterError::Parse { .. })));
    }

    #[test]
    fn test_roster_config_rejects_duplicates_and_empty() {
        let mut config = RosterConfig::default();
        config.references[1].name = "Celebrity".into();
        assert!(matches!(config.validate(), Err(RosterError::DuplicateName(n)) if n == "Celebrity"));

        let empty = RosterConfig { references: vec![] };
        assert!(matches!(empty.validate(), Err(RosterError::Empty)));
    }

    #[test]
    fn test_build_takes_first_face_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_image(dir.path(), "a.png");
        let b = write_image(dir.path(), "b.png");
        let config = RosterConfig {
            references: vec![
                ReferenceEntry { name: "A".into(), plural: None, image: a, decade: None, wikipedia: false },
                ReferenceEntry { name: "B".into(), plural: None, image: b, decade: Some(Decade::Twenties), wikipedia: true },
            ],
        };

        let mut analyzer = StaticAnalyzer::new(vec![
            vec![face(&[1.0, 0.0]), face(&[0.0, 1.0])],
            vec![face(&[0.0, 1.0])],
        ]);
        let roster = Roster::build(&config, &mut analyzer).unwrap();

        assert_eq!(roster.names(), ["A", "B"]);
        assert_eq!(roster.encodings()[0].values, vec![1.0, 0.0]);
        assert_eq!(roster.encodings()[1].values, vec![0.0, 1.0]);
        assert_eq!(roster.get(1).unwrap().decade, Some(Decade::Twenties));
    }

    #[test]
    fn test_build_fails_on_faceless_reference() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_image(dir.path(), "a.png");
        let config = RosterConfig {
            references: vec![ReferenceEntry { name: "A".into(), plural: None, image: a.clone(), decade: None, wikipedia: false }],
        };
        let mut analyzer = StaticAnalyzer::new(vec![vec![]]);
        assert!(matches!(Roster::build(&config, &mut analyzer), Err(RosterError::NoFace(p)) if p == a));
    }

    #[test]
    fn test_build_fails_on_missing_reference_image() {
        let dir = tempfile::tempdir().unwrap();
        let config = RosterConfig {
            references: vec![ReferenceEntry {
                name: "A".into(), plural: None, image: dir.path().join("missing.jpg"), decade: None, wikipedia: false,
            }],
        };
        let mut analyzer = StaticAnalyzer::new(vec![vec![face(&[1.0])]]);
        assert!(matches!(Roster::build(&config, &mut analyzer), Err(RosterError::Image { .. })));
    }
}

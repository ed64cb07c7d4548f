//! Animation clip data model and the clip library.
//!
//! Clips are authored as keyframes (time + parameter values) and compiled on
//! load into one sparse track per parameter, so sampling only touches the
//! parameters a clip actually animates.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Linear,
    Eased,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipKind {
    /// Sets base pose values.
    Primary,
    /// Values are deltas added on top of the base.
    Differential,
}

/// A keyframe. `interpolation` governs the segment leaving this key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Seconds from clip start.
    #[serde(alias = "time_offset")]
    pub time: f32,
    pub values: BTreeMap<String, f32>,
    #[serde(default)]
    pub interpolation: Interpolation,
}

impl Keyframe {
    pub fn new(time: f32, values: &[(&str, f32)]) -> Self {
        Self {
            time,
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            interpolation: Interpolation::Linear,
        }
    }

    pub fn eased(mut self) -> Self {
        self.interpolation = Interpolation::Eased;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackPoint {
    pub time: f32,
    pub value: f32,
    pub interpolation: Interpolation,
}

/// All keyed values of a single parameter within a clip, ordered by time.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub param: String,
    pub points: Vec<TrackPoint>,
}

/// Serialized clip shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ClipDoc {
    name: String,
    kind: ClipKind,
    #[serde(default, rename = "loop")]
    looping: bool,
    /// Seconds.
    duration: f32,
    keyframes: Vec<Keyframe>,
}

/// Immutable, validated animation clip.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationClip {
    name: String,
    kind: ClipKind,
    looping: bool,
    duration: f32,
    keyframes: Vec<Keyframe>,
    tracks: Vec<Track>,
}

impl AnimationClip {
    pub fn new(
        name: impl Into<String>,
        kind: ClipKind,
        looping: bool,
        duration: f32,
        keyframes: Vec<Keyframe>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ControlError::validation("clip name must not be empty"));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(ControlError::validation(format!(
                "clip '{name}' duration must be > 0 (got {duration})"
            )));
        }
        let mut last = f32::NEG_INFINITY;
        for kf in &keyframes {
            if !kf.time.is_finite() || kf.time < 0.0 || kf.time > duration {
                return Err(ControlError::validation(format!(
                    "clip '{name}' keyframe at {} lies outside [0, {duration}]",
                    kf.time
                )));
            }
            if kf.time <= last {
                return Err(ControlError::validation(format!(
                    "clip '{name}' keyframe times must be strictly increasing"
                )));
            }
            last = kf.time;
            if let Some((p, v)) = kf.values.iter().find(|(_, v)| !v.is_finite()) {
                return Err(ControlError::validation(format!(
                    "clip '{name}' has non-finite value {v} for '{p}'"
                )));
            }
        }

        let mut by_param: BTreeMap<&str, Vec<TrackPoint>> = BTreeMap::new();
        for kf in &keyframes {
            for (param, value) in &kf.values {
                by_param.entry(param.as_str()).or_default().push(TrackPoint {
                    time: kf.time,
                    value: *value,
                    interpolation: kf.interpolation,
                });
            }
        }
        let tracks = by_param
            .into_iter()
            .map(|(param, points)| Track {
                param: param.to_string(),
                points,
            })
            .collect();

        Ok(Self {
            name,
            kind,
            looping,
            duration,
            keyframes,
            tracks,
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let doc: ClipDoc = serde_json::from_str(s)?;
        Self::from_doc(doc)
    }

    fn from_doc(doc: ClipDoc) -> Result<Self> {
        Self::new(doc.name, doc.kind, doc.looping, doc.duration, doc.keyframes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ClipKind {
        self.kind
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Names of every parameter this clip touches.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.tracks.iter().map(|t| t.param.as_str())
    }
}

/// Named clips shared with the mixer via `Arc`.
#[derive(Clone, Debug, Default)]
pub struct ClipLibrary {
    clips: HashMap<String, Arc<AnimationClip>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LibraryDoc {
    List(Vec<ClipDoc>),
    Wrapped { clips: Vec<ClipDoc> },
}

impl ClipLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse either a bare array of clips or `{ "clips": [...] }`.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let docs = match serde_json::from_str::<LibraryDoc>(s)? {
            LibraryDoc::List(v) | LibraryDoc::Wrapped { clips: v } => v,
        };
        let mut lib = Self::new();
        for doc in docs {
            lib.insert(AnimationClip::from_doc(doc)?)?;
        }
        Ok(lib)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Add a clip. Names are unique within a library.
    pub fn insert(&mut self, clip: AnimationClip) -> Result<Arc<AnimationClip>> {
        if self.clips.contains_key(clip.name()) {
            return Err(ControlError::validation(format!(
                "duplicate clip name '{}'",
                clip.name()
            )));
        }
        let clip = Arc::new(clip);
        self.clips.insert(clip.name().to_string(), Arc::clone(&clip));
        Ok(clip)
    }

    pub fn get(&self, name: &str) -> Result<Arc<AnimationClip>> {
        self.clips
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::not_found("clip", name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clips.contains_key(name)
    }

    /// Clip names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clips.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_sparse_tracks() {
        let clip = AnimationClip::new(
            "wave",
            ClipKind::Primary,
            false,
            1.0,
            vec![
                Keyframe::new(0.0, &[("a", 0.0), ("b", 1.0)]),
                Keyframe::new(0.5, &[("a", 1.0)]).eased(),
                Keyframe::new(1.0, &[("a", 0.0), ("b", 0.0)]),
            ],
        )
        .unwrap();
        let names: Vec<&str> = clip.params().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(clip.tracks()[0].points.len(), 3);
        assert_eq!(clip.tracks()[1].points.len(), 2);
        assert_eq!(clip.tracks()[0].points[1].interpolation, Interpolation::Eased);
    }

    #[test]
    fn rejects_bad_timing() {
        let dup = vec![Keyframe::new(0.2, &[]), Keyframe::new(0.2, &[])];
        assert!(AnimationClip::new("x", ClipKind::Primary, false, 1.0, dup).is_err());
        let late = vec![Keyframe::new(2.0, &[])];
        assert!(AnimationClip::new("x", ClipKind::Primary, false, 1.0, late).is_err());
        assert!(AnimationClip::new("x", ClipKind::Primary, false, 0.0, vec![]).is_err());
    }

    #[test]
    fn library_parses_both_shapes() {
        let one = r#"[{ "name": "idle", "kind": "primary", "loop": true, "duration": 2,
                        "keyframes": [{ "time": 0, "values": { "a": 0 } }] }]"#;
        let lib = ClipLibrary::from_json_str(one).unwrap();
        assert!(lib.get("idle").unwrap().is_looping());

        let wrapped = r#"{ "clips": [{ "name": "smile", "kind": "differential", "duration": 1,
                          "keyframes": [{ "time_offset": 0.5, "values": { "m": 0.2 },
                                          "interpolation": "eased" }] }] }"#;
        let lib = ClipLibrary::from_json_str(wrapped).unwrap();
        assert_eq!(lib.get("smile").unwrap().kind(), ClipKind::Differential);
        assert!(matches!(
            lib.get("nope"),
            Err(ControlError::NotFound { .. })
        ));
    }
}

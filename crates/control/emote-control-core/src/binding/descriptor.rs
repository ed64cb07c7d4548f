//! Parameter descriptors, categories and semantic roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// Coarse grouping of a model parameter.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    #[default]
    Pose,
    Expression,
    Physics,
    Meta,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pose => "pose",
            Category::Expression => "expression",
            Category::Physics => "physics",
            Category::Meta => "meta",
        }
    }
}

/// Semantic tag bound to at most one parameter per model.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    HeadLr,
    HeadUd,
    BodyLr,
    BodyUd,
    EyeLr,
    EyeUd,
    EyeOpen,
    EyeBlinkLeft,
    EyeBlinkRight,
    MouthOpen,
    MouthForm,
}

impl Role {
    pub const ALL: [Role; 11] = [
        Role::HeadLr,
        Role::HeadUd,
        Role::BodyLr,
        Role::BodyUd,
        Role::EyeLr,
        Role::EyeUd,
        Role::EyeOpen,
        Role::EyeBlinkLeft,
        Role::EyeBlinkRight,
        Role::MouthOpen,
        Role::MouthForm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::HeadLr => "head-lr",
            Role::HeadUd => "head-ud",
            Role::BodyLr => "body-lr",
            Role::BodyUd => "body-ud",
            Role::EyeLr => "eye-lr",
            Role::EyeUd => "eye-ud",
            Role::EyeOpen => "eye-open",
            Role::EyeBlinkLeft => "eye-blink-left",
            Role::EyeBlinkRight => "eye-blink-right",
            Role::MouthOpen => "mouth-open",
            Role::MouthForm => "mouth-form",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == norm)
            .ok_or_else(|| ControlError::not_found("role", s))
    }
}

/// A labelled position on a parameter's range (e.g. "smile" at 1.0).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameLabel {
    pub value: f32,
    pub label: String,
}

/// One entry of the flat parameter list handed over by the model unpacker.
///
/// Field aliases accept the unpacker's native key names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawParameter {
    #[serde(alias = "label")]
    pub name: String,
    #[serde(default)]
    pub default: f32,
    #[serde(alias = "minValue")]
    pub min: f32,
    #[serde(alias = "maxValue")]
    pub max: f32,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default, alias = "frameList")]
    pub frames: Vec<FrameLabel>,
}

impl RawParameter {
    pub fn new(name: impl Into<String>, default: f32, min: f32, max: f32) -> Self {
        Self {
            name: name.into(),
            default,
            min,
            max,
            role: None,
            category: None,
            frames: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
}

/// Immutable, validated description of one controllable parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    #[serde(default)]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// A constant parameter has `min == max`.
    #[serde(default)]
    pub constant: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<FrameLabel>,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, min: f32, max: f32, default: f32) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            default,
            category: Category::Pose,
            role: None,
            constant: false,
            frames: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Check range and default invariants.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ControlError::validation("parameter name must not be empty"));
        }
        if !(self.min.is_finite() && self.max.is_finite() && self.default.is_finite()) {
            return Err(ControlError::validation(format!(
                "'{}' has non-finite range or default",
                self.name
            )));
        }
        if self.constant {
            if self.min != self.max {
                return Err(ControlError::validation(format!(
                    "constant parameter '{}' must have min == max",
                    self.name
                )));
            }
        } else if self.min >= self.max {
            return Err(ControlError::validation(format!(
                "'{}' needs min < max (got {} >= {})",
                self.name, self.min, self.max
            )));
        }
        if self.default < self.min || self.default > self.max {
            return Err(ControlError::validation(format!(
                "default {} of '{}' lies outside [{}, {}]",
                self.default, self.name, self.min, self.max
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn clamp(&self, v: f32) -> f32 {
        v.clamp(self.min, self.max)
    }

    #[inline]
    pub fn span(&self) -> f32 {
        self.max - self.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_from_either_spelling() {
        assert_eq!("mouth-open".parse::<Role>().unwrap(), Role::MouthOpen);
        assert_eq!("MOUTH_OPEN".parse::<Role>().unwrap(), Role::MouthOpen);
        assert!("tail-wag".parse::<Role>().is_err());
    }

    #[test]
    fn descriptor_validation() {
        assert!(ParameterDescriptor::new("a", 0.0, 1.0, 0.5).validate().is_ok());
        assert!(ParameterDescriptor::new("a", 1.0, 1.0, 1.0).validate().is_err());
        let mut c = ParameterDescriptor::new("a", 1.0, 1.0, 1.0);
        c.constant = true;
        assert!(c.validate().is_ok());
        assert!(ParameterDescriptor::new("a", 0.0, 1.0, 2.0).validate().is_err());
    }

    #[test]
    fn raw_accepts_unpacker_keys() {
        let raw: RawParameter = serde_json::from_str(
            r#"{ "label": "head_LR", "minValue": -30, "maxValue": 30,
                 "frameList": [{ "value": 0, "label": "center" }] }"#,
        )
        .unwrap();
        assert_eq!(raw.name, "head_LR");
        assert_eq!(raw.min, -30.0);
        assert_eq!(raw.frames.len(), 1);
        assert_eq!(raw.default, 0.0);
    }
}

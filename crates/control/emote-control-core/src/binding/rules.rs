//! Keyword rules that classify raw parameter names.
//!
//! Rules are tried in order and the first rule with a keyword contained in the
//! lowercased parameter name wins, so specific rules must precede broad ones.

use serde::{Deserialize, Serialize};

use super::descriptor::{Category, Role};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticRule {
    pub keywords: Vec<String>,
    pub category: Category,
    #[serde(default)]
    pub role: Option<Role>,
}

impl SemanticRule {
    pub fn new(keywords: &[&str], category: Category, role: Option<Role>) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            category,
            role,
        }
    }

    pub fn matches(&self, name_lower: &str) -> bool {
        self.keywords
            .iter()
            .any(|kw| !kw.is_empty() && name_lower.contains(kw.to_lowercase().as_str()))
    }
}

/// First rule matching `name`, if any.
pub fn classify<'a>(rules: &'a [SemanticRule], name: &str) -> Option<&'a SemanticRule> {
    let lower = name.to_lowercase();
    rules.iter().find(|r| r.matches(&lower))
}

/// Built-in rule set used when the config does not provide one.
pub fn default_rules() -> Vec<SemanticRule> {
    use Category::*;
    vec![
        SemanticRule::new(
            &["mouth_open", "mouthopen", "mouth_o", "lip_open"],
            Expression,
            Some(Role::MouthOpen),
        ),
        SemanticRule::new(
            &["mouth_form", "mouthform", "mouth_shape"],
            Expression,
            Some(Role::MouthForm),
        ),
        SemanticRule::new(
            &["eye_blink_l", "blink_l", "eye_l_open"],
            Expression,
            Some(Role::EyeBlinkLeft),
        ),
        SemanticRule::new(
            &["eye_blink_r", "blink_r", "eye_r_open"],
            Expression,
            Some(Role::EyeBlinkRight),
        ),
        SemanticRule::new(&["eye_open", "eyeopen", "blink"], Expression, Some(Role::EyeOpen)),
        SemanticRule::new(&["eye_lr", "eye_x", "eyeball_x"], Pose, Some(Role::EyeLr)),
        SemanticRule::new(&["eye_ud", "eye_y", "eyeball_y"], Pose, Some(Role::EyeUd)),
        SemanticRule::new(&["head_lr", "head_x", "angle_x"], Pose, Some(Role::HeadLr)),
        SemanticRule::new(&["head_ud", "head_y", "angle_y"], Pose, Some(Role::HeadUd)),
        SemanticRule::new(&["body_lr", "body_x"], Pose, Some(Role::BodyLr)),
        SemanticRule::new(&["body_ud", "body_y"], Pose, Some(Role::BodyUd)),
        SemanticRule::new(
            &["hair", "phys", "sway", "skirt", "ribbon", "bust", "breast", "accessory"],
            Physics,
            None,
        ),
        SemanticRule::new(
            &["brow", "cheek", "blush", "tear", "face", "mouth", "eye"],
            Expression,
            None,
        ),
        SemanticRule::new(&["meta", "debug", "ctrl"], Meta, None),
    ]
}

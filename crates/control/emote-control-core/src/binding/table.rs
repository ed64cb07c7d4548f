//! BindingTable: validated name → descriptor lookup plus role → name index.
//!
//! Tables are values. `edit` and `reassign_role` return a new table and leave
//! the receiver untouched, so a failed edit can never corrupt shared state.

use hashbrown::HashMap;
use log::{debug, warn};

use super::cache::content_hash;
use super::descriptor::{Category, ParameterDescriptor, RawParameter, Role};
use super::rules::{classify, SemanticRule};
use crate::error::{ControlError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct BindingTable {
    model_id: String,
    content_hash: String,
    params: Vec<ParameterDescriptor>,
    index: HashMap<String, usize>,
    roles: HashMap<Role, String>,
}

impl BindingTable {
    /// Derive a table from the unpacker's raw parameter list.
    pub fn derive(model_id: &str, raw: &[RawParameter], rules: &[SemanticRule]) -> Result<Self> {
        let mut params = Vec::with_capacity(raw.len());
        let mut claimed: HashMap<Role, String> = HashMap::new();

        for rp in raw {
            let rule = classify(rules, &rp.name);
            let category = rp
                .category
                .or_else(|| rule.map(|r| r.category))
                .unwrap_or_default();
            let mut role = rp.role.or_else(|| rule.and_then(|r| r.role));
            if let Some(r) = role {
                if let Some(holder) = claimed.get(&r) {
                    warn!(
                        "role {r} already bound to '{holder}', leaving '{}' unbound",
                        rp.name
                    );
                    role = None;
                } else {
                    claimed.insert(r, rp.name.clone());
                }
            }

            if !(rp.min.is_finite() && rp.max.is_finite() && rp.default.is_finite()) {
                return Err(ControlError::validation(format!(
                    "'{}' has non-finite range or default",
                    rp.name
                )));
            }
            if rp.min > rp.max {
                return Err(ControlError::validation(format!(
                    "'{}' has min {} > max {}",
                    rp.name, rp.min, rp.max
                )));
            }
            let constant = rp.min == rp.max;

            params.push(ParameterDescriptor {
                name: rp.name.clone(),
                min: rp.min,
                max: rp.max,
                default: rp.default.clamp(rp.min, rp.max),
                category,
                role,
                constant,
                frames: rp.frames.clone(),
            });
        }

        let table = Self::build(model_id, content_hash(raw), params)?;
        debug!(
            "derived {} bindings for '{model_id}' ({} roles)",
            table.len(),
            table.roles.len()
        );
        Ok(table)
    }

    /// Rebuild a table from stored descriptors, re-checking every invariant.
    pub fn from_descriptors(
        model_id: &str,
        content_hash: &str,
        params: Vec<ParameterDescriptor>,
    ) -> Result<Self> {
        Self::build(model_id, content_hash.to_string(), params)
    }

    fn build(model_id: &str, content_hash: String, params: Vec<ParameterDescriptor>) -> Result<Self> {
        let mut index = HashMap::with_capacity(params.len());
        let mut roles = HashMap::new();
        for (i, p) in params.iter().enumerate() {
            p.validate()?;
            if index.insert(p.name.clone(), i).is_some() {
                return Err(ControlError::validation(format!(
                    "duplicate parameter name '{}'",
                    p.name
                )));
            }
            if let Some(role) = p.role {
                if let Some(prev) = roles.insert(role, p.name.clone()) {
                    return Err(ControlError::validation(format!(
                        "role {role} claimed by both '{prev}' and '{}'",
                        p.name
                    )));
                }
            }
        }
        Ok(Self {
            model_id: model_id.to_string(),
            content_hash,
            params,
            index,
            roles,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Hash of the raw parameter list this table was derived from.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Descriptors in model order.
    pub fn iter(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.params.iter()
    }

    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        &self.params
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &ParameterDescriptor> {
        self.params.iter().filter(move |p| p.category == category)
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.index.get(name).map(|&i| &self.params[i])
    }

    /// Lookup that fails with `NotFound` instead of returning `None`.
    pub fn descriptor(&self, name: &str) -> Result<&ParameterDescriptor> {
        self.get(name)
            .ok_or_else(|| ControlError::not_found("parameter", name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Parameter bound to `role`, or `None` when the model lacks it.
    pub fn resolve_role(&self, role: Role) -> Option<&str> {
        self.roles.get(&role).map(String::as_str)
    }

    pub fn role_descriptor(&self, role: Role) -> Option<&ParameterDescriptor> {
        self.resolve_role(role).and_then(|n| self.get(n))
    }

    pub fn roles(&self) -> impl Iterator<Item = (Role, &str)> {
        self.roles.iter().map(|(r, n)| (*r, n.as_str()))
    }

    pub fn defaults(&self) -> HashMap<String, f32> {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.default))
            .collect()
    }

    /// Replace the descriptor for `name`, returning the updated table.
    ///
    /// A role held by another parameter is never taken over silently; use
    /// [`reassign_role`](Self::reassign_role) for that.
    pub fn edit(&self, name: &str, descriptor: ParameterDescriptor) -> Result<Self> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| ControlError::not_found("parameter", name))?;
        if descriptor.name != name {
            return Err(ControlError::validation(format!(
                "descriptor name '{}' does not match '{name}'",
                descriptor.name
            )));
        }
        descriptor.validate()?;
        if let Some(role) = descriptor.role {
            if let Some(holder) = self.roles.get(&role) {
                if holder != name {
                    return Err(ControlError::validation(format!(
                        "role {role} is already bound to '{holder}'"
                    )));
                }
            }
        }

        let mut params = self.params.clone();
        params[idx] = descriptor;
        Self::build(&self.model_id, self.content_hash.clone(), params)
    }

    /// Move `role` to `name`, unbinding it from its previous holder.
    pub fn reassign_role(&self, role: Role, name: &str) -> Result<Self> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| ControlError::not_found("parameter", name))?;
        let mut params = self.params.clone();
        if let Some(prev) = self.roles.get(&role) {
            if let Some(&pi) = self.index.get(prev) {
                params[pi].role = None;
            }
        }
        params[idx].role = Some(role);
        Self::build(&self.model_id, self.content_hash.clone(), params)
    }

    /// Overlay user edits from `stored` on top of this (freshly derived) table.
    ///
    /// Only descriptors whose names exist here are taken; the caller checks
    /// structural compatibility first.
    pub(crate) fn overlay(&self, stored: &[ParameterDescriptor]) -> Result<Self> {
        let mut params = self.params.clone();
        for sd in stored {
            if let Some(&i) = self.index.get(&sd.name) {
                params[i] = sd.clone();
            }
        }
        Self::build(&self.model_id, self.content_hash.clone(), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::rules::default_rules;

    fn raw() -> Vec<RawParameter> {
        vec![
            RawParameter::new("head_LR", 0.0, -30.0, 30.0),
            RawParameter::new("mouth_open", 0.0, 0.0, 1.0),
            RawParameter::new("lip_open_alt", 0.0, 0.0, 1.0),
            RawParameter::new("hair_front", 0.0, -1.0, 1.0),
            RawParameter::new("fixed", 2.0, 2.0, 2.0),
        ]
    }

    #[test]
    fn derive_applies_rules_and_keeps_roles_unique() {
        let t = BindingTable::derive("m", &raw(), &default_rules()).unwrap();
        assert_eq!(t.resolve_role(Role::HeadLr), Some("head_LR"));
        assert_eq!(t.resolve_role(Role::MouthOpen), Some("mouth_open"));
        assert_eq!(t.get("lip_open_alt").unwrap().role, None);
        assert_eq!(t.get("hair_front").unwrap().category, Category::Physics);
        assert!(t.get("fixed").unwrap().constant);
        assert_eq!(t.resolve_role(Role::BodyLr), None);
    }

    #[test]
    fn raw_hints_beat_rules() {
        let raw = vec![RawParameter::new("smile", 0.0, 0.0, 1.0)
            .with_role(Role::MouthForm)
            .with_category(Category::Expression)];
        let t = BindingTable::derive("m", &raw, &default_rules()).unwrap();
        assert_eq!(t.resolve_role(Role::MouthForm), Some("smile"));
    }

    #[test]
    fn derive_rejects_inverted_ranges_and_duplicates() {
        let bad = vec![RawParameter::new("a", 0.0, 1.0, -1.0)];
        assert!(matches!(
            BindingTable::derive("m", &bad, &[]),
            Err(ControlError::Validation(_))
        ));
        let dup = vec![
            RawParameter::new("a", 0.0, 0.0, 1.0),
            RawParameter::new("a", 0.0, 0.0, 1.0),
        ];
        assert!(BindingTable::derive("m", &dup, &[]).is_err());
    }

    #[test]
    fn edit_rejects_role_conflict_and_keeps_table() {
        let t = BindingTable::derive("m", &raw(), &default_rules()).unwrap();
        let mut d = t.get("lip_open_alt").unwrap().clone();
        d.role = Some(Role::MouthOpen);
        let err = t.edit("lip_open_alt", d).unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));
        assert_eq!(t.resolve_role(Role::MouthOpen), Some("mouth_open"));
    }

    #[test]
    fn edit_rejects_empty_range() {
        let t = BindingTable::derive("m", &raw(), &default_rules()).unwrap();
        let mut d = t.get("head_LR").unwrap().clone();
        d.min = 10.0;
        d.max = 10.0;
        d.default = 10.0;
        assert!(matches!(
            t.edit("head_LR", d),
            Err(ControlError::Validation(_))
        ));
        assert!(matches!(
            t.edit("nope", ParameterDescriptor::new("nope", 0.0, 1.0, 0.0)),
            Err(ControlError::NotFound { .. })
        ));
    }

    #[test]
    fn reassign_moves_role() {
        let t = BindingTable::derive("m", &raw(), &default_rules()).unwrap();
        let t2 = t.reassign_role(Role::MouthOpen, "lip_open_alt").unwrap();
        assert_eq!(t2.resolve_role(Role::MouthOpen), Some("lip_open_alt"));
        assert_eq!(t2.get("mouth_open").unwrap().role, None);
        assert_eq!(t.resolve_role(Role::MouthOpen), Some("mouth_open"));
    }
}

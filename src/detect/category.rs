use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Bucket for detector labels that are not part of the configured category set.
pub const UNMAPPED_CATEGORY: &str = "unmapped";

/// What to do with a detection whose label is not in the configured set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedPolicy {
    /// Count it under [`UNMAPPED_CATEGORY`].
    #[default]
    Bucket,
    /// Skip it and log a warning.
    Drop,
}

/// One counted category with its human-readable name and detector aliases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CategorySpec {
    pub fn new(name: &str, display_name: &str, aliases: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            display_name: Some(display_name.to_string()),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Configured category set.
///
/// Resolves raw detector labels (`person`, `bike`, ...) to canonical category
/// names. Matching is case-insensitive. An empty map accepts every label as-is.
#[derive(Clone, Debug, Default)]
pub struct CategoryMap {
    specs: Vec<CategorySpec>,
    lookup: HashMap<String, usize>,
}

impl CategoryMap {
    pub fn new(mut specs: Vec<CategorySpec>) -> Result<Self> {
        for spec in &mut specs {
            spec.name = spec.name.trim().to_string();
            for alias in &mut spec.aliases {
                *alias = alias.trim().to_string();
            }
        }
        let mut lookup = HashMap::new();
        for (idx, spec) in specs.iter().enumerate() {
            let name = spec.name.as_str();
            if name.is_empty() {
                return Err(anyhow!("category name must not be empty"));
            }
            if name.eq_ignore_ascii_case(UNMAPPED_CATEGORY) {
                return Err(anyhow!("category name '{}' is reserved", UNMAPPED_CATEGORY));
            }
            for label in std::iter::once(name).chain(spec.aliases.iter().map(String::as_str)) {
                if label.is_empty() {
                    continue;
                }
                if let Some(prev) = lookup.insert(label.to_lowercase(), idx) {
                    if prev != idx {
                        return Err(anyhow!(
                            "label '{}' maps to both '{}' and '{}'",
                            label,
                            specs[prev].name,
                            spec.name
                        ));
                    }
                }
            }
        }
        Ok(Self { specs, lookup })
    }

    /// Map that accepts any label unchanged.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Pedestrian and personal-mobility categories with common COCO-style aliases.
    pub fn default_set() -> Self {
        let specs = default_specs();
        let lookup = specs
            .iter()
            .enumerate()
            .flat_map(|(idx, spec)| {
                std::iter::once(spec.name.to_lowercase())
                    .chain(spec.aliases.iter().map(|a| a.to_lowercase()))
                    .map(move |label| (label, idx))
            })
            .collect();
        Self { specs, lookup }
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Canonical name for a raw label, or `None` when the label is not configured.
    /// A permissive map returns the label itself.
    pub fn resolve<'a>(&'a self, label: &'a str) -> Option<&'a str> {
        if self.is_empty() {
            return Some(label.trim());
        }
        self.lookup
            .get(&label.trim().to_lowercase())
            .map(|&idx| self.specs[idx].name.as_str())
    }

    /// Human-readable name, falling back to the canonical name.
    pub fn display_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.specs
            .iter()
            .find(|spec| spec.name == name)
            .and_then(|spec| spec.display_name.as_deref())
            .unwrap_or(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|spec| spec.name.as_str())
    }

    pub fn specs(&self) -> &[CategorySpec] {
        &self.specs
    }
}

pub fn default_specs() -> Vec<CategorySpec> {
    vec![
        CategorySpec::new("adult", "Adults", &["person", "pedestrian"]),
        CategorySpec::new("child", "Children", &["children"]),
        CategorySpec::new("bicycle", "Bicycles", &["bike"]),
        CategorySpec::new("wheelchair", "Wheelchairs", &[]),
        CategorySpec::new(
            "reduced_mobility",
            "Reduced mobility",
            &["mobility aid", "walker", "crutches"],
        ),
    ]
}

//! Extraction templates and the ordered template catalog.
//!
//! A template pairs a subject-line trigger pattern with a set of per-field
//! extraction patterns. Definitions are loaded from JSON or TOML files, compiled
//! once, and validated up front: a template that lacks one of the reserved
//! patterns never reaches the extractor.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{TemplateError, TemplateResult};

/// Literal classification label, not a pattern.
pub const FIELD_TRIGGER: &str = "trigger";
/// Pattern collecting every image link in the message.
pub const FIELD_IMAGE_URLS: &str = "image_urls";
/// Four-group pattern: street, city, state, zip.
pub const FIELD_COMPLETE_ADDRESS: &str = "complete_address";
/// Pattern whose whole match is the listing URL.
pub const FIELD_LISTING_URL: &str = "listing_url";

/// Field names with bespoke handling in the extractor.
pub const RESERVED_FIELDS: &[&str] = &[
    FIELD_TRIGGER,
    FIELD_IMAGE_URLS,
    FIELD_COMPLETE_ADDRESS,
    FIELD_LISTING_URL,
];

/// Priority assigned to templates that do not declare one.
pub const DEFAULT_PRIORITY: i32 = 100;

// ── TemplateDef ─────────────────────────────────────────────────────────

/// On-disk template definition, before compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDef {
    pub name: String,
    pub trigger_pattern: String,
    /// Lower values are tried first when classifying a subject.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Field name → pattern. `trigger` holds the literal label.
    pub patterns: BTreeMap<String, String>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl TemplateDef {
    /// Parse a definition from JSON text.
    pub fn from_json(text: &str, origin: &str) -> TemplateResult<Self> {
        serde_json::from_str(text).map_err(|e| TemplateError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Parse a definition from TOML text.
    pub fn from_toml(text: &str, origin: &str) -> TemplateResult<Self> {
        toml::from_str(text).map_err(|e| TemplateError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }
}

// ── Template ────────────────────────────────────────────────────────────

/// A compiled, validated extraction template.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    priority: i32,
    trigger_label: String,
    trigger_pattern: Regex,
    fields: Vec<(String, Regex)>,
    complete_address: Regex,
    listing_url: Regex,
    image_urls: Regex,
}

impl Template {
    /// Compile and validate a definition.
    ///
    /// Fails if a reserved pattern is missing, a pattern does not compile, or
    /// a pattern declares too few capture groups for the way it is read.
    pub fn compile(def: &TemplateDef) -> TemplateResult<Self> {
        let name = def.name.clone();

        let trigger_label = def
            .patterns
            .get(FIELD_TRIGGER)
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .ok_or_else(|| TemplateError::MissingField {
                template: name.clone(),
                field: FIELD_TRIGGER.to_string(),
            })?;

        let trigger_pattern = build(&name, "trigger_pattern", &def.trigger_pattern, true)?;

        let reserved = |field: &str| -> TemplateResult<&String> {
            def.patterns
                .get(field)
                .ok_or_else(|| TemplateError::MissingField {
                    template: name.clone(),
                    field: field.to_string(),
                })
        };

        let complete_address = build(
            &name,
            FIELD_COMPLETE_ADDRESS,
            reserved(FIELD_COMPLETE_ADDRESS)?,
            true,
        )?;
        require_groups(&name, FIELD_COMPLETE_ADDRESS, &complete_address, 4)?;

        let listing_url = build(&name, FIELD_LISTING_URL, reserved(FIELD_LISTING_URL)?, true)?;
        // Image patterns are applied exactly as written.
        let image_urls = build(&name, FIELD_IMAGE_URLS, reserved(FIELD_IMAGE_URLS)?, false)?;

        let mut fields = Vec::new();
        for (field, pattern) in &def.patterns {
            if RESERVED_FIELDS.contains(&field.as_str()) {
                continue;
            }
            let re = build(&name, field, pattern, true)?;
            require_groups(&name, field, &re, 1)?;
            fields.push((field.clone(), re));
        }

        Ok(Self {
            name,
            priority: def.priority,
            trigger_label,
            trigger_pattern,
            fields,
            complete_address,
            listing_url,
            image_urls,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The classification label copied into every event this template produces.
    pub fn trigger_label(&self) -> &str {
        &self.trigger_label
    }

    /// Whether this template's trigger pattern matches `subject` (case-insensitive).
    pub fn matches_subject(&self, subject: &str) -> bool {
        self.trigger_pattern.is_match(subject)
    }

    /// Ordinary (non-reserved) field patterns, in field-name order.
    pub fn field_patterns(&self) -> impl Iterator<Item = (&str, &Regex)> {
        self.fields.iter().map(|(name, re)| (name.as_str(), re))
    }

    pub fn complete_address_pattern(&self) -> &Regex {
        &self.complete_address
    }

    pub fn listing_url_pattern(&self) -> &Regex {
        &self.listing_url
    }

    pub fn image_url_pattern(&self) -> &Regex {
        &self.image_urls
    }
}

fn build(template: &str, field: &str, pattern: &str, fold: bool) -> TemplateResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(fold)
        .multi_line(fold)
        .build()
        .map_err(|e| TemplateError::InvalidPattern {
            template: template.to_string(),
            field: field.to_string(),
            message: e.to_string(),
        })
}

fn require_groups(template: &str, field: &str, re: &Regex, expected: usize) -> TemplateResult<()> {
    // captures_len() counts the implicit whole-match group.
    let found = re.captures_len().saturating_sub(1);
    if found < expected {
        return Err(TemplateError::CaptureGroups {
            template: template.to_string(),
            field: field.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

// ── TemplateCatalog ─────────────────────────────────────────────────────

/// Immutable, explicitly ordered collection of templates.
///
/// Order is ascending priority, ties broken by name, so classification never
/// depends on directory enumeration order.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: Vec<Template>,
}

impl TemplateCatalog {
    /// Build a catalog from compiled templates, rejecting duplicate names.
    pub fn new(mut templates: Vec<Template>) -> TemplateResult<Self> {
        let mut seen = HashSet::new();
        for t in &templates {
            if !seen.insert(t.name.clone()) {
                return Err(TemplateError::Duplicate {
                    name: t.name.clone(),
                });
            }
        }
        templates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(Self { templates })
    }

    /// Compile every definition and build the catalog.
    pub fn from_defs(defs: &[TemplateDef]) -> TemplateResult<Self> {
        let templates = defs
            .iter()
            .map(Template::compile)
            .collect::<TemplateResult<Vec<_>>>()?;
        Self::new(templates)
    }

    /// Load every `.json` and `.toml` file in `dir`.
    pub fn load_dir(dir: &Path) -> TemplateResult<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| TemplateError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TemplateError::Io {
                path: dir.display().to_string(),
                source: e,
            })?;
            paths.push(entry.path());
        }
        paths.sort();

        let mut defs = Vec::new();
        for path in paths {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "json" && ext != "toml" {
                continue;
            }
            let origin = path.display().to_string();
            let text = std::fs::read_to_string(&path).map_err(|e| TemplateError::Io {
                path: origin.clone(),
                source: e,
            })?;
            let def = if ext == "json" {
                TemplateDef::from_json(&text, &origin)?
            } else {
                TemplateDef::from_toml(&text, &origin)?
            };
            tracing::debug!(template = %def.name, path = %origin, "loaded template");
            defs.push(def);
        }

        let catalog = Self::from_defs(&defs)?;
        tracing::info!(count = catalog.len(), dir = %dir.display(), "template catalog ready");
        Ok(catalog)
    }

    /// First template (in catalog order) whose trigger pattern matches `subject`.
    pub fn classify(&self, subject: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.matches_subject(subject))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn new_listing_def() -> TemplateDef {
        let mut patterns = BTreeMap::new();
        patterns.insert("trigger".into(), "new listing".into());
        patterns.insert("price".into(), r"\$([\d,]+)".into());
        patterns.insert("bedrooms".into(), r"(\d+)\s*(?:bd|beds?)\b".into());
        patterns.insert("bathrooms".into(), r"([\d.]+)\s*(?:ba|baths?)\b".into());
        patterns.insert("sqft".into(), r"([\d,]+)\s*sq\.?\s*ft".into());
        patterns.insert(
            "complete_address".into(),
            r"^(\d+[^,\n]+),\s*([^,\n]+),\s*([A-Z]{2})\s+(\d{5})".into(),
        );
        patterns.insert(
            "listing_url".into(),
            r"https://www\.example-homes\.com/listing/\d+".into(),
        );
        patterns.insert(
            "image_urls".into(),
            r"https://img\.example-homes\.com/[\w/.-]+\.jpg".into(),
        );
        TemplateDef {
            name: "new-listing".into(),
            trigger_pattern: r"new listing".into(),
            priority: DEFAULT_PRIORITY,
            patterns,
        }
    }

    pub(crate) fn price_drop_def() -> TemplateDef {
        let mut def = new_listing_def();
        def.name = "price-drop".into();
        def.trigger_pattern = r"price (?:drop|reduced)".into();
        def.patterns.insert("trigger".into(), "price drop".into());
        def.patterns
            .insert("price_change".into(), r"reduced by \$([\d,]+)".into());
        def
    }

    #[test]
    fn compile_valid_template() {
        let t = Template::compile(&new_listing_def()).unwrap();
        assert_eq!(t.name(), "new-listing");
        assert_eq!(t.trigger_label(), "new listing");
        let names: Vec<&str> = t.field_patterns().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["bathrooms", "bedrooms", "price", "sqft"]);
    }

    #[test]
    fn missing_reserved_pattern_fails_fast() {
        for field in [FIELD_COMPLETE_ADDRESS, FIELD_LISTING_URL, FIELD_IMAGE_URLS, FIELD_TRIGGER] {
            let mut def = new_listing_def();
            def.patterns.remove(field);
            let err = Template::compile(&def).unwrap_err();
            match err {
                TemplateError::MissingField { field: f, .. } => assert_eq!(f, field),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn address_pattern_needs_four_groups() {
        let mut def = new_listing_def();
        def.patterns
            .insert("complete_address".into(), r"(\d+ \w+ St), (\w+)".into());
        let err = Template::compile(&def).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::CaptureGroups { expected: 4, found: 2, .. }
        ));
    }

    #[test]
    fn ordinary_field_needs_a_group() {
        let mut def = new_listing_def();
        def.patterns.insert("price".into(), r"\$[\d,]+".into());
        let err = Template::compile(&def).unwrap_err();
        assert!(matches!(err, TemplateError::CaptureGroups { expected: 1, .. }));
    }

    #[test]
    fn listing_url_without_group_is_accepted() {
        assert!(Template::compile(&new_listing_def()).is_ok());
    }

    #[test]
    fn invalid_regex_is_reported() {
        let mut def = new_listing_def();
        def.patterns.insert("sqft".into(), r"([\d,]+".into());
        let err = Template::compile(&def).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidPattern { ref field, .. } if field == "sqft"));
    }

    #[test]
    fn classify_is_case_insensitive() {
        let catalog = TemplateCatalog::from_defs(&[new_listing_def(), price_drop_def()]).unwrap();
        let t = catalog.classify("NEW LISTING: 123 Main St").unwrap();
        assert_eq!(t.name(), "new-listing");
        let t = catalog.classify("Price Reduced on 9 Elm Ave").unwrap();
        assert_eq!(t.name(), "price-drop");
        assert!(catalog.classify("Your weekly digest").is_none());
    }

    #[test]
    fn first_match_in_declared_order_wins() {
        let mut broad = price_drop_def();
        broad.name = "a-broad".into();
        broad.trigger_pattern = "listing".into();
        broad.priority = 200;

        let catalog = TemplateCatalog::from_defs(&[broad.clone(), new_listing_def()]).unwrap();
        assert_eq!(catalog.classify("New Listing: 1 Oak").unwrap().name(), "new-listing");

        // Same priority: name decides.
        broad.priority = DEFAULT_PRIORITY;
        let catalog = TemplateCatalog::from_defs(&[new_listing_def(), broad]).unwrap();
        assert_eq!(catalog.classify("New Listing: 1 Oak").unwrap().name(), "a-broad");
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = TemplateCatalog::from_defs(&[new_listing_def(), new_listing_def()]).unwrap_err();
        assert!(matches!(err, TemplateError::Duplicate { .. }));
    }

    #[test]
    fn load_dir_reads_json_and_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let json = serde_json::to_string_pretty(&new_listing_def()).unwrap();
        std::fs::write(dir.path().join("new_listing.json"), json).unwrap();
        let toml_text = toml::to_string(&price_drop_def()).unwrap();
        std::fs::write(dir.path().join("price_drop.toml"), toml_text).unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let catalog = TemplateCatalog::load_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.iter().next().unwrap().name(), "new-listing");
    }

    #[test]
    fn load_dir_aborts_on_malformed_template() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut def = new_listing_def();
        def.patterns.remove("image_urls");
        std::fs::write(
            dir.path().join("broken.json"),
            serde_json::to_string(&def).unwrap(),
        )
        .unwrap();
        assert!(TemplateCatalog::load_dir(dir.path()).is_err());
    }

    #[test]
    fn json_without_priority_gets_default() {
        let text = r#"{
            "name": "zillow",
            "trigger_pattern": "new listing",
            "patterns": {"trigger": "new listing", "complete_address": "(a)(b)(c)(d)",
                         "listing_url": "x", "image_urls": "y"}
        }"#;
        let def = TemplateDef::from_json(text, "inline").unwrap();
        assert_eq!(def.priority, DEFAULT_PRIORITY);
    }
}

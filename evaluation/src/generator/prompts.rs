//! Prompt templates with named substitution slots.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever the default template
//! text changes. Each template carries a version (the built-in one, a
//! caller-supplied one, or `custom`) that is recorded on every exchange so a
//! result can be traced back to the wording that produced it.
//!
//! Syntax: `{name}` is a slot, `{{` and `}}` are literal braces. Braces that
//! do not form an identifier slot (e.g. `{ return 0; }`) pass through as-is,
//! as do `{name}` tokens that are not slots of the template's kind.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prompt version. Bump on any default template change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Version recorded for template text that differs from the built-in wording
/// and was given no version of its own.
pub const CUSTOM_PROMPT_VERSION: &str = "custom";

pub const SLOT_SOURCE_CODE: &str = "source_code";
pub const SLOT_DIAGNOSTICS: &str = "diagnostics";
pub const SLOT_PREVIOUS_ARTIFACT: &str = "previous_artifact";

/// Default initial translation prompt (Fortran → C++17).
pub const DEFAULT_INITIAL_TEMPLATE: &str = "\
Translate the following Fortran code to modern C++ (C++17 or newer).
Maintain functional equivalence while using C++ idioms where appropriate.
Return only the translated C++ code in a single ```cpp block, with brief comments \
explaining key translation decisions.

Fortran code:
```fortran
{source_code}
```
";

/// Default repair prompt.
pub const DEFAULT_REPAIR_TEMPLATE: &str = "\
I attempted to compile your Fortran to C++ translation, but encountered the following errors:

{diagnostics}

Please revise your translation to address these issues. Pay special attention to type \
conversions, array indexing (C++ uses 0-based indexing), and memory management.

Here is your previous translation attempt:
```cpp
{previous_artifact}
```

Original Fortran code for reference:
```fortran
{source_code}
```

Return the complete corrected C++ code in a single ```cpp block.
";

/// A piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Segment {
    Text(String),
    Slot(String),
}

/// Parsed template text. Rendering is single pass, so substituted values
/// are never scanned for slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TemplateText {
    raw: String,
    segments: Vec<Segment>,
    version: String,
}

fn is_slot_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl TemplateText {
    /// Parse `raw`. It is versioned as the built-in prompt only when it
    /// matches `builtin` exactly.
    fn parse(raw: &str, known_slots: &[&str], builtin: &str) -> Self {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = raw;

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("{{") {
                text.push('{');
                rest = after;
                continue;
            }
            if let Some(after) = rest.strip_prefix("}}") {
                text.push('}');
                rest = after;
                continue;
            }
            if let Some(after) = rest.strip_prefix('{') {
                if let Some(close) = after.find('}') {
                    let name = &after[..close];
                    if is_slot_name(name) && known_slots.contains(&name) {
                        if !text.is_empty() {
                            segments.push(Segment::Text(std::mem::take(&mut text)));
                        }
                        segments.push(Segment::Slot(name.to_string()));
                        rest = &after[close + 1..];
                        continue;
                    }
                }
            }

            let Some(ch) = rest.chars().next() else {
                break;
            };
            text.push(ch);
            rest = &rest[ch.len_utf8()..];
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        let version = if raw == builtin {
            PROMPT_VERSION
        } else {
            CUSTOM_PROMPT_VERSION
        };

        Self {
            raw: raw.to_string(),
            segments,
            version: version.to_string(),
        }
    }

    fn has_slot(&self, slot: &str) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Slot(name) if name == slot))
    }

    fn require(&self, template: &'static str, slots: &[&'static str]) -> Result<(), ConfigError> {
        match slots.iter().find(|slot| !self.has_slot(slot)) {
            Some(&slot) => Err(ConfigError::MissingSlot { template, slot }),
            None => Ok(()),
        }
    }

    fn render(&self, values: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot(name) => {
                    if let Some((_, value)) = values.iter().find(|(slot, _)| slot == name) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }
}

/// Initial translation template. Guaranteed to contain `{source_code}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InitialTemplate(TemplateText);

impl InitialTemplate {
    const SLOTS: &'static [&'static str] = &[SLOT_SOURCE_CODE];

    pub fn new(raw: impl AsRef<str>) -> Result<Self, ConfigError> {
        let text = TemplateText::parse(raw.as_ref(), Self::SLOTS, DEFAULT_INITIAL_TEMPLATE);
        text.require("initial", Self::SLOTS)?;
        Ok(Self(text))
    }

    /// Version recorded on every exchange rendered from this template.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.0.version = version.into();
        self
    }

    pub fn version(&self) -> &str {
        &self.0.version
    }

    pub fn render(&self, source_code: &str) -> String {
        self.0.render(&[(SLOT_SOURCE_CODE, source_code)])
    }

    pub fn as_str(&self) -> &str {
        &self.0.raw
    }
}

impl Default for InitialTemplate {
    fn default() -> Self {
        Self(TemplateText::parse(DEFAULT_INITIAL_TEMPLATE, Self::SLOTS, DEFAULT_INITIAL_TEMPLATE))
    }
}

impl TryFrom<String> for InitialTemplate {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<InitialTemplate> for String {
    fn from(template: InitialTemplate) -> Self {
        template.0.raw
    }
}

/// Repair template. Guaranteed to contain `{diagnostics}`,
/// `{previous_artifact}` and `{source_code}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepairTemplate(TemplateText);

impl RepairTemplate {
    const SLOTS: &'static [&'static str] =
        &[SLOT_DIAGNOSTICS, SLOT_PREVIOUS_ARTIFACT, SLOT_SOURCE_CODE];

    pub fn new(raw: impl AsRef<str>) -> Result<Self, ConfigError> {
        let text = TemplateText::parse(raw.as_ref(), Self::SLOTS, DEFAULT_REPAIR_TEMPLATE);
        text.require("repair", Self::SLOTS)?;
        Ok(Self(text))
    }

    /// Version recorded on every exchange rendered from this template.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.0.version = version.into();
        self
    }

    pub fn version(&self) -> &str {
        &self.0.version
    }

    pub fn render(&self, diagnostics: &str, previous_artifact: &str, source_code: &str) -> String {
        self.0.render(&[
            (SLOT_DIAGNOSTICS, diagnostics),
            (SLOT_PREVIOUS_ARTIFACT, previous_artifact),
            (SLOT_SOURCE_CODE, source_code),
        ])
    }

    pub fn as_str(&self) -> &str {
        &self.0.raw
    }
}

impl Default for RepairTemplate {
    fn default() -> Self {
        Self(TemplateText::parse(DEFAULT_REPAIR_TEMPLATE, Self::SLOTS, DEFAULT_REPAIR_TEMPLATE))
    }
}

impl TryFrom<String> for RepairTemplate {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<RepairTemplate> for String {
    fn from(template: RepairTemplate) -> Self {
        template.0.raw
    }
}

/// The pair of templates a session uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplates {
    pub initial: InitialTemplate,
    pub repair: RepairTemplate,
}

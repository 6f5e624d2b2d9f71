//! # Configuration Loading and Validation
//!
//! This module loads the `.cs50.yml` (or `.cs50.yaml`) document at a workspace
//! root and validates the calling tool's namespace against its composed
//! [`OptionSpec`](crate::schema::OptionSpec).
//!
//! ## Document Layout
//!
//! Each tool owns one top-level key. Keys belonging to other tools are ignored.
//!
//! ```yaml
//! check50:
//!   language: python
//!   files:
//!     - !exclude "*"
//!     - !require hello.py
//! submit50: true
//! ```
//!
//! `submit50: true` enables a tool with no options; `false`, `null` or a missing
//! key means the tool is not enabled by this document.
//!
//! ## Validation
//!
//! Validation never stops at the first problem. Type mismatches, unknown keys,
//! missing required options and constraint violations are all collected into
//! one [`Diagnostics`] list. A load either returns every diagnostic or a fully
//! valid [`ValidatedOptions`]; warnings (unknown keys under the default policy)
//! travel with the successful result.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use serde_yaml::Value;

use crate::error::{ConfigError, ErrorKind, Location};
use crate::schema::{normalize_tag, OptionSpec, OptionType, OptionValue, Schema, UnknownKeyPolicy};

/// Config file names, in lookup order. Exactly one may exist.
pub const CONFIG_FILENAMES: [&str; 2] = [".cs50.yml", ".cs50.yaml"];

/// Locate the config document under `root`.
///
/// Returns `Ok(None)` when neither file exists and a `MalformedConfig` error
/// when both do, since it is then ambiguous which one applies.
pub fn find_config_file(root: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let found: Vec<PathBuf> = CONFIG_FILENAMES
        .iter()
        .map(|name| root.join(name))
        .filter(|path| path.is_file())
        .collect();

    match found.len() {
        0 => Ok(None),
        1 => Ok(found.into_iter().next()),
        _ => Err(ConfigError::MalformedConfig {
            path: root.to_path_buf(),
            message: "Two config files (.cs50.yml and .cs50.yaml) found".to_string(),
            location: None,
        }),
    }
}

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// One finding from a load attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub error: ConfigError,
}

impl Diagnostic {
    pub fn error(error: ConfigError) -> Self {
        Self {
            severity: Severity::Error,
            error,
        }
    }

    pub fn warning(error: ConfigError) -> Self {
        Self {
            severity: Severity::Warning,
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.error)
    }
}

/// Every diagnostic produced by a failed load, in discovery order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| !d.is_error())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

impl From<ConfigError> for Diagnostics {
    fn from(error: ConfigError) -> Self {
        Diagnostics(vec![Diagnostic::error(error)])
    }
}

/// The validated options of one tool.
#[derive(Debug, Clone)]
pub struct ValidatedOptions {
    tool: String,
    values: BTreeMap<String, OptionValue>,
    warnings: Vec<Diagnostic>,
}

impl PartialEq for ValidatedOptions {
    fn eq(&self, other: &Self) -> bool {
        self.tool == other.tool && self.values == other.values
    }
}

impl ValidatedOptions {
    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(OptionValue::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(OptionValue::as_bool)
    }

    pub fn get_list(&self, name: &str) -> Option<&[OptionValue]> {
        self.get(name).and_then(OptionValue::as_list)
    }

    pub fn values(&self) -> &BTreeMap<String, OptionValue> {
        &self.values
    }

    /// Non-fatal diagnostics, such as unknown keys under the warn policy.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Serialize back into a config document containing only this tool.
    pub fn to_document(&self) -> Value {
        let mut options = serde_yaml::Mapping::new();
        for (key, value) in &self.values {
            options.insert(Value::String(key.clone()), value.to_yaml());
        }
        let mut root = serde_yaml::Mapping::new();
        root.insert(Value::String(self.tool.clone()), Value::Mapping(options));
        Value::Mapping(root)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.to_document())
    }
}

/// Loads and validates config documents against a composed [`Schema`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    schema: Schema,
}

impl ConfigLoader {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Load the config document under `root` for `tool`.
    pub fn load(&self, root: &Path, tool: &str) -> Result<ValidatedOptions, Diagnostics> {
        let empty = OptionSpec::default();
        let spec = self.schema.tool(tool).unwrap_or(&empty);

        let Some(path) = find_config_file(root)? else {
            debug!("No config file under {}", root.display());
            if spec.has_required() {
                return Err(ConfigError::MissingConfig {
                    dir: root.to_path_buf(),
                }
                .into());
            }
            return finish(tool, spec, &serde_yaml::Mapping::new(), Diagnostics::default());
        };

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::MalformedConfig {
            path: path.clone(),
            message: e.to_string(),
            location: None,
        })?;

        self.load_str(&content, tool, &path)
    }

    /// Validate already-read document content; `path` is used in messages.
    pub fn load_str(
        &self,
        content: &str,
        tool: &str,
        path: &Path,
    ) -> Result<ValidatedOptions, Diagnostics> {
        let empty = OptionSpec::default();
        let spec = self.schema.tool(tool).unwrap_or(&empty);

        let document: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::MalformedConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
            location: e.location().map(|l| Location {
                line: l.line(),
                column: l.column(),
            }),
        })?;

        let missing_tool = || -> Diagnostics {
            ConfigError::MissingTool {
                tool: tool.to_string(),
            }
            .into()
        };

        let Value::Mapping(root) = document else {
            return Err(missing_tool());
        };

        match root.get(tool) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => Err(missing_tool()),
            Some(Value::Bool(true)) => {
                finish(tool, spec, &serde_yaml::Mapping::new(), Diagnostics::default())
            }
            Some(Value::Mapping(options)) => finish(tool, spec, options, Diagnostics::default()),
            Some(other) => Err(ConfigError::TypeMismatch {
                key: tool.to_string(),
                expected: "mapping".to_string(),
                actual: yaml_type_name(other),
            }
            .into()),
        }
    }
}

/// Validate a tool's namespace mapping and produce the final result.
fn finish(
    tool: &str,
    spec: &OptionSpec,
    options: &serde_yaml::Mapping,
    mut diagnostics: Diagnostics,
) -> Result<ValidatedOptions, Diagnostics> {
    let mut values = BTreeMap::new();
    let mut present = Vec::new();

    for (key, value) in options {
        let key = key_to_string(key);
        present.push(key.clone());

        match spec.get(&key) {
            Some(def) => {
                if let Some(converted) = convert(value, &def.ty, &key, &mut diagnostics) {
                    values.insert(key, converted);
                }
            }
            None => {
                let unknown = ConfigError::UnknownOption { key };
                diagnostics.push(match spec.unknown_key_policy() {
                    UnknownKeyPolicy::Warn => Diagnostic::warning(unknown),
                    UnknownKeyPolicy::Reject => Diagnostic::error(unknown),
                });
            }
        }
    }

    for def in spec.options() {
        if present.contains(&def.name) {
            continue;
        }
        if def.required {
            diagnostics.push(Diagnostic::error(ConfigError::MissingRequiredOption {
                key: def.name.clone(),
            }));
        } else if let Some(default) = &def.default {
            values.insert(def.name.clone(), default.clone());
        }
    }

    for def in spec.options() {
        let Some(value) = values.get(&def.name) else {
            continue;
        };
        for constraint in &def.constraints {
            if let Err(message) = constraint.check(value) {
                diagnostics.push(Diagnostic::error(ConfigError::ConstraintViolation {
                    key: def.name.clone(),
                    message,
                }));
            }
        }
    }

    if diagnostics.has_errors() {
        return Err(diagnostics);
    }

    Ok(ValidatedOptions {
        tool: tool.to_string(),
        values,
        warnings: diagnostics.into_vec(),
    })
}

/// Convert `value` to `ty`, recording a `TypeMismatch` for every element that
/// does not fit. Returns `None` if anything failed.
fn convert(value: &Value, ty: &OptionType, key: &str, diagnostics: &mut Diagnostics) -> Option<OptionValue> {
    let mismatch = |diagnostics: &mut Diagnostics, actual: String| {
        diagnostics.push(Diagnostic::error(ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: ty.describe(),
            actual,
        }));
        None
    };

    match (ty, value) {
        (OptionType::Any, _) => Some(from_yaml_any(value)),
        (OptionType::Bool, Value::Bool(b)) => Some(OptionValue::Bool(*b)),
        (OptionType::Integer, Value::Number(n)) if n.as_i64().is_some() => n.as_i64().map(OptionValue::Integer),
        (OptionType::Float, Value::Number(n)) => n.as_f64().map(OptionValue::Float),
        (OptionType::String, Value::String(s)) => Some(OptionValue::String(s.clone())),
        (OptionType::Map, Value::Mapping(_)) => Some(from_yaml_any(value)),
        (OptionType::List(inner), Value::Sequence(items)) => {
            let mut converted = Vec::with_capacity(items.len());
            let mut ok = true;
            for (i, item) in items.iter().enumerate() {
                match convert(item, inner, &format!("{}[{}]", key, i), diagnostics) {
                    Some(v) => converted.push(v),
                    None => ok = false,
                }
            }
            ok.then_some(OptionValue::List(converted))
        }
        (OptionType::Tagged(tags), Value::Tagged(tagged)) => {
            let tag = normalize_tag(&tagged.tag.to_string());
            match (&tagged.value, tags.allows(&tag)) {
                (Value::String(s), true) => Some(OptionValue::Tagged {
                    tag,
                    value: s.clone(),
                }),
                (Value::String(_), false) => mismatch(diagnostics, format!("!{} tag", tag)),
                (other, _) => mismatch(diagnostics, format!("!{} {}", tag, yaml_type_name(other))),
            }
        }
        (OptionType::Tagged(tags), Value::String(s)) => match &tags.default {
            Some(default) => Some(OptionValue::Tagged {
                tag: default.clone(),
                value: s.clone(),
            }),
            None => mismatch(diagnostics, "untagged string".to_string()),
        },
        (_, other) => mismatch(diagnostics, yaml_type_name(other)),
    }
}

fn from_yaml_any(value: &Value) -> OptionValue {
    match value {
        Value::Null => OptionValue::Null,
        Value::Bool(b) => OptionValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => OptionValue::Integer(i),
            None => OptionValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => OptionValue::String(s.clone()),
        Value::Sequence(items) => OptionValue::List(items.iter().map(from_yaml_any).collect()),
        Value::Mapping(map) => OptionValue::Map(
            map.iter()
                .map(|(k, v)| (key_to_string(k), from_yaml_any(v)))
                .collect(),
        ),
        Value::Tagged(tagged) => match &tagged.value {
            Value::String(s) => OptionValue::Tagged {
                tag: normalize_tag(&tagged.tag.to_string()),
                value: s.clone(),
            },
            other => from_yaml_any(other),
        },
    }
}

fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}

/// The YAML type of a value, as named in diagnostics.
fn yaml_type_name(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Sequence(_) => "list".to_string(),
        Value::Mapping(_) => "mapping".to_string(),
        Value::Tagged(tagged) => format!("tagged value ({})", tagged.tag),
    }
}

//! # Option Schemas
//!
//! Declarative descriptions of the keys a tool accepts under its namespace in
//! `.cs50.yml`. A tool's schema is assembled from one or more [`OptionSpec`]
//! fragments registered on a [`SchemaBuilder`]; the built [`Schema`] is
//! immutable and shared by every load.
//!
//! ```
//! use lib50::schema::{files_fragment, OptionDef, OptionSpec, OptionType, SchemaBuilder};
//!
//! let schema = SchemaBuilder::new()
//!     .register("check50", files_fragment())
//!     .unwrap()
//!     .register(
//!         "check50",
//!         OptionSpec::new().option(OptionDef::new("language", OptionType::String).required()),
//!     )
//!     .unwrap()
//!     .build();
//!
//! assert!(schema.tool("check50").unwrap().get("language").is_some());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::SchemaError;

/// YAML tags accepted by the `files` option.
pub const INCLUDE_TAG: &str = "include";
pub const EXCLUDE_TAG: &str = "exclude";
pub const REQUIRE_TAG: &str = "require";

/// The set of YAML tags a tagged option accepts, and the tag given to plain
/// scalars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub tags: Vec<String>,
    pub default: Option<String>,
}

impl TagSet {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(|t| normalize_tag(&t.into())).collect(),
            default: None,
        }
    }

    pub fn with_default(mut self, tag: &str) -> Self {
        let tag = normalize_tag(tag);
        if !self.tags.contains(&tag) {
            self.tags.push(tag.clone());
        }
        self.default = Some(tag);
        self
    }

    pub fn allows(&self, tag: &str) -> bool {
        let tag = normalize_tag(tag);
        self.tags.iter().any(|t| *t == tag)
    }
}

/// Strip the syntactically required `!` from a YAML tag.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim_start_matches('!').to_string()
}

/// The type an option's value must have.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionType {
    Bool,
    Integer,
    Float,
    String,
    List(Box<OptionType>),
    /// A free-form mapping with string keys.
    Map,
    /// A scalar string carrying one of the allowed YAML tags.
    Tagged(TagSet),
    Any,
}

impl OptionType {
    pub fn list_of(inner: OptionType) -> Self {
        OptionType::List(Box::new(inner))
    }

    /// Human-readable type name used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            OptionType::Bool => "boolean".to_string(),
            OptionType::Integer => "integer".to_string(),
            OptionType::Float => "number".to_string(),
            OptionType::String => "string".to_string(),
            OptionType::List(inner) => format!("list of {}", inner.describe()),
            OptionType::Map => "mapping".to_string(),
            OptionType::Tagged(set) => {
                let tags: Vec<String> = set.tags.iter().map(|t| format!("!{}", t)).collect();
                format!("tagged string ({})", tags.join(", "))
            }
            OptionType::Any => "any value".to_string(),
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<OptionValue>),
    Map(BTreeMap<String, OptionValue>),
    Tagged { tag: String, value: String },
}

impl OptionValue {
    pub fn tagged(tag: &str, value: &str) -> Self {
        OptionValue::Tagged {
            tag: normalize_tag(tag),
            value: value.to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            OptionValue::Tagged { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Integer(i) => Some(*i as f64),
            OptionValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[OptionValue]> {
        match self {
            OptionValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, OptionValue>> {
        match self {
            OptionValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The `(tag, value)` pair of a tagged scalar.
    pub fn as_tagged(&self) -> Option<(&str, &str)> {
        match self {
            OptionValue::Tagged { tag, value } => Some((tag, value)),
            _ => None,
        }
    }

    /// Convert back into a YAML value, restoring tags.
    pub fn to_yaml(&self) -> serde_yaml::Value {
        use serde_yaml::value::{Tag, TaggedValue};
        use serde_yaml::Value;

        match self {
            OptionValue::Null => Value::Null,
            OptionValue::Bool(b) => Value::Bool(*b),
            OptionValue::Integer(i) => Value::Number((*i).into()),
            OptionValue::Float(f) => Value::Number((*f).into()),
            OptionValue::String(s) => Value::String(s.clone()),
            OptionValue::List(items) => Value::Sequence(items.iter().map(|v| v.to_yaml()).collect()),
            OptionValue::Map(map) => {
                let mut mapping = serde_yaml::Mapping::new();
                for (key, value) in map {
                    mapping.insert(Value::String(key.clone()), value.to_yaml());
                }
                Value::Mapping(mapping)
            }
            OptionValue::Tagged { tag, value } => Value::Tagged(Box::new(TaggedValue {
                tag: Tag::new(tag.as_str()),
                value: Value::String(value.clone()),
            })),
        }
    }
}

/// A predicate an option's value must satisfy once its type is correct.
#[derive(Clone)]
pub enum Constraint {
    /// String value must be one of the listed alternatives.
    OneOf(Vec<String>),
    /// String value must fully match the regex.
    Pattern(Regex),
    /// Numeric value must lie in the inclusive range.
    Range { min: Option<f64>, max: Option<f64> },
    /// Strings, lists and maps must not be empty.
    NonEmpty,
    /// Caller-supplied predicate returning a message on failure.
    Custom {
        name: String,
        check: Arc<dyn Fn(&OptionValue) -> Result<(), String> + Send + Sync>,
    },
}

impl Constraint {
    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Constraint::OneOf(values.into_iter().map(Into::into).collect())
    }

    /// Anchored regex constraint.
    pub fn pattern(regex: &str) -> Result<Self, regex::Error> {
        Ok(Constraint::Pattern(Regex::new(&format!("^(?:{})$", regex))?))
    }

    pub fn custom<F>(name: &str, check: F) -> Self
    where
        F: Fn(&OptionValue) -> Result<(), String> + Send + Sync + 'static,
    {
        Constraint::Custom {
            name: name.to_string(),
            check: Arc::new(check),
        }
    }

    /// Check a value, returning a violation message.
    pub fn check(&self, value: &OptionValue) -> Result<(), String> {
        match self {
            Constraint::OneOf(allowed) => match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => Ok(()),
                Some(s) => Err(format!("'{}' is not one of: {}", s, allowed.join(", "))),
                None => Ok(()),
            },
            Constraint::Pattern(regex) => match value.as_str() {
                Some(s) if regex.is_match(s) => Ok(()),
                Some(s) => Err(format!("'{}' does not match {}", s, regex.as_str())),
                None => Ok(()),
            },
            Constraint::Range { min, max } => {
                let Some(n) = value.as_f64() else {
                    return Ok(());
                };
                if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                    Err(format!(
                        "{} is outside the allowed range {}..={}",
                        n,
                        min.map(|m| m.to_string()).unwrap_or_default(),
                        max.map(|m| m.to_string()).unwrap_or_default()
                    ))
                } else {
                    Ok(())
                }
            }
            Constraint::NonEmpty => {
                let empty = match value {
                    OptionValue::String(s) => s.is_empty(),
                    OptionValue::List(items) => items.is_empty(),
                    OptionValue::Map(map) => map.is_empty(),
                    _ => false,
                };
                if empty {
                    Err("must not be empty".to_string())
                } else {
                    Ok(())
                }
            }
            Constraint::Custom { check, .. } => check(value),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Constraint::OneOf(values) => format!("one of [{}]", values.join(", ")),
            Constraint::Pattern(regex) => format!("matches {}", regex.as_str()),
            Constraint::Range { min, max } => format!("range {:?}..={:?}", min, max),
            Constraint::NonEmpty => "non-empty".to_string(),
            Constraint::Custom { name, .. } => format!("custom {}", name),
        }
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constraint({})", self.describe())
    }
}

/// Definition of a single option.
#[derive(Debug, Clone)]
pub struct OptionDef {
    pub name: String,
    pub ty: OptionType,
    pub default: Option<OptionValue>,
    pub required: bool,
    pub constraints: Vec<Constraint>,
    pub description: Option<String>,
}

impl OptionDef {
    pub fn new(name: &str, ty: OptionType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            default: None,
            required: false,
            constraints: Vec::new(),
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: OptionValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn description(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }

    /// A canonical rendering of everything that affects validation, used to
    /// detect conflicting registrations.
    fn signature(&self) -> String {
        let constraints: Vec<String> = self.constraints.iter().map(|c| c.describe()).collect();
        format!(
            "{}{}{}{}",
            self.ty.describe(),
            if self.required { ", required" } else { "" },
            self.default
                .as_ref()
                .map(|d| format!(", default {:?}", d))
                .unwrap_or_default(),
            if constraints.is_empty() {
                String::new()
            } else {
                format!(", {}", constraints.join(", "))
            }
        )
    }
}

/// What to do with keys the schema does not define.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownKeyPolicy {
    /// Report as a warning and keep going.
    #[default]
    Warn,
    /// Report as an error; the load fails.
    Reject,
}

/// A set of option definitions: either a fragment being registered, or the
/// composed spec of one tool.
#[derive(Debug, Clone, Default)]
pub struct OptionSpec {
    options: BTreeMap<String, OptionDef>,
    unknown_keys: UnknownKeyPolicy,
}

impl OptionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn option(mut self, def: OptionDef) -> Self {
        self.options.insert(def.name.clone(), def);
        self
    }

    pub fn unknown_keys(mut self, policy: UnknownKeyPolicy) -> Self {
        self.unknown_keys = policy;
        self
    }

    pub fn get(&self, name: &str) -> Option<&OptionDef> {
        self.options.get(name)
    }

    pub fn options(&self) -> impl Iterator<Item = &OptionDef> {
        self.options.values()
    }

    pub fn unknown_key_policy(&self) -> UnknownKeyPolicy {
        self.unknown_keys
    }

    pub fn has_required(&self) -> bool {
        self.options.values().any(|o| o.required)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// The `files` fragment shared by every tool that pushes: a list of patterns
/// tagged `!include`, `!exclude` or `!require`; untagged entries are includes.
pub fn files_fragment() -> OptionSpec {
    OptionSpec::new().option(
        OptionDef::new(
            "files",
            OptionType::list_of(OptionType::Tagged(
                TagSet::new([INCLUDE_TAG, EXCLUDE_TAG, REQUIRE_TAG]).with_default(INCLUDE_TAG),
            )),
        )
        .default_value(OptionValue::List(Vec::new()))
        .description("Which files participate in a push"),
    )
}

/// Registers fragments per tool and builds an immutable [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tools: BTreeMap<String, OptionSpec>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `fragment` into `tool`'s spec.
    ///
    /// Re-registering an identical definition is allowed; any other collision
    /// is a [`SchemaError::Conflict`]. A `Reject` unknown-key policy in any
    /// fragment makes the whole tool reject unknown keys.
    pub fn register(mut self, tool: &str, fragment: OptionSpec) -> Result<Self, SchemaError> {
        let spec = self.tools.entry(tool.to_string()).or_default();

        for (name, def) in fragment.options {
            if let Some(existing) = spec.options.get(&name) {
                let (existing_sig, incoming_sig) = (existing.signature(), def.signature());
                if existing_sig != incoming_sig {
                    return Err(SchemaError::Conflict {
                        tool: tool.to_string(),
                        key: name,
                        existing: existing_sig,
                        incoming: incoming_sig,
                    });
                }
                continue;
            }
            spec.options.insert(name, def);
        }

        if fragment.unknown_keys == UnknownKeyPolicy::Reject {
            spec.unknown_keys = UnknownKeyPolicy::Reject;
        }

        Ok(self)
    }

    pub fn build(self) -> Schema {
        Schema {
            tools: self
                .tools
                .into_iter()
                .map(|(tool, spec)| (tool, Arc::new(spec)))
                .collect(),
        }
    }
}

/// Composed, immutable option specs for every registered tool.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tools: BTreeMap<String, Arc<OptionSpec>>,
}

impl Schema {
    pub fn tool(&self, name: &str) -> Option<&OptionSpec> {
        self.tools.get(name).map(|spec| spec.as_ref())
    }

    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }
}

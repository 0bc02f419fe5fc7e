//! Argument validation.
//!
//! Arguments and input-object fields carry [`ArgRules`]; output fields may
//! carry a [`FieldValidate`] refinement over the whole argument bag. Rules
//! are checked against the declared type during the build and every
//! violation is reported together, before the resolver runs.
//!
//! # Example
//!
//! ```ignore
//! use trellis_plugins::validation::{ArgRules, Rule};
//!
//! let email = ArgOptions::new(string).option(ArgRules::new([Rule::Email, Rule::MaxLength(254)]));
//! ```

use futures::future;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use trellis_core::{BuildError, BuildResult, RefKind, TypeRef};
use trellis_runtime::{
    ConfigStore, Extension, FieldError, InputFieldConfig, InputFieldKind, OutputFieldConfig,
    ResolveFn, ResolveStep, ResolverArgs, StepChain, StepKind,
};

/// A single violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Argument path, such as `input.tags[2]`.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
    /// Machine-readable error code.
    pub code: ValidationErrorCode,
    /// The violated bound, for length and range rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, code: ValidationErrorCode, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            code,
            constraint: None,
        }
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: impl ToString) -> Self {
        self.constraint = Some(constraint.to_string());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validation error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationErrorCode {
    MinLength,
    MaxLength,
    Length,
    Min,
    Max,
    NotInteger,
    InvalidEmail,
    InvalidUrl,
    InvalidUuid,
    PatternMismatch,
    InvalidType,
    Custom,
}

/// Every violation found for one field execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns errors whose path starts at `arg`.
    pub fn for_arg(&self, arg: &str) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| {
                e.path
                    .strip_prefix(arg)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with(['.', '[']))
            })
            .collect()
    }

    fn into_result(self) -> Result<(), FieldError> {
        if self.is_empty() {
            return Ok(());
        }
        let details = serde_json::to_value(&self.errors).unwrap_or(Value::Null);
        Err(FieldError::ValidationFailed {
            message: self.to_string(),
            details,
        })
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<_> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "Validation failed: {}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// A custom check over one value. `Err` carries the message.
pub type RefineFn = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// One constraint on an argument value.
#[derive(Clone)]
pub enum Rule {
    MinLength(usize),
    MaxLength(usize),
    Length(usize),
    Min(f64),
    Max(f64),
    Positive,
    NonNegative,
    Int,
    Email,
    Url,
    Uuid,
    Pattern(Regex),
    /// Rules for every item of a list.
    Items(Vec<Rule>),
    Refine(RefineFn),
}

impl Rule {
    /// Compiles `pattern` into a [`Rule::Pattern`].
    pub fn pattern(pattern: &str) -> BuildResult<Self> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| BuildError::invalid(pattern, e.to_string()))
    }

    pub fn refine<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::Refine(Arc::new(f))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::MinLength(_) => "minLength",
            Self::MaxLength(_) => "maxLength",
            Self::Length(_) => "length",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::Positive => "positive",
            Self::NonNegative => "nonnegative",
            Self::Int => "int",
            Self::Email => "email",
            Self::Url => "url",
            Self::Uuid => "uuid",
            Self::Pattern(_) => "pattern",
            Self::Items(_) => "items",
            Self::Refine(_) => "refine",
        }
    }

    fn target(&self) -> Target {
        match self {
            Self::MinLength(_)
            | Self::MaxLength(_)
            | Self::Length(_)
            | Self::Email
            | Self::Url
            | Self::Uuid
            | Self::Pattern(_) => Target::String,
            Self::Min(_) | Self::Max(_) | Self::Positive | Self::NonNegative | Self::Int => Target::Number,
            Self::Items(_) => Target::List,
            Self::Refine(_) => Target::Any,
        }
    }

    fn check(&self, value: &Value, path: &str, errors: &mut ValidationErrors) {
        if value.is_null() {
            return;
        }
        let expected = self.target();
        let type_ok = match expected {
            Target::String => value.is_string(),
            Target::Number => value.is_number(),
            Target::List => value.is_array(),
            Target::Any => true,
        };
        if !type_ok {
            errors.push(ValidationError::new(
                path,
                ValidationErrorCode::InvalidType,
                format!("expected a {expected} for {}", self.name()),
            ));
            return;
        }

        let text = value.as_str().unwrap_or_default();
        let number = value.as_f64().unwrap_or_default();
        let error = match self {
            Self::MinLength(min) if text.chars().count() < *min => Some(
                ValidationError::new(path, ValidationErrorCode::MinLength, format!("must be at least {min} characters"))
                    .with_constraint(min),
            ),
            Self::MaxLength(max) if text.chars().count() > *max => Some(
                ValidationError::new(path, ValidationErrorCode::MaxLength, format!("must be at most {max} characters"))
                    .with_constraint(max),
            ),
            Self::Length(len) if text.chars().count() != *len => Some(
                ValidationError::new(path, ValidationErrorCode::Length, format!("must be exactly {len} characters"))
                    .with_constraint(len),
            ),
            Self::Min(min) if number < *min => Some(
                ValidationError::new(path, ValidationErrorCode::Min, format!("must be at least {min}")).with_constraint(min),
            ),
            Self::Max(max) if number > *max => Some(
                ValidationError::new(path, ValidationErrorCode::Max, format!("must be at most {max}")).with_constraint(max),
            ),
            Self::Positive if number <= 0.0 => Some(
                ValidationError::new(path, ValidationErrorCode::Min, "must be positive").with_constraint(0),
            ),
            Self::NonNegative if number < 0.0 => Some(
                ValidationError::new(path, ValidationErrorCode::Min, "must not be negative").with_constraint(0),
            ),
            Self::Int if !is_integer(value) => Some(ValidationError::new(
                path,
                ValidationErrorCode::NotInteger,
                "must be an integer",
            )),
            Self::Email if !is_valid_email(text) => Some(ValidationError::new(
                path,
                ValidationErrorCode::InvalidEmail,
                "must be a valid email address",
            )),
            Self::Url if !is_valid_url(text) => Some(ValidationError::new(
                path,
                ValidationErrorCode::InvalidUrl,
                "must be a valid URL",
            )),
            Self::Uuid if !is_valid_uuid(text) => Some(ValidationError::new(
                path,
                ValidationErrorCode::InvalidUuid,
                "must be a valid UUID",
            )),
            Self::Pattern(re) if !re.is_match(text) => Some(
                ValidationError::new(path, ValidationErrorCode::PatternMismatch, "does not match the required pattern")
                    .with_constraint(re.as_str()),
            ),
            Self::Items(rules) => {
                for (index, item) in value.as_array().into_iter().flatten().enumerate() {
                    let item_path = format!("{path}[{index}]");
                    for rule in rules {
                        rule.check(item, &item_path, errors);
                    }
                }
                None
            }
            Self::Refine(refine) => refine(value)
                .err()
                .map(|message| ValidationError::new(path, ValidationErrorCode::Custom, message)),
            _ => None,
        };
        if let Some(error) = error {
            errors.push(error);
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinLength(n) | Self::MaxLength(n) | Self::Length(n) => write!(f, "{}({n})", self.name()),
            Self::Min(n) | Self::Max(n) => write!(f, "{}({n})", self.name()),
            Self::Pattern(re) => write!(f, "pattern({})", re.as_str()),
            Self::Items(rules) => f.debug_tuple("items").field(rules).finish(),
            _ => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    String,
    Number,
    List,
    Any,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Number => "number",
            Self::List => "list",
            Self::Any => "value",
        })
    }
}

/// Argument or input-object field option: rules for the value.
#[derive(Debug, Clone)]
pub struct ArgRules(pub Vec<Rule>);

impl ArgRules {
    pub fn new(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self(rules.into_iter().collect())
    }
}

/// Output field option: a check over all arguments at once.
#[derive(Clone)]
pub struct FieldValidate(pub Arc<dyn Fn(&ResolverArgs) -> Result<(), String> + Send + Sync>);

impl FieldValidate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ResolverArgs) -> Result<(), String> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for FieldValidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldValidate(..)")
    }
}

/// Rules checked against an input's type, attached to its configuration.
#[derive(Debug, Clone)]
struct CompiledRules {
    rules: Vec<Rule>,
}

/// What validation needs to know about one argument or input field.
#[derive(Debug, Clone)]
struct InputShape {
    name: String,
    rules: Option<CompiledRules>,
    /// Input object the value is (a list of), if any.
    input_type: Option<String>,
    default_value: Option<Value>,
}

/// Input-object fields by input-object type name, filled during the build.
#[derive(Debug, Default)]
struct InputRegistry {
    types: RwLock<FxHashMap<String, Vec<InputShape>>>,
}

impl InputRegistry {
    fn register(&self, type_name: &str, shape: InputShape) {
        let mut types = self.types.write();
        let fields = types.entry(type_name.to_string()).or_default();
        match fields.iter_mut().find(|field| field.name == shape.name) {
            Some(field) => *field = shape,
            None => fields.push(shape),
        }
    }

    /// Returns whether values of `type_name` have anything to check.
    fn has_rules(&self, type_name: &str, visiting: &mut FxHashSet<String>) -> bool {
        if !visiting.insert(type_name.to_string()) {
            return false;
        }
        let fields = self.types.read().get(type_name).cloned().unwrap_or_default();
        fields.iter().any(|field| {
            field.rules.is_some()
                || field
                    .input_type
                    .as_deref()
                    .is_some_and(|nested| self.has_rules(nested, visiting))
        })
    }

    fn validate_object(&self, type_name: &str, value: &Value, path: &str, errors: &mut ValidationErrors) {
        let fields = self.types.read().get(type_name).cloned().unwrap_or_default();
        for field in &fields {
            let field_path = format!("{path}.{}", field.name);
            let field_value = value.get(&field.name).or(field.default_value.as_ref());
            if let Some(field_value) = field_value {
                self.validate_input(field, field_value, &field_path, errors);
            }
        }
    }

    fn validate_input(&self, shape: &InputShape, value: &Value, path: &str, errors: &mut ValidationErrors) {
        if value.is_null() {
            return;
        }
        if let Some(compiled) = &shape.rules {
            for rule in &compiled.rules {
                rule.check(value, path, errors);
            }
        }
        if let Some(input_type) = &shape.input_type {
            self.validate_nested(input_type, value, path, errors);
        }
    }

    fn validate_nested(&self, type_name: &str, value: &Value, path: &str, errors: &mut ValidationErrors) {
        match value {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.validate_nested(type_name, item, &format!("{path}[{index}]"), errors);
                }
            }
            Value::Object(_) => self.validate_object(type_name, value, path, errors),
            _ => {}
        }
    }
}

/// The validation extension.
///
/// Input-object shapes are collected per build. Reusing one instance for a
/// second build starts a fresh registry, and schemas already built keep the
/// one they were built with.
#[derive(Debug, Default)]
pub struct Validation {
    inputs: Mutex<Option<(u64, Arc<InputRegistry>)>>,
}

impl Validation {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self, store: &ConfigStore) -> Arc<InputRegistry> {
        let mut current = self.inputs.lock();
        match &*current {
            Some((build, registry)) if *build == store.build_id() => Arc::clone(registry),
            _ => {
                let registry = Arc::new(InputRegistry::default());
                *current = Some((store.build_id(), Arc::clone(&registry)));
                registry
            }
        }
    }
}

fn check_rules(rules: &[Rule], ty: &TypeRef, store: &ConfigStore, coordinate: &str) -> BuildResult<()> {
    let named = ty.named_ref();
    let type_name = store.name_of(named);
    for rule in rules {
        let ok = match rule.target() {
            Target::Any => true,
            Target::List => match (rule, ty.list_item()) {
                (Rule::Items(items), Some(item)) => {
                    check_rules(items, item, store, coordinate)?;
                    true
                }
                _ => false,
            },
            _ if ty.list_item().is_some() => false,
            Target::String => {
                named.kind() == RefKind::Scalar && !matches!(type_name.as_str(), "Int" | "Float" | "Boolean")
            }
            Target::Number => {
                named.kind() == RefKind::Scalar && !matches!(type_name.as_str(), "String" | "ID" | "Boolean")
            }
        };
        if !ok {
            return Err(BuildError::invalid(
                coordinate,
                format!("rule {} cannot apply to {type_name}", rule.name()),
            ));
        }
    }
    Ok(())
}

fn shape_of(config: &InputFieldConfig, store: &ConfigStore) -> InputShape {
    let named = config.ty.named_ref();
    InputShape {
        name: config.name.clone(),
        rules: config.options.get::<CompiledRules>().cloned(),
        input_type: (named.kind() == RefKind::InputObject).then(|| store.name_of(named)),
        default_value: config.default_value.clone(),
    }
}

impl Extension for Validation {
    fn name(&self) -> &str {
        "Validation"
    }

    fn on_input_field_config(
        &self,
        mut config: InputFieldConfig,
        store: &ConfigStore,
    ) -> BuildResult<InputFieldConfig> {
        if let Some(ArgRules(rules)) = config.options.get::<ArgRules>().cloned() {
            check_rules(&rules, &config.ty, store, &config.coordinate())?;
            config.options.insert(CompiledRules { rules });
        }
        if config.kind == InputFieldKind::InputObject {
            self.registry(store).register(&config.parent_type, shape_of(&config, store));
        }
        Ok(config)
    }

    fn wrap_resolve(
        &self,
        resolver: ResolveFn,
        field: &OutputFieldConfig,
        store: &ConfigStore,
    ) -> BuildResult<ResolveFn> {
        let inputs = self.registry(store);
        let args: Vec<InputShape> = field.args.values().map(|arg| shape_of(arg, store)).collect();
        let refine = field.options.get::<FieldValidate>().cloned();

        let needs_check = refine.is_some()
            || args.iter().any(|arg| {
                arg.rules.is_some()
                    || arg
                        .input_type
                        .as_deref()
                        .is_some_and(|ty| inputs.has_rules(ty, &mut FxHashSet::default()))
            });
        if !needs_check {
            return Ok(resolver);
        }
        debug!(field = %field.coordinate(), args = args.len(), "installed argument validation");

        let args = Arc::new(args);
        let validate = ResolveStep::check(StepKind::Validate, move |input, _granted| {
            let mut errors = ValidationErrors::new();
            for arg in args.iter() {
                if let Some(value) = input.args.get(&arg.name).or(arg.default_value.as_ref()) {
                    inputs.validate_input(arg, value, &arg.name, &mut errors);
                }
            }
            if errors.is_empty() {
                if let Some(FieldValidate(refine)) = &refine {
                    if let Err(message) = refine(&input.args) {
                        errors.push(ValidationError::new("", ValidationErrorCode::Custom, message));
                    }
                }
            }
            future::ready(errors.into_result())
        });

        Ok(StepChain::new()
            .with(validate)
            .with(ResolveStep::resolve(resolver))
            .into_resolve_fn())
    }
}

fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|n| n.fract() == 0.0)
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.trim().split_once('@') else {
        return false;
    };
    !local.is_empty() && !domain.contains('@') && domain.contains('.') && domain.split('.').all(|p| !p.is_empty())
}

fn is_valid_url(url: &str) -> bool {
    let trimmed = url.trim();
    ["http://", "https://"]
        .iter()
        .any(|scheme| trimmed.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/')))
}

fn is_valid_uuid(uuid: &str) -> bool {
    uuid.len() == 36
        && uuid.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

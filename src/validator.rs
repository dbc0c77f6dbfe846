//! Validation engine: descriptor + value to an ordered list of violations.
//!
//! Pure and deterministic. The walk is depth-first in field declaration
//! order, so the same inputs always produce the same violation sequence.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ConstraintKind, PathSegment, ValidationError, Violation};
use crate::types::{
    json_type_name, AdditionalFields, CompositionRule, Constraints, DeclaredType, DescriptorKind,
    DescriptorSet, TypeDescriptor, ValueSchema,
};

/// Validate `value` against a compiled descriptor.
///
/// Returns every violation found; an empty list means the value is valid.
/// Referenced descriptors are looked up in `types`.
pub fn validate(types: &DescriptorSet, descriptor: &TypeDescriptor, value: &Value) -> Vec<Violation> {
    let mut walker = Walker::new(types);
    walker.descriptor(descriptor, value);
    walker.violations
}

/// Validate a single field, item or alternative value.
pub fn validate_value(types: &DescriptorSet, schema: &ValueSchema, value: &Value) -> Vec<Violation> {
    let mut walker = Walker::new(types);
    walker.value(schema, value);
    walker.violations
}

/// Serialize `value` and validate it against the descriptor at `type_uri`.
///
/// This is what generated setters call before committing a change.
///
/// # Errors
///
/// Returns `ValidationError` when serialization fails or the serialized
/// value violates the descriptor.
pub fn check_serializable<T: Serialize>(
    types: &DescriptorSet,
    type_uri: &str,
    value: &T,
) -> Result<(), ValidationError> {
    let json = serde_json::to_value(value).map_err(|e| ValidationError {
        violations: vec![Violation::new(
            &[],
            ConstraintKind::Type,
            format!("value is not representable as JSON: {}", e),
        )],
    })?;
    types.check(type_uri, &json)
}

/// Validate `value` against the descriptor at `type_uri`, then deserialize
/// it into `T`. Generated types build themselves through this.
///
/// # Errors
///
/// Returns `ValidationError` when the value violates the descriptor or
/// does not fit `T`.
pub fn from_checked<T: DeserializeOwned>(
    types: &DescriptorSet,
    type_uri: &str,
    value: Value,
) -> Result<T, ValidationError> {
    types.check(type_uri, &value)?;
    serde_json::from_value(value).map_err(|e| ValidationError {
        violations: vec![Violation::new(
            &[],
            ConstraintKind::Type,
            format!("value does not fit the generated type: {}", e),
        )],
    })
}

struct Walker<'a> {
    types: &'a DescriptorSet,
    path: Vec<PathSegment>,
    violations: Vec<Violation>,
}

impl<'a> Walker<'a> {
    fn new(types: &'a DescriptorSet) -> Self {
        Self {
            types,
            path: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn report(&mut self, kind: ConstraintKind, message: String) {
        self.violations.push(Violation::new(&self.path, kind, message));
    }

    fn descriptor(&mut self, descriptor: &TypeDescriptor, value: &Value) {
        match value.as_object() {
            Some(map) => self.fields(descriptor, map),
            None if descriptor.kind == DescriptorKind::Object => {
                self.report(
                    ConstraintKind::Type,
                    format!("expected object {}, got {}", descriptor.name, json_type_name(value)),
                );
                return;
            }
            // Composite descriptors may describe non-object values.
            None => {}
        }
        self.composition(descriptor, value);
    }

    fn fields(&mut self, descriptor: &TypeDescriptor, map: &Map<String, Value>) {
        for field in &descriptor.fields {
            match map.get(&field.name) {
                Some(value) => {
                    self.path.push(PathSegment::Field(field.name.clone()));
                    self.value(&field.schema, value);
                    self.path.pop();
                }
                None if field.required => self.missing(&field.name),
                None => {}
            }
        }

        // Required names with no declared field (e.g. from a bare `required` branch).
        for name in &descriptor.required {
            if !descriptor.has_field(name) && !map.contains_key(name) {
                self.missing(name);
            }
        }

        for (key, value) in map {
            if descriptor.has_field(key) {
                continue;
            }
            match &descriptor.additional {
                AdditionalFields::Allow => {}
                AdditionalFields::Forbid => {
                    self.path.push(PathSegment::Field(key.clone()));
                    self.report(
                        ConstraintKind::AdditionalField,
                        format!("field '{}' is not allowed on {}", key, descriptor.name),
                    );
                    self.path.pop();
                }
                AdditionalFields::Typed(schema) => {
                    self.path.push(PathSegment::Field(key.clone()));
                    self.value(schema, value);
                    self.path.pop();
                }
            }
        }
    }

    fn missing(&mut self, name: &str) {
        self.report(
            ConstraintKind::Required,
            format!("missing required field '{}'", name),
        );
    }

    fn composition(&mut self, descriptor: &TypeDescriptor, value: &Value) {
        let rule = descriptor.composition;
        if !matches!(rule, CompositionRule::OneOf | CompositionRule::AnyOf) {
            return;
        }
        let matched = descriptor
            .constituents
            .iter()
            .filter(|alternative| validate_value(self.types, alternative, value).is_empty())
            .count();

        match (rule, matched) {
            (_, 0) => self.report(
                ConstraintKind::NoAlternativeMatched,
                "no alternative matched".to_string(),
            ),
            (CompositionRule::OneOf, n) if n > 1 => self.report(
                ConstraintKind::AmbiguousMatch,
                format!("ambiguous: {} alternatives matched", n),
            ),
            _ => {}
        }
    }

    fn value(&mut self, schema: &ValueSchema, value: &Value) {
        if !type_matches(&schema.declared, value) {
            self.report(
                ConstraintKind::Type,
                format!(
                    "expected {}, got {}",
                    schema.declared.describe(),
                    json_type_name(value)
                ),
            );
            return;
        }
        if value.is_null() && matches!(schema.declared, DeclaredType::Nullable(_)) {
            return;
        }

        self.constraints(&schema.constraints, value);

        let mut declared = &schema.declared;
        while let DeclaredType::Nullable(inner) = declared {
            declared = inner;
        }
        match declared {
            DeclaredType::Object(reference) => match self.types.get(&reference.uri) {
                Some(descriptor) => self.descriptor(descriptor, value),
                None => self.report(
                    ConstraintKind::UnknownType,
                    format!("no compiled type '{}'", reference.uri),
                ),
            },
            DeclaredType::Array(items) => {
                if let Some(elements) = value.as_array() {
                    for (i, element) in elements.iter().enumerate() {
                        self.path.push(PathSegment::Index(i));
                        self.value(items, element);
                        self.path.pop();
                    }
                }
            }
            _ => {}
        }
    }

    fn constraints(&mut self, c: &Constraints, value: &Value) {
        if let Some(n) = value.as_f64() {
            self.numeric(c, n, value);
        }
        if let Some(s) = value.as_str() {
            let length = s.chars().count() as u64;
            if let Some(min) = c.min_length {
                if length < min {
                    self.report(
                        ConstraintKind::MinLength,
                        format!("{} is shorter than {} characters", value, min),
                    );
                }
            }
            if let Some(max) = c.max_length {
                if length > max {
                    self.report(
                        ConstraintKind::MaxLength,
                        format!("{} is longer than {} characters", value, max),
                    );
                }
            }
            for pattern in &c.patterns {
                if !pattern.is_match(s) {
                    self.report(
                        ConstraintKind::Pattern,
                        format!("{} does not match '{}'", value, pattern.as_str()),
                    );
                }
            }
        }
        if let Some(format) = &c.format {
            if !format.is_valid(value) {
                self.report(
                    ConstraintKind::Format,
                    format!("{} is not a valid {}", value, format.name()),
                );
            }
        }
        if let Some(items) = value.as_array() {
            let count = items.len() as u64;
            if let Some(min) = c.min_items {
                if count < min {
                    self.report(
                        ConstraintKind::MinItems,
                        format!("expected at least {} items, got {}", min, count),
                    );
                }
            }
            if let Some(max) = c.max_items {
                if count > max {
                    self.report(
                        ConstraintKind::MaxItems,
                        format!("expected at most {} items, got {}", max, count),
                    );
                }
            }
            if c.unique_items {
                let mut seen = HashSet::new();
                if !items.iter().all(|item| seen.insert(canonical(item))) {
                    self.report(
                        ConstraintKind::UniqueItems,
                        "array items are not unique".to_string(),
                    );
                }
            }
        }
        if let Some(members) = &c.enumeration {
            let key = canonical(value);
            if !members.iter().any(|m| canonical(m) == key) {
                let listed: Vec<String> = members.iter().map(Value::to_string).collect();
                self.report(
                    ConstraintKind::Enum,
                    format!("{} is not one of [{}]", value, listed.join(", ")),
                );
            }
        }
        if let Some(constant) = &c.constant {
            if canonical(constant) != canonical(value) {
                self.report(
                    ConstraintKind::Const,
                    format!("expected {}, got {}", constant, value),
                );
            }
        }
    }

    fn numeric(&mut self, c: &Constraints, n: f64, value: &Value) {
        if let Some(min) = c.minimum {
            if n < min {
                self.report(
                    ConstraintKind::Minimum,
                    format!("{} is less than the minimum of {}", value, min),
                );
            }
        }
        if let Some(max) = c.maximum {
            if n > max {
                self.report(
                    ConstraintKind::Maximum,
                    format!("{} is greater than the maximum of {}", value, max),
                );
            }
        }
        if let Some(min) = c.exclusive_minimum {
            if n <= min {
                self.report(
                    ConstraintKind::ExclusiveMinimum,
                    format!("{} must be greater than {}", value, min),
                );
            }
        }
        if let Some(max) = c.exclusive_maximum {
            if n >= max {
                self.report(
                    ConstraintKind::ExclusiveMaximum,
                    format!("{} must be less than {}", value, max),
                );
            }
        }
        if let Some(divisor) = c.multiple_of {
            let quotient = n / divisor;
            if (quotient - quotient.round()).abs() > 1e-9 {
                self.report(
                    ConstraintKind::MultipleOf,
                    format!("{} is not a multiple of {}", value, divisor),
                );
            }
        }
    }
}

fn type_matches(declared: &DeclaredType, value: &Value) -> bool {
    match declared {
        DeclaredType::Any => true,
        DeclaredType::Scalar(kind) => kind.matches(value),
        DeclaredType::Union(kinds) => kinds.iter().any(|k| k.matches(value)),
        DeclaredType::Nullable(inner) => value.is_null() || type_matches(inner, value),
        // The referenced descriptor decides (composite types accept non-objects).
        DeclaredType::Object(_) => true,
        DeclaredType::Array(_) => value.is_array(),
    }
}

/// Canonical text of a value: object keys sorted, integral floats written
/// as integers. Equal JSON values have equal canonical text.
pub(crate) fn canonical(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let inner: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        other => other.to_string(),
    }
}

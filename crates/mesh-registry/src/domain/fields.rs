//! # Field Extraction
//!
//! A configuration type describes its leaf fields to a [`SchemaBuilder`]; the
//! builder flattens nested sections into dotted paths and derives each
//! environment key.
//!
//! ## Tag Grammar
//!
//! Comma-separated, unknown parts ignored:
//!
//! | Part              | Effect                                   |
//! |-------------------|------------------------------------------|
//! | `default:<v>`     | default value                            |
//! | `env:<NAME>`      | explicit environment key (no prefix)     |
//! | `service:<o/r>`   | dependency on another service            |
//! | `required`        | must be provided                         |
//! | `mask`, `noprint` | secret                                   |
//!
//! Environment key: `PREFIX_` + each path segment in SHOUTY_SNAKE_CASE,
//! joined by `_` (`APP` + `DB.MaxConns` → `APP_DB_MAX_CONNS`).

use super::errors::SchemaError;
use heck::ToShoutySnakeCase;
use mesh_types::{FieldDescriptor, ServiceIdentity};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum section nesting depth.
pub const MAX_DEPTH: usize = 32;

/// A type that can describe its configuration fields.
pub trait Configurable {
    /// Declare leaf fields and nested sections, in declaration order.
    fn describe(schema: &mut SchemaBuilder);
}

/// Leaf value types and their semantic type names.
pub trait SemanticType {
    fn type_name() -> String;
}

macro_rules! semantic_type {
    ($name:literal => $($ty:ty),+) => {
        $(impl SemanticType for $ty {
            fn type_name() -> String {
                $name.to_string()
            }
        })+
    };
}

semantic_type!("string" => String);
semantic_type!("bool" => bool);
semantic_type!("int" => i8, i16, i32, i64, isize);
semantic_type!("uint" => u8, u16, u32, u64, usize);
semantic_type!("float" => f32, f64);
semantic_type!("duration" => Duration);
semantic_type!("path" => PathBuf);
semantic_type!("address" => SocketAddr);
semantic_type!("service" => ServiceIdentity);

impl<T: SemanticType> SemanticType for Vec<T> {
    fn type_name() -> String {
        format!("[]{}", T::type_name())
    }
}

impl<T: SemanticType> SemanticType for Option<T> {
    fn type_name() -> String {
        T::type_name()
    }
}

/// Collects field descriptors while a configuration type describes itself.
pub struct SchemaBuilder {
    prefix: String,
    scope: Vec<String>,
    fields: Vec<FieldDescriptor>,
    error: Option<SchemaError>,
}

impl SchemaBuilder {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim().to_uppercase(),
            scope: Vec::new(),
            fields: Vec::new(),
            error: None,
        }
    }

    /// Declare a leaf field of type `T`.
    pub fn field<T: SemanticType>(&mut self, name: &str, tags: &str) -> &mut Self {
        self.leaf(name, &T::type_name(), tags)
    }

    /// Declare a leaf field with an explicit semantic type name.
    pub fn leaf(&mut self, name: &str, type_name: &str, tags: &str) -> &mut Self {
        if self.error.is_some() || !self.check_name(name) {
            return self;
        }
        let mut segments = self.scope.clone();
        segments.push(name.to_string());
        match self.descriptor(&segments, type_name, tags) {
            Ok(descriptor) => self.fields.push(descriptor),
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Declare a nested section; its fields are flattened under `name.`.
    pub fn nested<C: Configurable>(&mut self, name: &str) -> &mut Self {
        if self.error.is_some() || !self.check_name(name) {
            return self;
        }
        if self.scope.len() >= MAX_DEPTH {
            self.error = Some(SchemaError::TooDeep {
                path: self.scope.join("."),
                max: MAX_DEPTH,
            });
            return self;
        }
        self.scope.push(name.to_string());
        C::describe(self);
        self.scope.pop();
        self
    }

    /// Declare an embedded section; its fields join the current scope.
    pub fn embedded<C: Configurable>(&mut self) -> &mut Self {
        if self.error.is_none() {
            C::describe(self);
        }
        self
    }

    fn check_name(&mut self, name: &str) -> bool {
        let valid = !name.is_empty() && !name.contains('.') && !name.contains(char::is_whitespace);
        if !valid {
            self.error = Some(SchemaError::InvalidName {
                scope: self.scope.join("."),
                name: name.to_string(),
            });
        }
        valid
    }

    fn descriptor(
        &self,
        segments: &[String],
        type_name: &str,
        tags: &str,
    ) -> Result<FieldDescriptor, SchemaError> {
        let path = segments.join(".");
        let mut descriptor =
            FieldDescriptor::new(path.clone(), type_name, build_env_key(&self.prefix, segments));

        for part in tags.split(',').map(str::trim) {
            if let Some(value) = part.strip_prefix("default:") {
                descriptor.default = value.to_string();
            } else if let Some(value) = part.strip_prefix("env:") {
                if value.trim().is_empty() {
                    return Err(SchemaError::EmptyEnvKey { path });
                }
                descriptor.env_key = value.trim().to_string();
            } else if let Some(value) = part.strip_prefix("service:") {
                let identity = value.trim().parse::<ServiceIdentity>().map_err(|source| {
                    SchemaError::InvalidDependency {
                        path: path.clone(),
                        value: value.to_string(),
                        source,
                    }
                })?;
                descriptor.dependency = Some(identity);
            } else {
                match part {
                    "required" => descriptor.required = true,
                    "mask" | "noprint" => descriptor.secret = true,
                    _ => {}
                }
            }
        }
        Ok(descriptor)
    }

    fn finish(self) -> Result<Vec<FieldDescriptor>, SchemaError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut paths: HashSet<&str> = HashSet::new();
        let mut env_keys: HashMap<&str, &str> = HashMap::new();
        for field in &self.fields {
            if !paths.insert(&field.path) {
                return Err(SchemaError::DuplicatePath(field.path.clone()));
            }
            if let Some(first) = env_keys.insert(&field.env_key, &field.path) {
                return Err(SchemaError::DuplicateEnvKey {
                    env_key: field.env_key.clone(),
                    first: first.to_string(),
                    second: field.path.clone(),
                });
            }
        }
        Ok(self.fields)
    }
}

fn build_env_key(prefix: &str, segments: &[String]) -> String {
    let key = segments
        .iter()
        .map(|s| s.to_shouty_snake_case())
        .collect::<Vec<_>>()
        .join("_");
    if prefix.is_empty() {
        key
    } else {
        format!("{prefix}_{key}")
    }
}

/// Extract the ordered leaf descriptors of `C`.
pub fn extract_fields<C: Configurable>(prefix: &str) -> Result<Vec<FieldDescriptor>, SchemaError> {
    extract_with(prefix, C::describe)
}

/// Extract descriptors from an ad-hoc description.
pub fn extract_with(
    prefix: &str,
    describe: impl FnOnce(&mut SchemaBuilder),
) -> Result<Vec<FieldDescriptor>, SchemaError> {
    let mut schema = SchemaBuilder::new(prefix);
    describe(&mut schema);
    schema.finish()
}

/// Declared dependencies, deduplicated, in declaration order.
#[must_use]
pub fn dependencies(fields: &[FieldDescriptor]) -> Vec<ServiceIdentity> {
    let mut deps: Vec<ServiceIdentity> = Vec::new();
    for dep in fields.iter().filter_map(|f| f.dependency.as_ref()) {
        if !deps.contains(dep) {
            deps.push(dep.clone());
        }
    }
    deps
}

/// Fields marked secret.
#[must_use]
pub fn secrets(fields: &[FieldDescriptor]) -> Vec<&FieldDescriptor> {
    fields.iter().filter(|f| f.secret).collect()
}

/// Fields marked required.
#[must_use]
pub fn required(fields: &[FieldDescriptor]) -> Vec<&FieldDescriptor> {
    fields.iter().filter(|f| f.required).collect()
}

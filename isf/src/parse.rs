//! Convert the JSON metadata into attributes and passes.
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use log::warn;
use serde_json::{Map, Value as Json};

use crate::{
    attribute::{Attribute, AttributeKind, Value},
    error::ParseDocError,
    glsl::is_reserved_name,
    pass::{DimensionExpr, PassTarget, RenderPass},
};

/// Variables always available to pass dimension expressions.
pub const BUILTIN_VARIABLES: [&str; 3] = ["WIDTH", "HEIGHT", "TIME"];

#[derive(Debug, Default)]
pub struct Metadata {
    pub description: Option<String>,
    pub credit: Option<String>,
    pub vsn: Option<String>,
    pub isf_vsn: Option<String>,
    pub categories: Vec<String>,
    pub inputs: IndexMap<String, Attribute>,
    pub imports: IndexMap<String, Attribute>,
    pub render_passes: Vec<RenderPass>,
    pub persistent_targets: IndexMap<String, PassTarget>,
    pub temp_targets: IndexMap<String, PassTarget>,
}

/// Errors are returned in strict mode and logged and skipped otherwise.
#[derive(Debug, Clone, Copy)]
struct Strictness {
    strict: bool,
}

impl Strictness {
    fn check<T>(&self, result: Result<T, ParseDocError>) -> Result<Option<T>, ParseDocError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.strict => Err(e),
            Err(e) => {
                warn!("Skipping invalid ISF metadata: {e}");
                Ok(None)
            }
        }
    }
}

pub fn parse_metadata(
    json: &str,
    imports_dir: &Path,
    strict: bool,
) -> Result<Metadata, ParseDocError> {
    let mut metadata = parse_root(json, imports_dir, Strictness { strict })?;

    // A shader without passes still renders once to the output.
    if metadata.render_passes.is_empty() {
        metadata.render_passes.push(RenderPass { target: None });
    }

    warn_unknown_variables(&metadata);

    Ok(metadata)
}

fn parse_root(
    json: &str,
    imports_dir: &Path,
    strictness: Strictness,
) -> Result<Metadata, ParseDocError> {
    let root = serde_json::from_str::<Json>(json).map_err(ParseDocError::from);
    let root = match strictness.check(root)? {
        Some(root) => root,
        None => return Ok(Metadata::default()),
    };
    let root = root.as_object().ok_or(invalid("metadata", "an object"));
    let root = match strictness.check(root)? {
        Some(root) => root,
        None => return Ok(Metadata::default()),
    };

    let mut metadata = Metadata {
        description: strictness.check(optional_string(root, "DESCRIPTION"))?.flatten(),
        credit: strictness.check(optional_string(root, "CREDIT"))?.flatten(),
        vsn: strictness.check(optional_string(root, "VSN"))?.flatten(),
        isf_vsn: strictness.check(optional_string(root, "ISFVSN"))?.flatten(),
        ..Default::default()
    };

    if let Some(categories) = strictness.check(optional_array(root, "CATEGORIES"))?.flatten() {
        for category in categories {
            if let Some(category) = strictness.check(
                category
                    .as_str()
                    .ok_or(invalid("CATEGORIES", "an array of strings")),
            )? {
                metadata.categories.push(category.to_string());
            }
        }
    }

    if let Some(inputs) = strictness.check(optional_array(root, "INPUTS"))?.flatten() {
        for (i, input) in inputs.iter().enumerate() {
            let attribute = match strictness.check(parse_input(i, input))? {
                Some(attribute) => attribute,
                None => continue,
            };
            if metadata.inputs.contains_key(&attribute.name) || is_reserved_name(&attribute.name)
            {
                strictness.check::<()>(Err(ParseDocError::DuplicateInput {
                    name: attribute.name,
                }))?;
            } else {
                metadata.inputs.insert(attribute.name.clone(), attribute);
            }
        }
    }

    if let Some(imported) = root.get("IMPORTED") {
        for result in parse_imports(imported, imports_dir) {
            let attribute = match strictness.check(result)? {
                Some(attribute) => attribute,
                None => continue,
            };
            if metadata.inputs.contains_key(&attribute.name)
                || metadata.imports.contains_key(&attribute.name)
                || is_reserved_name(&attribute.name)
            {
                strictness.check::<()>(Err(ParseDocError::DuplicateInput {
                    name: attribute.name,
                }))?;
            } else {
                metadata.imports.insert(attribute.name.clone(), attribute);
            }
        }
    }

    // Older files list persistent buffers separately from passes.
    let persistent_buffers = match root.get("PERSISTENT_BUFFERS") {
        Some(buffers) => strictness
            .check(parse_persistent_buffers(buffers))?
            .unwrap_or_default(),
        None => IndexMap::new(),
    };

    if let Some(passes) = strictness.check(optional_array(root, "PASSES"))?.flatten() {
        for (i, pass) in passes.iter().enumerate() {
            let target = parse_pass(i, pass, &persistent_buffers, strictness);
            let target = match strictness.check(target)? {
                Some(target) => target,
                None => continue,
            };
            match target {
                Some(target) => {
                    if metadata.inputs.contains_key(&target.name)
                        || metadata.imports.contains_key(&target.name)
                        || metadata.persistent_targets.contains_key(&target.name)
                        || metadata.temp_targets.contains_key(&target.name)
                        || is_reserved_name(&target.name)
                    {
                        strictness.check::<()>(Err(ParseDocError::DuplicatePassTarget {
                            name: target.name,
                        }))?;
                        continue;
                    }

                    metadata.render_passes.push(RenderPass {
                        target: Some(target.name.clone()),
                    });
                    if target.persistent {
                        metadata
                            .persistent_targets
                            .insert(target.name.clone(), target);
                    } else {
                        metadata.temp_targets.insert(target.name.clone(), target);
                    }
                }
                None => metadata.render_passes.push(RenderPass { target: None }),
            }
        }
    }

    for name in persistent_buffers.keys() {
        if !metadata.persistent_targets.contains_key(name) {
            warn!("Persistent buffer {name:?} is not the TARGET of any pass");
        }
    }

    Ok(metadata)
}

fn invalid(key: impl Into<String>, expected: &'static str) -> ParseDocError {
    ParseDocError::InvalidField {
        key: key.into(),
        expected,
    }
}

fn optional_string(object: &Map<String, Json>, key: &str) -> Result<Option<String>, ParseDocError> {
    match object.get(key) {
        Some(Json::String(s)) => Ok(Some(s.clone())),
        Some(Json::Null) | None => Ok(None),
        Some(_) => Err(invalid(key, "a string")),
    }
}

fn optional_array<'a>(
    object: &'a Map<String, Json>,
    key: &str,
) -> Result<Option<&'a Vec<Json>>, ParseDocError> {
    match object.get(key) {
        Some(Json::Array(a)) => Ok(Some(a)),
        Some(Json::Null) | None => Ok(None),
        Some(_) => Err(invalid(key, "an array")),
    }
}

fn parse_input(index: usize, input: &Json) -> Result<Attribute, ParseDocError> {
    let input = input
        .as_object()
        .ok_or(invalid(format!("INPUTS[{index}]"), "an object"))?;

    let name = input
        .get("NAME")
        .and_then(Json::as_str)
        .filter(|n| !n.is_empty())
        .ok_or(ParseDocError::MissingInputName { index })?;

    let ty = input
        .get("TYPE")
        .and_then(Json::as_str)
        .ok_or(invalid(format!("{name}.TYPE"), "a string"))?;
    let kind = AttributeKind::from_type_str(ty).ok_or_else(|| ParseDocError::UnknownInputType {
        name: name.to_string(),
        ty: ty.to_string(),
    })?;

    let mut attribute = Attribute::new(name, kind);
    attribute.label = optional_string(input, "LABEL")?;
    attribute.description = optional_string(input, "DESCRIPTION")?;

    if kind.is_audio() {
        // MAX is the requested number of audio samples instead of a value.
        attribute.sample_count = match input.get("MAX") {
            Some(max) => Some(
                max.as_f64()
                    .filter(|m| *m >= 0.0)
                    .ok_or(invalid(format!("{name}.MAX"), "a positive number"))?
                    as u32,
            ),
            None => None,
        };
    } else {
        attribute.default = parse_value(name, "DEFAULT", kind, input.get("DEFAULT"))?;
        attribute.min = parse_value(name, "MIN", kind, input.get("MIN"))?;
        attribute.max = parse_value(name, "MAX", kind, input.get("MAX"))?;
        attribute.identity = parse_value(name, "IDENTITY", kind, input.get("IDENTITY"))?;
    }

    if kind == AttributeKind::Long {
        if let Some(values) = optional_array(input, "VALUES")? {
            attribute.values = values
                .iter()
                .map(|v| v.as_f64().map(|v| v.round() as i32))
                .collect::<Option<_>>()
                .ok_or(invalid(format!("{name}.VALUES"), "an array of numbers"))?;
        }
        if let Some(labels) = optional_array(input, "LABELS")? {
            attribute.labels = labels
                .iter()
                .map(|l| l.as_str().map(ToString::to_string))
                .collect::<Option<_>>()
                .ok_or(invalid(format!("{name}.LABELS"), "an array of strings"))?;
        }
    }

    Ok(attribute)
}

fn parse_value(
    name: &str,
    key: &str,
    kind: AttributeKind,
    value: Option<&Json>,
) -> Result<Option<Value>, ParseDocError> {
    let value = match value {
        Some(Json::Null) | None => return Ok(None),
        Some(value) => value,
    };

    let error = |expected| invalid(format!("{name}.{key}"), expected);

    match kind {
        AttributeKind::Bool | AttributeKind::Event => {
            let b = match value {
                Json::Bool(b) => *b,
                Json::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
                _ => return Err(error("a bool")),
            };
            if kind == AttributeKind::Bool {
                Ok(Some(Value::Bool(b)))
            } else {
                Ok(Some(Value::Event(b)))
            }
        }
        AttributeKind::Long => value
            .as_f64()
            .map(|v| Some(Value::Long(v.round() as i32)))
            .ok_or(error("a number")),
        AttributeKind::Float => value
            .as_f64()
            .map(|v| Some(Value::Float(v)))
            .ok_or(error("a number")),
        AttributeKind::Point2D => match floats(value).as_deref() {
            Some([x, y]) => Ok(Some(Value::Point2D([*x, *y]))),
            _ => Err(error("an array of 2 numbers")),
        },
        AttributeKind::Color => match floats(value).as_deref() {
            Some([r, g, b]) => Ok(Some(Value::Color([*r, *g, *b, 1.0]))),
            Some([r, g, b, a]) => Ok(Some(Value::Color([*r, *g, *b, *a]))),
            _ => Err(error("an array of 3 or 4 numbers")),
        },
        // Images have no values.
        _ => Ok(None),
    }
}

fn floats(value: &Json) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(Json::as_f64).collect()
}

fn parse_imports(imported: &Json, imports_dir: &Path) -> Vec<Result<Attribute, ParseDocError>> {
    match imported {
        // "IMPORTED": { "name": { "PATH": "image.png" } }
        Json::Object(imports) => imports
            .iter()
            .map(|(name, import)| parse_import(name, import, imports_dir))
            .collect(),
        // "IMPORTED": [ { "NAME": "name", "PATH": "image.png" } ]
        Json::Array(imports) => imports
            .iter()
            .enumerate()
            .map(|(i, import)| {
                let name = import
                    .get("NAME")
                    .and_then(Json::as_str)
                    .ok_or(invalid(format!("IMPORTED[{i}].NAME"), "a string"))?;
                parse_import(name, import, imports_dir)
            })
            .collect(),
        Json::Null => Vec::new(),
        _ => vec![Err(invalid("IMPORTED", "an object"))],
    }
}

fn parse_import(name: &str, import: &Json, imports_dir: &Path) -> Result<Attribute, ParseDocError> {
    let (path, kind) = match import {
        Json::String(path) => (path.as_str(), AttributeKind::Image),
        Json::Object(import) => {
            let path = import
                .get("PATH")
                .and_then(Json::as_str)
                .ok_or_else(|| ParseDocError::InvalidImport {
                    name: name.to_string(),
                })?;
            let kind = match import.get("TYPE").and_then(Json::as_str) {
                Some("cube") => AttributeKind::Cube,
                _ => AttributeKind::Image,
            };
            (path, kind)
        }
        _ => {
            return Err(ParseDocError::InvalidImport {
                name: name.to_string(),
            })
        }
    };

    let mut attribute = Attribute::new(name, kind);
    attribute.description = Some(imports_dir.join(path).to_string_lossy().into_owned());
    Ok(attribute)
}

fn parse_persistent_buffers(
    buffers: &Json,
) -> Result<IndexMap<String, Map<String, Json>>, ParseDocError> {
    match buffers {
        // "PERSISTENT_BUFFERS": ["bufferA"]
        Json::Array(names) => names
            .iter()
            .map(|n| {
                n.as_str()
                    .map(|n| (n.to_string(), Map::new()))
                    .ok_or(invalid("PERSISTENT_BUFFERS", "an array of strings"))
            })
            .collect(),
        // "PERSISTENT_BUFFERS": { "bufferA": { "WIDTH": 1 } }
        Json::Object(buffers) => Ok(buffers
            .iter()
            .map(|(name, settings)| {
                let settings = settings.as_object().cloned().unwrap_or_default();
                (name.clone(), settings)
            })
            .collect()),
        _ => Err(invalid("PERSISTENT_BUFFERS", "an array or object")),
    }
}

fn parse_pass(
    index: usize,
    pass: &Json,
    persistent_buffers: &IndexMap<String, Map<String, Json>>,
    strictness: Strictness,
) -> Result<Option<PassTarget>, ParseDocError> {
    let pass = pass
        .as_object()
        .ok_or(invalid(format!("PASSES[{index}]"), "an object"))?;

    let name = match optional_string(pass, "TARGET")? {
        Some(name) if !name.is_empty() => name,
        _ => return Ok(None),
    };

    let buffer = persistent_buffers.get(&name);
    // Settings on the pass take priority over the legacy buffer settings.
    let get = |key: &str| pass.get(key).or_else(|| buffer.and_then(|b| b.get(key)));

    // Invalid fields use their defaults in permissive mode without dropping the pass.
    let mut target = PassTarget::new(name);
    target.width = strictness
        .check(dimension(index, "WIDTH", get("WIDTH")))?
        .flatten();
    target.height = strictness
        .check(dimension(index, "HEIGHT", get("HEIGHT")))?
        .flatten();
    target.float = strictness
        .check(flag(index, "FLOAT", get("FLOAT")))?
        .unwrap_or_default();
    target.persistent = buffer.is_some()
        || strictness
            .check(flag(index, "PERSISTENT", pass.get("PERSISTENT")))?
            .unwrap_or_default();

    Ok(Some(target))
}

fn dimension(
    index: usize,
    key: &str,
    value: Option<&Json>,
) -> Result<Option<DimensionExpr>, ParseDocError> {
    match value {
        Some(Json::String(text)) => Ok(Some(DimensionExpr::parse(text.as_str()))),
        Some(Json::Number(n)) => Ok(Some(DimensionExpr::parse(n.to_string()))),
        Some(Json::Null) | None => Ok(None),
        Some(_) => Err(invalid(
            format!("PASSES[{index}].{key}"),
            "a string or number",
        )),
    }
}

fn flag(index: usize, key: &str, value: Option<&Json>) -> Result<bool, ParseDocError> {
    match value {
        Some(Json::Bool(b)) => Ok(*b),
        Some(Json::Number(n)) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        Some(Json::Null) | None => Ok(false),
        Some(_) => Err(invalid(format!("PASSES[{index}].{key}"), "a bool")),
    }
}

fn warn_unknown_variables(metadata: &Metadata) {
    let known: IndexSet<&str> = BUILTIN_VARIABLES
        .into_iter()
        .chain(
            metadata
                .inputs
                .values()
                .filter(|i| i.kind.is_scalar())
                .map(|i| i.name.as_str()),
        )
        .collect();

    for target in metadata
        .persistent_targets
        .values()
        .chain(metadata.temp_targets.values())
    {
        for dimension in [&target.width, &target.height].into_iter().flatten() {
            if let Some(expr) = &dimension.expr {
                for variable in expr.variables() {
                    if !known.contains(variable) {
                        // Unknown variables still evaluate to 0.0 for compatibility.
                        warn!(
                            "Unknown variable {variable:?} in {:?} for {:?} will evaluate to 0",
                            dimension.text, target.name
                        );
                    }
                }
            }
        }
    }
}

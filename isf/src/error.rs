use std::path::PathBuf;

use thiserror::Error;

use crate::{attribute::AttributeKind, glsl::GlslVersion, TextureType};

#[derive(Debug, Error)]
pub enum LoadDocError {
    #[error("error reading ISF file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing ISF file")]
    Parse(#[from] ParseDocError),
}

#[derive(Debug, Error)]
pub enum ParseDocError {
    #[error("failed to find a JSON metadata block in the fragment shader")]
    MissingMetadata,

    #[error("error parsing JSON metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected {key} to be {expected}")]
    InvalidField {
        key: String,
        expected: &'static str,
    },

    #[error("input {index} is missing a NAME")]
    MissingInputName { index: usize },

    #[error("input {name:?} has unsupported TYPE {ty:?}")]
    UnknownInputType { name: String, ty: String },

    #[error("input {name:?} is declared more than once")]
    DuplicateInput { name: String },

    #[error("pass target {name:?} is declared more than once")]
    DuplicatePassTarget { name: String },

    #[error("imported image {name:?} does not specify a PATH")]
    InvalidImport { name: String },
}

#[derive(Debug, Error)]
pub enum GenerateSourceError {
    #[error("document has no fragment shader source")]
    MissingFragmentSource,

    #[error("{texture_type:?} textures for {name:?} are not supported by {version:?}")]
    UnsupportedTextureType {
        name: String,
        texture_type: TextureType,
        version: GlslVersion,
    },
}

#[derive(Debug, PartialEq, Error)]
pub enum ParseExprError {
    #[error("unexpected character {c:?} at position {position}")]
    UnexpectedChar { c: char, position: usize },

    #[error("unexpected token {token:?} at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown function {name:?}")]
    UnknownFunction { name: String },

    #[error("expression is nested more than {max} levels deep")]
    TooDeep { max: usize },

    #[error("function {name:?} expects {expected} arguments but found {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, PartialEq, Error)]
pub enum SetValueError {
    #[error("no input named {name:?}")]
    UnknownInput { name: String },

    #[error("no pass target named {name:?}")]
    UnknownPassTarget { name: String },

    #[error("input {name:?} of kind {kind:?} cannot store this value")]
    KindMismatch { name: String, kind: AttributeKind },
}

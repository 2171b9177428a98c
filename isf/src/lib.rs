//! # isf
//! A library for parsing Interactive Shader Format (ISF) files and generating GLSL from them.
//!
//! An ISF file is a GLSL fragment shader with a JSON metadata block describing
//! the shader's inputs, render passes, and imported images.
//! The raw shader code omits declarations for these inputs,
//! so the code has to be generated for the target GLSL version before compiling.
//!
//! # Getting Started
//! ```rust no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use isf::{glsl::GlslVersion, IsfDoc, LoadOptions};
//!
//! let doc = IsfDoc::from_file("Blur.fs", LoadOptions::default())?;
//! for input in doc.inputs() {
//!     println!("{}: {}", input.name, input.kind.type_str());
//! }
//!
//! // Resize buffers before rendering.
//! doc.eval_buffer_dimensions_with_render_size([1920, 1080]);
//!
//! let source = doc.generate_shader_source(GlslVersion::Gl4, true)?;
//! println!("{}", source.fragment);
//! # Ok(())
//! # }
//! ```
//!
//! # Design
//! [IsfDoc] is immutable after parsing except for a small amount of per frame state
//! like input values, attached buffers, and resolved buffer sizes.
//! This state is guarded by a single re-entrant lock, so documents can be shared between threads.
//!
//! Textures are owned by the renderer. The renderer attaches [Buffer] handles to a document
//! to select the sampler type used for each image in the generated code.
use std::{fmt::Debug, sync::Arc};

pub mod attribute;
pub mod error;
pub mod expr;
pub mod extract;
pub mod glsl;
pub mod pass;

mod doc;
mod parse;

pub use doc::{FileType, IsfDoc};
pub use parse::BUILTIN_VARIABLES;

/// The sampler type used to read an image in the generated code.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum TextureType {
    /// `sampler2D` with normalized coordinates.
    TwoD,
    /// `sampler2DRect` with pixel coordinates.
    Rect,
    /// `samplerCube`
    Cube,
}

impl TextureType {
    /// The character used for this type in [IsfDoc::texture_type_string].
    pub fn type_char(&self) -> char {
        match self {
            TextureType::TwoD => '2',
            TextureType::Rect => 'R',
            TextureType::Cube => 'C',
        }
    }

    pub fn sampler_glsl(&self) -> &'static str {
        match self {
            TextureType::TwoD => "sampler2D",
            TextureType::Rect => "sampler2DRect",
            TextureType::Cube => "samplerCube",
        }
    }
}

/// A texture owned by the renderer.
pub trait Buffer: Debug + Send + Sync {
    fn texture_type(&self) -> TextureType;
}

/// A shared handle to a renderer owned [Buffer].
pub type BufferRef = Arc<dyn Buffer>;

/// Identifies the renderer currently using a document without owning it.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct SceneId(pub u64);

/// Options for creating an [IsfDoc].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct LoadOptions {
    /// The initial scene associated with the document.
    pub scene: Option<SceneId>,
    /// Return an error for invalid metadata instead of logging and skipping it.
    pub strict: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            scene: None,
            strict: true,
        }
    }
}

impl LoadOptions {
    /// Skip invalid metadata with a warning.
    pub fn permissive() -> Self {
        Self {
            scene: None,
            strict: false,
        }
    }
}

//! Generate complete GLSL shaders for a specific version from an [IsfDoc].
//!
//! The raw ISF code only contains the shader body.
//! Uniform declarations, image sampling functions, and the version specific
//! preamble are generated and the `IMG_*` image macros are replaced with function calls.
//!
//! The generated vertex shader expects a `vec2 VERTDATA` attribute
//! with clip space positions for a full screen quad.
use std::fmt::Write;

use indexmap::IndexMap;
use indoc::{formatdoc, indoc};
use log::warn;

use crate::{attribute::AttributeKind, error::GenerateSourceError, IsfDoc, TextureType};

/// The vertex shader used when an ISF file doesn't provide one.
pub const PASSTHROUGH_VERTEX: &str = include_str!("shader/passthrough.vert");

/// The name of the uniform block when packing uniforms into a block.
pub const UNIFORM_BLOCK_NAME: &str = "ISFUniforms";

const IMAGE_MACROS: [&str; 5] = [
    "IMG_THIS_NORM_PIXEL",
    "IMG_THIS_PIXEL",
    "IMG_NORM_PIXEL",
    "IMG_PIXEL",
    "IMG_SIZE",
];

/// Uniforms set by the renderer for every pass.
const BUILTIN_UNIFORMS: [(&str, &str); 6] = [
    ("int", "PASSINDEX"),
    ("vec2", "RENDERSIZE"),
    ("float", "TIME"),
    ("float", "TIMEDELTA"),
    ("vec4", "DATE"),
    ("int", "FRAMEINDEX"),
];

/// Suffixes of the per image uniforms declared as `_NAME_suffix`.
const IMAGE_UNIFORM_SUFFIXES: [&str; 3] = ["_imgRect", "_imgSize", "_flip"];

/// Returns `true` if `name` would collide with a generated uniform.
pub(crate) fn is_reserved_name(name: &str) -> bool {
    BUILTIN_UNIFORMS.iter().any(|(_, n)| *n == name)
        || (name.starts_with('_')
            && IMAGE_UNIFORM_SUFFIXES
                .iter()
                .any(|suffix| name.len() > suffix.len() + 1 && name.ends_with(suffix)))
}

/// The shading language version to target.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum GlslVersion {
    /// OpenGL 2.x with `#version 110`.
    Gl2,
    /// OpenGL ES 2.0 with `#version 100`.
    GlEs2,
    /// OpenGL 3.2 core with `#version 150`.
    Gl3,
    /// OpenGL 4.1 core with `#version 410`.
    Gl4,
    /// OpenGL ES 3.0 with `#version 300 es`.
    GlEs3,
}

impl GlslVersion {
    pub fn version_directive(&self) -> &'static str {
        match self {
            GlslVersion::Gl2 => "#version 110",
            GlslVersion::GlEs2 => "#version 100",
            GlslVersion::Gl3 => "#version 150",
            GlslVersion::Gl4 => "#version 410",
            GlslVersion::GlEs3 => "#version 300 es",
        }
    }

    pub fn is_es(&self) -> bool {
        matches!(self, GlslVersion::GlEs2 | GlslVersion::GlEs3)
    }

    /// Versions using `in`/`out` and `texture` instead of `varying` and `texture2D`.
    pub fn is_modern(&self) -> bool {
        matches!(
            self,
            GlslVersion::Gl3 | GlslVersion::Gl4 | GlslVersion::GlEs3
        )
    }

    pub fn supports_uniform_blocks(&self) -> bool {
        self.is_modern()
    }

    fn precision(&self) -> Option<&'static str> {
        match self {
            GlslVersion::GlEs2 => Some("mediump"),
            GlslVersion::GlEs3 => Some("highp"),
            _ => None,
        }
    }

    fn texture_function(&self, texture_type: TextureType) -> &'static str {
        match (self.is_modern(), texture_type) {
            (true, _) => "texture",
            (false, TextureType::TwoD) => "texture2D",
            (false, TextureType::Rect) => "texture2DRect",
            (false, TextureType::Cube) => "textureCube",
        }
    }
}

/// Generated shader code ready for compilation.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ShaderSource {
    pub fragment: String,
    pub vertex: String,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Stage {
    Vertex,
    Fragment,
}

/// Generate shader code for `doc` using the texture type for each image in `samplers`.
///
/// Non image uniforms are packed into a `std140` uniform block if `use_uniform_block` is `true`.
/// Samplers are always declared individually since they can't be placed in uniform blocks.
pub fn generate_shader_source(
    doc: &IsfDoc,
    samplers: &IndexMap<String, TextureType>,
    version: GlslVersion,
    use_uniform_block: bool,
) -> Result<ShaderSource, GenerateSourceError> {
    if doc.fragment_source().trim().is_empty() {
        return Err(GenerateSourceError::MissingFragmentSource);
    }

    // ES has no rectangle textures.
    if version.is_es() {
        if let Some((name, texture_type)) = samplers.iter().find(|(_, t)| **t == TextureType::Rect)
        {
            return Err(GenerateSourceError::UnsupportedTextureType {
                name: name.clone(),
                texture_type: *texture_type,
                version,
            });
        }
    }

    let use_uniform_block = if use_uniform_block && !version.supports_uniform_blocks() {
        warn!("Uniform blocks are not supported by {version:?}. Declaring uniforms individually.");
        false
    } else {
        use_uniform_block
    };

    let declarations = uniform_declarations(doc, samplers, use_uniform_block);
    let functions = sampling_functions(samplers, version);

    let fragment = assemble_source(
        Stage::Fragment,
        doc.fragment_source(),
        &declarations,
        &functions,
        samplers,
        version,
    );
    let vertex = assemble_source(
        Stage::Vertex,
        doc.vertex_source(),
        &declarations,
        &functions,
        samplers,
        version,
    );

    Ok(ShaderSource { fragment, vertex })
}

fn value_type(kind: AttributeKind) -> Option<&'static str> {
    match kind {
        AttributeKind::Event | AttributeKind::Bool => Some("bool"),
        AttributeKind::Long => Some("int"),
        AttributeKind::Float => Some("float"),
        AttributeKind::Point2D => Some("vec2"),
        AttributeKind::Color => Some("vec4"),
        AttributeKind::Image | AttributeKind::Audio | AttributeKind::AudioFft => None,
        AttributeKind::Cube => None,
    }
}

fn uniform_declarations(
    doc: &IsfDoc,
    samplers: &IndexMap<String, TextureType>,
    use_uniform_block: bool,
) -> String {
    let mut values: Vec<(&str, String)> = BUILTIN_UNIFORMS
        .iter()
        .map(|(ty, name)| (*ty, name.to_string()))
        .collect();
    let mut sampler_uniforms = Vec::new();

    let mut add_image = |name: &str, default_type: TextureType| {
        let texture_type = samplers.get(name).copied().unwrap_or(default_type);
        sampler_uniforms.push((texture_type.sampler_glsl(), name.to_string()));
        values.push(("vec4", format!("_{name}_imgRect")));
        values.push(("vec2", format!("_{name}_imgSize")));
        values.push(("bool", format!("_{name}_flip")));
    };

    let mut inputs = Vec::new();
    for input in doc.inputs() {
        match value_type(input.kind) {
            Some(ty) => inputs.push((ty, input.name.clone())),
            None => add_image(&input.name, default_texture_type(input.kind)),
        }
    }
    for import in doc.image_imports() {
        add_image(&import.name, default_texture_type(import.kind));
    }
    for target in doc
        .persistent_pass_targets()
        .chain(doc.temp_pass_targets())
    {
        add_image(&target.name, TextureType::TwoD);
    }
    values.extend(inputs);

    let mut glsl = String::new();
    if use_uniform_block {
        writeln!(&mut glsl, "layout(std140) uniform {UNIFORM_BLOCK_NAME} {{").unwrap();
        for (ty, name) in &values {
            writeln!(&mut glsl, "    {ty} {name};").unwrap();
        }
        writeln!(&mut glsl, "}};").unwrap();
    } else {
        for (ty, name) in &values {
            writeln!(&mut glsl, "uniform {ty} {name};").unwrap();
        }
    }
    for (ty, name) in &sampler_uniforms {
        writeln!(&mut glsl, "uniform {ty} {name};").unwrap();
    }
    glsl
}

pub(crate) fn default_texture_type(kind: AttributeKind) -> TextureType {
    match kind {
        AttributeKind::Cube => TextureType::Cube,
        _ => TextureType::TwoD,
    }
}

fn sampling_functions(samplers: &IndexMap<String, TextureType>, version: GlslVersion) -> String {
    let mut glsl = String::new();
    for texture_type in [TextureType::TwoD, TextureType::Rect] {
        if samplers.values().any(|t| *t == texture_type) {
            let sampler = texture_type.sampler_glsl();
            let suffix = function_suffix(texture_type);
            let lookup = version.texture_function(texture_type);
            glsl += &formatdoc! {"
                vec4 isf_samplePixel{suffix}({sampler} img, vec4 rect, vec2 size, bool flip, vec2 loc) {{
                    vec2 coord = loc / size;
                    if (flip)
                        coord.y = 1.0 - coord.y;
                    return {lookup}(img, rect.xy + coord * rect.zw);
                }}
                vec4 isf_sampleNorm{suffix}({sampler} img, vec4 rect, vec2 size, bool flip, vec2 coord) {{
                    return isf_samplePixel{suffix}(img, rect, size, flip, coord * size);
                }}
            "};
        }
    }
    glsl
}

fn function_suffix(texture_type: TextureType) -> &'static str {
    match texture_type {
        TextureType::TwoD => "2D",
        TextureType::Rect => "Rect",
        TextureType::Cube => "Cube",
    }
}

fn assemble_source(
    stage: Stage,
    raw: &str,
    declarations: &str,
    functions: &str,
    samplers: &IndexMap<String, TextureType>,
    version: GlslVersion,
) -> String {
    let (mut extensions, body) = split_directives(raw);

    let body = replace_image_macros(&body, samplers, version);
    let body = replace_identifier(&body, "vv_FragNormCoord", "isf_FragNormCoord");
    let body = replace_identifier(&body, "vv_vertShaderInit", "isf_vertShaderInit");
    let body = if version.is_modern() {
        modernize(&body, stage)
    } else {
        body
    };

    if version == GlslVersion::Gl2
        && samplers.values().any(|t| *t == TextureType::Rect)
        && !extensions.iter().any(|e| e.contains("GL_ARB_texture_rectangle"))
    {
        extensions.push("#extension GL_ARB_texture_rectangle : enable".to_string());
    }

    let mut glsl = String::new();
    writeln!(&mut glsl, "{}", version.version_directive()).unwrap();
    for extension in &extensions {
        writeln!(&mut glsl, "{extension}").unwrap();
    }
    if let Some(precision) = version.precision() {
        writeln!(&mut glsl, "precision {precision} float;").unwrap();
        writeln!(&mut glsl, "precision {precision} int;").unwrap();
    }
    glsl.push('\n');

    glsl += declarations;
    glsl += match (stage, version.is_modern()) {
        (Stage::Fragment, true) => "in vec2 isf_FragNormCoord;\nout vec4 isf_FragColor;\n",
        (Stage::Fragment, false) => "varying vec2 isf_FragNormCoord;\n",
        (Stage::Vertex, true) => "in vec2 VERTDATA;\nout vec2 isf_FragNormCoord;\n",
        (Stage::Vertex, false) => "attribute vec2 VERTDATA;\nvarying vec2 isf_FragNormCoord;\n",
    };
    glsl.push('\n');

    if !functions.is_empty() {
        glsl += functions;
        glsl.push('\n');
    }
    if stage == Stage::Vertex {
        glsl += indoc! {"
            void isf_vertShaderInit() {
                gl_Position = vec4(VERTDATA, 0.0, 1.0);
                isf_FragNormCoord = VERTDATA * 0.5 + 0.5;
            }
        "};
        glsl.push('\n');
    }

    glsl += &body;
    glsl
}

/// Remove `#version` and move `#extension` lines to the generated header.
fn split_directives(raw: &str) -> (Vec<String>, String) {
    let mut extensions = Vec::new();
    let mut body = String::new();
    for line in raw.lines() {
        let directive = line.trim_start();
        if directive.starts_with("#version") {
            continue;
        }
        if directive.starts_with("#extension") {
            extensions.push(directive.trim_end().to_string());
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }
    (extensions, body)
}

fn modernize(body: &str, stage: Stage) -> String {
    let mut body = body.to_string();
    for function in ["texture2D", "texture2DRect", "textureCube"] {
        body = replace_identifier(&body, function, "texture");
    }
    match stage {
        Stage::Fragment => {
            body = replace_identifier(&body, "varying", "in");
            body = replace_identifier(&body, "gl_FragColor", "isf_FragColor");
        }
        Stage::Vertex => {
            body = replace_identifier(&body, "varying", "out");
            body = replace_identifier(&body, "attribute", "in");
        }
    }
    body
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace whole word occurrences of the identifier `from` with `to`.
fn replace_identifier(text: &str, from: &str, to: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for (i, _) in text.match_indices(from) {
        let before = text[..i].chars().next_back();
        let after = text[i + from.len()..].chars().next();
        if !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char) {
            output.push_str(&text[last..i]);
            output.push_str(to);
            last = i + from.len();
        }
    }
    output.push_str(&text[last..]);
    output
}

/// Replace `IMG_NORM_PIXEL(image, coord)` and similar macros with sampling code
/// for the texture type of `image`.
fn replace_image_macros(
    text: &str,
    samplers: &IndexMap<String, TextureType>,
    version: GlslVersion,
) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("IMG_") {
        let (before, candidate) = rest.split_at(start);
        output.push_str(before);

        let ident_len = candidate
            .find(|c: char| !is_identifier_char(c))
            .unwrap_or(candidate.len());
        let ident = &candidate[..ident_len];

        let is_word_start = !output.chars().next_back().is_some_and(is_identifier_char);
        if is_word_start && IMAGE_MACROS.contains(&ident) {
            if let Some((args, len)) = macro_args(&candidate[ident_len..]) {
                let args: Vec<_> = args
                    .into_iter()
                    .map(|a| replace_image_macros(a.trim(), samplers, version))
                    .collect();
                if let Some(expanded) = expand_image_macro(ident, &args, samplers, version) {
                    output.push_str(&expanded);
                    rest = &candidate[ident_len + len..];
                    continue;
                }
            }
        }

        output.push_str(ident);
        rest = &candidate[ident_len..];
    }
    output.push_str(rest);
    output
}

/// Split the parenthesized argument list at the start of `text`.
/// Returns the arguments and the length of the text including the parentheses.
fn macro_args(text: &str) -> Option<(Vec<&str>, usize)> {
    let open = text.len() - text.trim_start().len();
    if !text[open..].starts_with('(') {
        return None;
    }

    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut arg_start = open + 1;
    for (i, c) in text.char_indices().skip_while(|(i, _)| *i < open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    args.push(&text[arg_start..i]);
                    return Some((args, i + 1));
                }
            }
            ',' if depth == 1 => {
                args.push(&text[arg_start..i]);
                arg_start = i + 1;
            }
            _ => (),
        }
    }
    None
}

fn expand_image_macro(
    name: &str,
    args: &[String],
    samplers: &IndexMap<String, TextureType>,
    version: GlslVersion,
) -> Option<String> {
    let image = args.first()?;
    let texture_type = match samplers.get(image.as_str()) {
        Some(t) => *t,
        None => {
            warn!("{name} references unknown image {image:?}");
            TextureType::TwoD
        }
    };

    let (normalized, coord) = match (name, args.get(1)) {
        ("IMG_SIZE", None) => return Some(format!("_{image}_imgSize")),
        ("IMG_NORM_PIXEL", Some(coord)) => (true, coord.as_str()),
        ("IMG_PIXEL", Some(coord)) => (false, coord.as_str()),
        ("IMG_THIS_NORM_PIXEL", None) => (true, "isf_FragNormCoord"),
        ("IMG_THIS_PIXEL", None) => (false, "gl_FragCoord.xy"),
        _ => return None,
    };
    if args.len() > 2 {
        return None;
    }

    match texture_type {
        TextureType::Cube => {
            let lookup = version.texture_function(texture_type);
            if args.len() == 2 {
                Some(format!("{lookup}({image}, {coord})"))
            } else {
                Some(format!(
                    "{lookup}({image}, vec3(isf_FragNormCoord * 2.0 - 1.0, 1.0))"
                ))
            }
        }
        _ => {
            let kind = if normalized { "Norm" } else { "Pixel" };
            let suffix = function_suffix(texture_type);
            Some(format!(
                "isf_sample{kind}{suffix}({image}, _{image}_imgRect, _{image}_imgSize, _{image}_flip, {coord})"
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn samplers(entries: &[(&str, TextureType)]) -> IndexMap<String, TextureType> {
        entries
            .iter()
            .map(|(name, t)| (name.to_string(), *t))
            .collect()
    }

    #[test]
    fn reserved_names() {
        assert!(is_reserved_name("TIME"));
        assert!(is_reserved_name("RENDERSIZE"));
        assert!(is_reserved_name("PASSINDEX"));
        assert!(is_reserved_name("_x_imgSize"));
        assert!(is_reserved_name("_x_imgRect"));
        assert!(is_reserved_name("_x_flip"));
        assert!(!is_reserved_name("time"));
        assert!(!is_reserved_name("_flip"));
        assert!(!is_reserved_name("x_imgSize"));
        assert!(!is_reserved_name("inputImage"));
    }

    #[test]
    fn replace_identifier_whole_words() {
        assert_eq!(
            "texture(a); my_texture2D(b); texture(c)",
            replace_identifier("texture2D(a); my_texture2D(b); texture2D(c)", "texture2D", "texture")
        );
    }

    #[test]
    fn replace_macros_2d() {
        let samplers = samplers(&[("inputImage", TextureType::TwoD)]);
        assert_eq!(
            "vec4 c = isf_sampleNorm2D(inputImage, _inputImage_imgRect, _inputImage_imgSize, _inputImage_flip, isf_FragNormCoord);",
            replace_image_macros(
                "vec4 c = IMG_NORM_PIXEL(inputImage, isf_FragNormCoord);",
                &samplers,
                GlslVersion::Gl4
            )
        );
        assert_eq!(
            "isf_samplePixel2D(inputImage, _inputImage_imgRect, _inputImage_imgSize, _inputImage_flip, gl_FragCoord.xy)",
            replace_image_macros("IMG_THIS_PIXEL(inputImage)", &samplers, GlslVersion::Gl4)
        );
        assert_eq!(
            "vec2 s = _inputImage_imgSize;",
            replace_image_macros("vec2 s = IMG_SIZE( inputImage );", &samplers, GlslVersion::Gl4)
        );
    }

    #[test]
    fn replace_macros_rect_and_cube() {
        let samplers = samplers(&[("a", TextureType::Rect), ("sky", TextureType::Cube)]);
        assert_eq!(
            "isf_samplePixelRect(a, _a_imgRect, _a_imgSize, _a_flip, vec2(1.0, 2.0))",
            replace_image_macros("IMG_PIXEL(a, vec2(1.0, 2.0))", &samplers, GlslVersion::Gl2)
        );
        assert_eq!(
            "textureCube(sky, dir)",
            replace_image_macros("IMG_NORM_PIXEL(sky, dir)", &samplers, GlslVersion::Gl2)
        );
        assert_eq!(
            "texture(sky, dir)",
            replace_image_macros("IMG_NORM_PIXEL(sky, dir)", &samplers, GlslVersion::Gl4)
        );
    }

    #[test]
    fn replace_macros_nested() {
        let samplers = samplers(&[("a", TextureType::TwoD), ("b", TextureType::TwoD)]);
        assert_eq!(
            "isf_samplePixel2D(a, _a_imgRect, _a_imgSize, _a_flip, _b_imgSize * 0.5)",
            replace_image_macros("IMG_PIXEL(a, IMG_SIZE(b) * 0.5)", &samplers, GlslVersion::Gl3)
        );
    }

    #[test]
    fn replace_macros_ignores_other_identifiers() {
        let samplers = samplers(&[("a", TextureType::TwoD)]);
        let text = "MY_IMG_PIXEL(a, b); IMG_PIXELS(a); IMG_PIXEL; IMG_PIXEL(a, (b)";
        assert_eq!(text, replace_image_macros(text, &samplers, GlslVersion::Gl4));
    }

    #[test]
    fn split_directives_extensions() {
        let (extensions, body) = split_directives(indoc! {"
            #version 120
            #extension GL_EXT_gpu_shader4 : enable
            void main() {}
        "});
        assert_eq!(vec!["#extension GL_EXT_gpu_shader4 : enable"], extensions);
        assert_eq!("void main() {}\n", body);
    }

    #[test]
    fn modernize_fragment() {
        let body = indoc! {"
            varying vec2 uv;
            void main() {
                gl_FragColor = texture2D(a, uv) + textureCube(b, vec3(uv, 1.0));
            }
        "};
        assert_eq!(
            indoc! {"
                in vec2 uv;
                void main() {
                    isf_FragColor = texture(a, uv) + texture(b, vec3(uv, 1.0));
                }
            "},
            modernize(body, Stage::Fragment)
        );
    }

    #[test]
    fn modernize_vertex() {
        assert_eq!(
            "in vec3 pos;\nout vec2 uv;\n",
            modernize("attribute vec3 pos;\nvarying vec2 uv;\n", Stage::Vertex)
        );
    }

    #[test]
    fn sampling_functions_only_used_types() {
        assert_eq!("", sampling_functions(&samplers(&[]), GlslVersion::Gl4));

        let glsl = sampling_functions(&samplers(&[("sky", TextureType::Cube)]), GlslVersion::Gl4);
        assert_eq!("", glsl);

        let glsl = sampling_functions(&samplers(&[("a", TextureType::Rect)]), GlslVersion::Gl2);
        assert!(glsl.contains("vec4 isf_samplePixelRect(sampler2DRect img"));
        assert!(glsl.contains("return texture2DRect(img"));
        assert!(!glsl.contains("isf_samplePixel2D"));
    }
}

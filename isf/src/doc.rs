use std::{
    cell::RefCell,
    fmt,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::{debug, warn};
use parking_lot::ReentrantMutex;

use crate::{
    attribute::{Attribute, AttributeKind, Value},
    error::{GenerateSourceError, LoadDocError, ParseDocError, SetValueError},
    expr::SubstitutionMap,
    extract::extract_metadata,
    glsl::{default_texture_type, GlslVersion, ShaderSource, PASSTHROUGH_VERTEX},
    parse::{parse_metadata, Metadata},
    pass::{PassTarget, RenderPass},
    BufferRef, LoadOptions, SceneId, TextureType,
};

/// How the shader is intended to be used based on its inputs.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FileType {
    /// Generates an image without any input images.
    Source,
    /// Processes an image input named `inputImage`.
    Filter,
    /// Blends `startImage` and `endImage` based on a float `progress`.
    Transition,
}

/// A parsed ISF file.
#[derive(Debug)]
pub struct IsfDoc {
    path: Option<PathBuf>,
    name: String,
    description: Option<String>,
    credit: Option<String>,
    vsn: Option<String>,
    isf_vsn: Option<String>,
    file_type: FileType,
    categories: Vec<String>,
    inputs: IndexMap<String, Attribute>,
    imports: IndexMap<String, Attribute>,
    render_passes: Vec<RenderPass>,
    persistent_targets: IndexMap<String, PassTarget>,
    temp_targets: IndexMap<String, PassTarget>,
    json_source: String,
    json: String,
    vertex_source: String,
    fragment_source: String,
    state: ReentrantMutex<RefCell<DocState>>,
}

#[derive(Debug, Default)]
struct DocState {
    scene: Option<SceneId>,
    time: f64,
    values: IndexMap<String, Value>,
    input_buffers: IndexMap<String, BufferRef>,
    pass_buffers: IndexMap<String, BufferRef>,
    target_sizes: IndexMap<String, [u32; 2]>,
    cached_source: Option<CachedSource>,
}

#[derive(Debug)]
struct CachedSource {
    version: GlslVersion,
    use_uniform_block: bool,
    texture_types: String,
    source: ShaderSource,
}

impl IsfDoc {
    /// Read and parse the ISF fragment shader at `path`.
    ///
    /// A vertex shader with the same name and a `.vs` or `.vert` extension is used if present.
    /// Imported images are relative to the folder containing `path`.
    pub fn from_file<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<Self, LoadDocError> {
        let path = path.as_ref();
        let fragment = read_to_string(path)?;

        let vertex_path = ["vs", "vert"]
            .into_iter()
            .map(|extension| path.with_extension(extension))
            .find(|p| p != path && p.is_file());
        let vertex = match vertex_path {
            Some(vertex_path) => Some(read_to_string(&vertex_path)?),
            None => None,
        };

        let imports_dir = path.parent().unwrap_or(Path::new(""));
        let mut doc = Self::from_source(&fragment, vertex.as_deref(), imports_dir, options)?;
        doc.path = Some(path.to_owned());
        doc.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(doc)
    }

    /// Parse an ISF fragment shader and optional vertex shader.
    /// Imported images are relative to `imports_dir`.
    pub fn from_source<P: AsRef<Path>>(
        fragment: &str,
        vertex: Option<&str>,
        imports_dir: P,
        options: LoadOptions,
    ) -> Result<Self, ParseDocError> {
        let (metadata, json_source, json, fragment_source) = match extract_metadata(fragment) {
            Some(extracted) => (
                parse_metadata(extracted.json, imports_dir.as_ref(), options.strict)?,
                extracted.source,
                extracted.json,
                extracted.shader,
            ),
            None if options.strict => return Err(ParseDocError::MissingMetadata),
            None => {
                warn!("Failed to find ISF metadata. Using the entire text as shader code.");
                let metadata = Metadata {
                    render_passes: vec![RenderPass { target: None }],
                    ..Default::default()
                };
                (metadata, "", "", fragment)
            }
        };

        let values = metadata
            .inputs
            .values()
            .filter_map(|input| Some((input.name.clone(), input.initial_value()?)))
            .collect();

        Ok(Self {
            path: None,
            name: String::new(),
            file_type: file_type(&metadata.inputs),
            description: metadata.description,
            credit: metadata.credit,
            vsn: metadata.vsn,
            isf_vsn: metadata.isf_vsn,
            categories: metadata.categories,
            inputs: metadata.inputs,
            imports: metadata.imports,
            render_passes: metadata.render_passes,
            persistent_targets: metadata.persistent_targets,
            temp_targets: metadata.temp_targets,
            json_source: json_source.to_string(),
            json: json.to_string(),
            vertex_source: vertex.unwrap_or(PASSTHROUGH_VERTEX).to_string(),
            fragment_source: fragment_source.to_string(),
            state: ReentrantMutex::new(RefCell::new(DocState {
                scene: options.scene,
                values,
                ..Default::default()
            })),
        })
    }

    /// The file path or `None` for documents created from strings.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The file name without its extension.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn credit(&self) -> Option<&str> {
        self.credit.as_deref()
    }

    pub fn vsn(&self) -> Option<&str> {
        self.vsn.as_deref()
    }

    pub fn isf_vsn(&self) -> Option<&str> {
        self.isf_vsn.as_deref()
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// All inputs in declaration order.
    pub fn inputs(&self) -> impl ExactSizeIterator<Item = &Attribute> {
        self.inputs.values()
    }

    pub fn inputs_of_type(&self, kind: AttributeKind) -> impl Iterator<Item = &Attribute> {
        self.inputs.values().filter(move |i| i.kind == kind)
    }

    pub fn input(&self, name: &str) -> Option<&Attribute> {
        self.inputs.get(name)
    }

    pub fn image_inputs(&self) -> impl Iterator<Item = &Attribute> {
        self.inputs.values().filter(|i| i.kind.is_image())
    }

    pub fn audio_inputs(&self) -> impl Iterator<Item = &Attribute> {
        self.inputs.values().filter(|i| i.kind.is_audio())
    }

    /// Images from `IMPORTED` with the resolved path in [Attribute::description].
    pub fn image_imports(&self) -> impl ExactSizeIterator<Item = &Attribute> {
        self.imports.values()
    }

    /// The passes in render order.
    pub fn render_passes(&self) -> &[RenderPass] {
        &self.render_passes
    }

    pub fn persistent_pass_targets(&self) -> impl ExactSizeIterator<Item = &PassTarget> {
        self.persistent_targets.values()
    }

    pub fn temp_pass_targets(&self) -> impl ExactSizeIterator<Item = &PassTarget> {
        self.temp_targets.values()
    }

    pub fn pass_target_for_key(&self, name: &str) -> Option<&PassTarget> {
        self.persistent_pass_target_for_key(name)
            .or_else(|| self.temp_pass_target_for_key(name))
    }

    pub fn persistent_pass_target_for_key(&self, name: &str) -> Option<&PassTarget> {
        self.persistent_targets.get(name)
    }

    pub fn temp_pass_target_for_key(&self, name: &str) -> Option<&PassTarget> {
        self.temp_targets.get(name)
    }

    /// Find the buffer attached to an input, import, or pass target with the given name.
    pub fn buffer_for_key(&self, name: &str) -> Option<BufferRef> {
        let state = self.state.lock();
        let state = state.borrow();
        state
            .input_buffers
            .get(name)
            .or_else(|| state.pass_buffers.get(name))
            .cloned()
    }

    pub fn persistent_buffer_for_key(&self, name: &str) -> Option<BufferRef> {
        if self.persistent_targets.contains_key(name) {
            self.buffer_for_key(name)
        } else {
            None
        }
    }

    pub fn temp_buffer_for_key(&self, name: &str) -> Option<BufferRef> {
        if self.temp_targets.contains_key(name) {
            self.buffer_for_key(name)
        } else {
            None
        }
    }

    /// Attach or detach the renderer's texture for an image input, audio input, or import.
    pub fn set_input_buffer(
        &self,
        name: &str,
        buffer: Option<BufferRef>,
    ) -> Result<(), SetValueError> {
        let input = self
            .inputs
            .get(name)
            .or_else(|| self.imports.get(name))
            .ok_or_else(|| SetValueError::UnknownInput {
                name: name.to_string(),
            })?;
        if !input.kind.is_sampler() {
            return Err(SetValueError::KindMismatch {
                name: name.to_string(),
                kind: input.kind,
            });
        }

        let state = self.state.lock();
        let mut state = state.borrow_mut();
        match buffer {
            Some(buffer) => state.input_buffers.insert(name.to_string(), buffer),
            None => state.input_buffers.shift_remove(name),
        };
        Ok(())
    }

    /// Attach or detach the renderer's texture for a pass target.
    pub fn set_pass_buffer(
        &self,
        name: &str,
        buffer: Option<BufferRef>,
    ) -> Result<(), SetValueError> {
        if self.pass_target_for_key(name).is_none() {
            return Err(SetValueError::UnknownPassTarget {
                name: name.to_string(),
            });
        }

        let state = self.state.lock();
        let mut state = state.borrow_mut();
        match buffer {
            Some(buffer) => state.pass_buffers.insert(name.to_string(), buffer),
            None => state.pass_buffers.shift_remove(name),
        };
        Ok(())
    }

    /// Set the current value for a non image input.
    pub fn set_input_value(&self, name: &str, value: Value) -> Result<(), SetValueError> {
        let input = self
            .inputs
            .get(name)
            .ok_or_else(|| SetValueError::UnknownInput {
                name: name.to_string(),
            })?;
        if input.kind != value.kind() {
            return Err(SetValueError::KindMismatch {
                name: name.to_string(),
                kind: input.kind,
            });
        }

        let state = self.state.lock();
        state.borrow_mut().values.insert(name.to_string(), value);
        Ok(())
    }

    /// The current value for a non image input.
    pub fn input_value(&self, name: &str) -> Option<Value> {
        let state = self.state.lock();
        let value = state.borrow().values.get(name).copied();
        value
    }

    /// Set the value used for `TIME` in pass dimension expressions.
    pub fn set_elapsed_time(&self, seconds: f64) {
        let state = self.state.lock();
        state.borrow_mut().time = seconds;
    }

    pub fn elapsed_time(&self) -> f64 {
        let state = self.state.lock();
        let time = state.borrow().time;
        time
    }

    pub fn set_scene(&self, scene: Option<SceneId>) {
        let state = self.state.lock();
        state.borrow_mut().scene = scene;
    }

    pub fn scene(&self) -> Option<SceneId> {
        let state = self.state.lock();
        let scene = state.borrow().scene;
        scene
    }

    /// The variables available to pass dimension expressions.
    ///
    /// Scalar inputs use their current value.
    /// The builtin `WIDTH`, `HEIGHT`, and `TIME` take precedence over inputs with the same name.
    pub fn substitution_map(&self, render_size: [u32; 2]) -> SubstitutionMap {
        let state = self.state.lock();
        let state = state.borrow();

        let mut values: SubstitutionMap = self
            .inputs
            .values()
            .filter(|i| i.kind.is_scalar())
            .filter_map(|i| Some((i.name.clone(), state.values.get(&i.name)?.as_f64()?)))
            .collect();
        values.insert("WIDTH".to_string(), render_size[0] as f64);
        values.insert("HEIGHT".to_string(), render_size[1] as f64);
        values.insert("TIME".to_string(), state.time);
        values
    }

    /// Calculate the size of every pass target for the given render size.
    /// The results are available from [Self::target_size].
    pub fn eval_buffer_dimensions_with_render_size(&self, render_size: [u32; 2]) {
        let state = self.state.lock();
        let values = self.substitution_map(render_size);

        let sizes = self
            .persistent_targets
            .values()
            .chain(self.temp_targets.values())
            .map(|t| (t.name.clone(), t.resolve_size(render_size, &values)))
            .collect();
        state.borrow_mut().target_sizes = sizes;
    }

    /// The size of the pass target from the last call to [Self::eval_buffer_dimensions_with_render_size].
    pub fn target_size(&self, name: &str) -> Option<[u32; 2]> {
        let state = self.state.lock();
        let size = state.borrow().target_sizes.get(name).copied();
        size
    }

    /// The sampler type for each image input, audio input, import, and pass target in that order.
    ///
    /// Images without an attached buffer use [TextureType::Cube] for cube maps
    /// and [TextureType::TwoD] otherwise.
    pub fn sampler_types(&self) -> IndexMap<String, TextureType> {
        // Buffers may call back into the document while querying the texture type.
        let buffers: Vec<_> = {
            let state = self.state.lock();
            let state = state.borrow();
            let buffers: Vec<_> = self
                .image_inputs()
                .chain(self.audio_inputs())
                .chain(self.image_imports())
                .map(|input| {
                    let buffer = state.input_buffers.get(&input.name).cloned();
                    (&input.name, buffer, default_texture_type(input.kind))
                })
                .chain(
                    self.persistent_pass_targets()
                        .chain(self.temp_pass_targets())
                        .map(|target| {
                            let buffer = state.pass_buffers.get(&target.name).cloned();
                            (&target.name, buffer, TextureType::TwoD)
                        }),
                )
                .collect();
            buffers
        };

        buffers
            .into_iter()
            .map(|(name, buffer, default)| {
                let texture_type = buffer.map(|b| b.texture_type()).unwrap_or(default);
                (name.clone(), texture_type)
            })
            .collect()
    }

    /// A string like `"22R"` with one [TextureType::type_char] for each of [Self::sampler_types].
    pub fn texture_type_string(&self) -> String {
        self.sampler_types()
            .values()
            .map(|t| t.type_char())
            .collect()
    }

    /// Generate the final vertex and fragment shader code for `version`.
    ///
    /// The result is cached and only regenerated if the arguments
    /// or the texture types of attached buffers change.
    pub fn generate_shader_source(
        &self,
        version: GlslVersion,
        use_uniform_block: bool,
    ) -> Result<ShaderSource, GenerateSourceError> {
        let state = self.state.lock();

        let samplers = self.sampler_types();
        let texture_types: String = samplers.values().map(|t| t.type_char()).collect();

        if let Some(cached) = &state.borrow().cached_source {
            if cached.version == version
                && cached.use_uniform_block == use_uniform_block
                && cached.texture_types == texture_types
            {
                return Ok(cached.source.clone());
            }
        }

        debug!(
            "Generating {version:?} shader source for {:?} with texture types {texture_types:?}",
            self.name
        );
        let source =
            crate::glsl::generate_shader_source(self, &samplers, version, use_uniform_block)?;

        state.borrow_mut().cached_source = Some(CachedSource {
            version,
            use_uniform_block,
            texture_types,
            source: source.clone(),
        });
        Ok(source)
    }

    /// The JSON metadata as written including comment delimiters.
    pub fn json_source_string(&self) -> &str {
        &self.json_source
    }

    /// The JSON metadata object without comment delimiters.
    pub fn json_string(&self) -> &str {
        &self.json
    }

    /// The vertex shader code before generating declarations.
    pub fn vertex_source(&self) -> &str {
        &self.vertex_source
    }

    /// The fragment shader code following the JSON metadata before generating declarations.
    pub fn fragment_source(&self) -> &str {
        &self.fragment_source
    }
}

fn read_to_string(path: &Path) -> Result<String, LoadDocError> {
    std::fs::read_to_string(path).map_err(|source| LoadDocError::Io {
        path: path.to_owned(),
        source,
    })
}

fn file_type(inputs: &IndexMap<String, Attribute>) -> FileType {
    if inputs.values().any(|i| i.is_filter_input_image()) {
        FileType::Filter
    } else if inputs.values().any(|i| i.is_trans_start_image())
        && inputs.values().any(|i| i.is_trans_end_image())
        && inputs.values().any(|i| i.is_trans_progress_float())
    {
        FileType::Transition
    } else {
        FileType::Source
    }
}

impl fmt::Display for IsfDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "IsfDoc {:?} ({:?})", self.name, self.file_type)?;
        if let Some(description) = &self.description {
            writeln!(f, "description: {description}")?;
        }
        if let Some(credit) = &self.credit {
            writeln!(f, "credit: {credit}")?;
        }
        if !self.categories.is_empty() {
            writeln!(f, "categories: {}", self.categories.join(", "))?;
        }

        writeln!(f, "inputs:")?;
        for input in self.inputs.values() {
            writeln!(f, "    {}: {}", input.name, input.kind.type_str())?;
        }

        if !self.imports.is_empty() {
            writeln!(f, "imports:")?;
            for import in self.imports.values() {
                let path = import.description.as_deref().unwrap_or_default();
                writeln!(f, "    {}: {path}", import.name)?;
            }
        }

        writeln!(f, "passes:")?;
        for (i, pass) in self.render_passes.iter().enumerate() {
            match pass.target.as_ref().and_then(|t| self.pass_target_for_key(t)) {
                Some(target) => {
                    let lifetime = if target.persistent {
                        "persistent"
                    } else {
                        "temporary"
                    };
                    let format = if target.float { "float" } else { "byte" };
                    writeln!(f, "    {i}: {} ({lifetime}, {format})", target.name)?;
                }
                None => writeln!(f, "    {i}: output")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, OnceLock, Weak};

    use approx::assert_relative_eq;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use crate::Buffer;

    #[derive(Debug)]
    struct TestBuffer(TextureType);

    impl Buffer for TestBuffer {
        fn texture_type(&self) -> TextureType {
            self.0
        }
    }

    const BRIGHTNESS: &str = indoc! {r#"
        /*{
            "DESCRIPTION": "Constant brightness",
            "INPUTS": [
                {
                    "NAME": "brightness",
                    "TYPE": "float",
                    "DEFAULT": 1.0,
                    "MIN": 0.0,
                    "MAX": 2.0
                }
            ]
        }*/
        void main() {
            gl_FragColor = vec4(vec3(brightness), 1.0);
        }
    "#};

    const MULTI_PASS: &str = indoc! {r#"
        /*{
            "CATEGORIES": ["Blur", "Filter"],
            "INPUTS": [
                { "NAME": "inputImage", "TYPE": "image" },
                { "NAME": "level", "TYPE": "long", "VALUES": [2, 4], "LABELS": ["Low", "High"] },
                { "NAME": "waveform", "TYPE": "audio" }
            ],
            "PASSES": [
                { "TARGET": "halfA", "WIDTH": "$WIDTH/2", "HEIGHT": "$HEIGHT/$level" },
                { "TARGET": "feedback", "PERSISTENT": true, "FLOAT": true },
                {}
            ]
        }*/
        void main() {
            gl_FragColor = IMG_THIS_NORM_PIXEL(inputImage) + IMG_NORM_PIXEL(halfA, isf_FragNormCoord);
        }
    "#};

    fn doc(fragment: &str) -> IsfDoc {
        IsfDoc::from_source(fragment, None, "", LoadOptions::default()).unwrap()
    }

    #[test]
    fn brightness_properties() {
        let doc = doc(BRIGHTNESS);
        assert_eq!(None, doc.path());
        assert_eq!("", doc.name());
        assert_eq!(Some("Constant brightness"), doc.description());
        assert_eq!(FileType::Source, doc.file_type());
        assert_eq!(1, doc.inputs().len());
        assert_eq!(Some(Value::Float(1.0)), doc.input_value("brightness"));
        assert_eq!(&[RenderPass { target: None }], doc.render_passes());
        assert_eq!(0, doc.persistent_pass_targets().len());
        assert_eq!(0, doc.temp_pass_targets().len());
        assert_eq!(PASSTHROUGH_VERTEX, doc.vertex_source());
        assert!(doc.json_source_string().starts_with("/*{"));
        assert!(doc.json_source_string().ends_with("}*/\n"));
        assert!(doc.json_string().starts_with('{'));
        assert!(doc.json_string().ends_with('}'));
        assert_eq!(
            "void main() {\n    gl_FragColor = vec4(vec3(brightness), 1.0);\n}\n",
            doc.fragment_source()
        );
    }

    #[test]
    fn brightness_fragment_gl4() {
        let source = doc(BRIGHTNESS)
            .generate_shader_source(GlslVersion::Gl4, false)
            .unwrap();
        insta::assert_snapshot!(source.fragment, @r###"
        #version 410

        uniform int PASSINDEX;
        uniform vec2 RENDERSIZE;
        uniform float TIME;
        uniform float TIMEDELTA;
        uniform vec4 DATE;
        uniform int FRAMEINDEX;
        uniform float brightness;
        in vec2 isf_FragNormCoord;
        out vec4 isf_FragColor;

        void main() {
            isf_FragColor = vec4(vec3(brightness), 1.0);
        }
        "###);
    }

    #[test]
    fn brightness_vertex_gles2() {
        let source = doc(BRIGHTNESS)
            .generate_shader_source(GlslVersion::GlEs2, false)
            .unwrap();
        insta::assert_snapshot!(source.vertex, @r###"
        #version 100
        precision mediump float;
        precision mediump int;

        uniform int PASSINDEX;
        uniform vec2 RENDERSIZE;
        uniform float TIME;
        uniform float TIMEDELTA;
        uniform vec4 DATE;
        uniform int FRAMEINDEX;
        uniform float brightness;
        attribute vec2 VERTDATA;
        varying vec2 isf_FragNormCoord;

        void isf_vertShaderInit() {
            gl_Position = vec4(VERTDATA, 0.0, 1.0);
            isf_FragNormCoord = VERTDATA * 0.5 + 0.5;
        }

        void main() {
            isf_vertShaderInit();
        }
        "###);
    }

    #[test]
    fn generate_uniform_block() {
        let doc = doc(MULTI_PASS);
        let source = doc.generate_shader_source(GlslVersion::Gl4, true).unwrap();
        for stage in [&source.fragment, &source.vertex] {
            assert!(stage.contains("layout(std140) uniform ISFUniforms {\n"));
            assert!(stage.contains("    int level;\n"));
            assert!(stage.contains("    vec2 _inputImage_imgSize;\n"));
            assert!(!stage.contains("uniform int level;"));
            assert!(!stage.contains("uniform vec2 RENDERSIZE;"));
            assert!(stage.contains("uniform sampler2D inputImage;\n"));
            assert!(stage.contains("uniform sampler2D waveform;\n"));
            assert!(stage.contains("uniform sampler2D halfA;\n"));
            assert!(stage.contains("uniform sampler2D feedback;\n"));
        }
    }

    #[test]
    fn generate_uniform_block_unsupported() {
        let doc = doc(BRIGHTNESS);
        let source = doc.generate_shader_source(GlslVersion::Gl2, true).unwrap();
        assert!(!source.fragment.contains("ISFUniforms"));
        assert!(source.fragment.contains("uniform float brightness;\n"));
    }

    #[test]
    fn generate_deterministic() {
        let first = doc(MULTI_PASS)
            .generate_shader_source(GlslVersion::GlEs3, false)
            .unwrap();
        let second = doc(MULTI_PASS)
            .generate_shader_source(GlslVersion::GlEs3, false)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn generate_image_macros() {
        let source = doc(MULTI_PASS)
            .generate_shader_source(GlslVersion::Gl3, false)
            .unwrap();
        assert!(source.fragment.contains(
            "isf_FragColor = isf_sampleNorm2D(inputImage, _inputImage_imgRect, _inputImage_imgSize, _inputImage_flip, isf_FragNormCoord) + isf_sampleNorm2D(halfA, _halfA_imgRect, _halfA_imgSize, _halfA_flip, isf_FragNormCoord);"
        ));
        assert!(source.fragment.contains("vec4 isf_sampleNorm2D(sampler2D img"));
        assert!(!source.fragment.contains("isf_sampleNormRect"));
    }

    #[test]
    fn generate_cached_until_texture_types_change() {
        let doc = doc(MULTI_PASS);
        assert_eq!("2222", doc.texture_type_string());

        let first = doc.generate_shader_source(GlslVersion::Gl2, false).unwrap();
        assert_eq!(
            first,
            doc.generate_shader_source(GlslVersion::Gl2, false).unwrap()
        );

        doc.set_input_buffer("inputImage", Some(Arc::new(TestBuffer(TextureType::Rect))))
            .unwrap();
        assert_eq!("R222", doc.texture_type_string());

        let second = doc.generate_shader_source(GlslVersion::Gl2, false).unwrap();
        assert_ne!(first, second);
        assert!(second.fragment.contains("uniform sampler2DRect inputImage;"));
        assert!(second.fragment.contains("isf_sampleNormRect(inputImage"));
        assert!(second
            .fragment
            .contains("#extension GL_ARB_texture_rectangle : enable"));

        doc.set_input_buffer("inputImage", None).unwrap();
        assert_eq!(
            first,
            doc.generate_shader_source(GlslVersion::Gl2, false).unwrap()
        );
    }

    #[test]
    fn generate_rect_es_error() {
        let doc = doc(MULTI_PASS);
        let first = doc.generate_shader_source(GlslVersion::GlEs3, false).unwrap();

        doc.set_pass_buffer("feedback", Some(Arc::new(TestBuffer(TextureType::Rect))))
            .unwrap();
        let result = doc.generate_shader_source(GlslVersion::GlEs3, false);
        assert!(matches!(
            result,
            Err(GenerateSourceError::UnsupportedTextureType {
                texture_type: TextureType::Rect,
                version: GlslVersion::GlEs3,
                ..
            })
        ));

        doc.set_pass_buffer("feedback", None).unwrap();
        assert_eq!(
            first,
            doc.generate_shader_source(GlslVersion::GlEs3, false).unwrap()
        );
    }

    #[test]
    fn generate_missing_fragment_source() {
        let doc = doc("/*{}*/");
        assert!(matches!(
            doc.generate_shader_source(GlslVersion::Gl4, false),
            Err(GenerateSourceError::MissingFragmentSource)
        ));
    }

    #[test]
    fn multi_pass_collections() {
        let doc = doc(MULTI_PASS);
        assert_eq!(FileType::Filter, doc.file_type());
        assert_eq!(&["Blur".to_string(), "Filter".to_string()], doc.categories());
        assert_eq!(
            vec!["inputImage"],
            doc.image_inputs().map(|i| i.name.as_str()).collect::<Vec<_>>()
        );
        assert_eq!(
            vec!["waveform"],
            doc.audio_inputs().map(|i| i.name.as_str()).collect::<Vec<_>>()
        );
        assert_eq!(
            vec!["level"],
            doc.inputs_of_type(AttributeKind::Long)
                .map(|i| i.name.as_str())
                .collect::<Vec<_>>()
        );
        assert_eq!(Some(Value::Long(2)), doc.input_value("level"));

        assert_eq!(
            vec![
                RenderPass {
                    target: Some("halfA".to_string())
                },
                RenderPass {
                    target: Some("feedback".to_string())
                },
                RenderPass { target: None },
            ],
            doc.render_passes()
        );
        assert!(doc.temp_pass_target_for_key("halfA").is_some());
        assert!(doc.persistent_pass_target_for_key("halfA").is_none());
        assert!(doc.persistent_pass_target_for_key("feedback").unwrap().float);
        assert_eq!(
            Some("feedback"),
            doc.pass_target_for_key("feedback").map(|t| t.name.as_str())
        );
        assert!(doc.pass_target_for_key("inputImage").is_none());
    }

    #[test]
    fn every_target_pass_has_one_target() {
        let doc = doc(MULTI_PASS);
        for name in doc.render_passes().iter().filter_map(|p| p.target.as_ref()) {
            let persistent = doc.persistent_pass_target_for_key(name).is_some();
            let temp = doc.temp_pass_target_for_key(name).is_some();
            assert!(persistent != temp, "{name}");
        }
    }

    #[test]
    fn eval_buffer_dimensions() {
        let doc = doc(MULTI_PASS);
        assert_eq!(None, doc.target_size("halfA"));

        doc.eval_buffer_dimensions_with_render_size([640, 480]);
        assert_eq!(Some([320, 240]), doc.target_size("halfA"));
        assert_eq!(Some([640, 480]), doc.target_size("feedback"));

        doc.set_input_value("level", Value::Long(4)).unwrap();
        doc.eval_buffer_dimensions_with_render_size([640, 480]);
        assert_eq!(Some([320, 120]), doc.target_size("halfA"));
        assert_eq!(None, doc.target_size("inputImage"));
    }

    #[test]
    fn substitution_map_values() {
        let doc = doc(MULTI_PASS);
        doc.set_elapsed_time(1.5);
        let values = doc.substitution_map([640, 480]);
        assert_relative_eq!(640.0, values["WIDTH"]);
        assert_relative_eq!(480.0, values["HEIGHT"]);
        assert_relative_eq!(1.5, values["TIME"]);
        assert_relative_eq!(2.0, values["level"]);
        assert!(!values.contains_key("inputImage"));
    }

    #[test]
    fn set_input_value_errors() {
        let doc = doc(BRIGHTNESS);
        assert_eq!(
            Err(SetValueError::UnknownInput {
                name: "contrast".to_string()
            }),
            doc.set_input_value("contrast", Value::Float(1.0))
        );
        assert_eq!(
            Err(SetValueError::KindMismatch {
                name: "brightness".to_string(),
                kind: AttributeKind::Float
            }),
            doc.set_input_value("brightness", Value::Long(1))
        );
        assert_eq!(Ok(()), doc.set_input_value("brightness", Value::Float(0.5)));
        assert_eq!(Some(Value::Float(0.5)), doc.input_value("brightness"));
    }

    #[test]
    fn buffer_lookup() {
        let doc = doc(MULTI_PASS);
        assert!(doc.buffer_for_key("inputImage").is_none());

        doc.set_input_buffer("inputImage", Some(Arc::new(TestBuffer(TextureType::TwoD))))
            .unwrap();
        doc.set_pass_buffer("feedback", Some(Arc::new(TestBuffer(TextureType::TwoD))))
            .unwrap();
        doc.set_pass_buffer("halfA", Some(Arc::new(TestBuffer(TextureType::TwoD))))
            .unwrap();

        assert!(doc.buffer_for_key("inputImage").is_some());
        assert!(doc.buffer_for_key("feedback").is_some());
        assert!(doc.persistent_buffer_for_key("feedback").is_some());
        assert!(doc.persistent_buffer_for_key("halfA").is_none());
        assert!(doc.temp_buffer_for_key("halfA").is_some());
        assert!(doc.temp_buffer_for_key("inputImage").is_none());
        assert!(doc.buffer_for_key("missing").is_none());

        assert_eq!(
            Err(SetValueError::KindMismatch {
                name: "level".to_string(),
                kind: AttributeKind::Long
            }),
            doc.set_input_buffer("level", None)
        );
        assert_eq!(
            Err(SetValueError::UnknownPassTarget {
                name: "inputImage".to_string()
            }),
            doc.set_pass_buffer("inputImage", None)
        );
    }

    /// A buffer that detaches the feedback buffer when queried.
    #[derive(Debug)]
    struct DetachingBuffer {
        doc: OnceLock<Weak<IsfDoc>>,
    }

    impl Buffer for DetachingBuffer {
        fn texture_type(&self) -> TextureType {
            if let Some(doc) = self.doc.get().and_then(Weak::upgrade) {
                doc.set_pass_buffer("feedback", None).unwrap();
                doc.set_input_value("level", Value::Long(4)).unwrap();
            }
            TextureType::Rect
        }
    }

    #[test]
    fn sampler_types_buffer_calls_back_into_doc() {
        let doc = Arc::new(doc(MULTI_PASS));
        let buffer = Arc::new(DetachingBuffer {
            doc: OnceLock::new(),
        });
        buffer.doc.set(Arc::downgrade(&doc)).unwrap();

        doc.set_input_buffer("inputImage", Some(buffer)).unwrap();
        doc.set_pass_buffer("feedback", Some(Arc::new(TestBuffer(TextureType::Rect))))
            .unwrap();

        // Buffers are collected before the callback detaches feedback.
        assert_eq!("R2R2", doc.texture_type_string());
        assert!(doc.persistent_buffer_for_key("feedback").is_none());
        assert_eq!(Some(Value::Long(4)), doc.input_value("level"));
        assert_eq!("R222", doc.texture_type_string());

        let source = doc.generate_shader_source(GlslVersion::Gl4, false).unwrap();
        assert!(source.fragment.contains("uniform sampler2DRect inputImage;"));
    }

    #[test]
    fn permissive_reserved_input_declared_once() {
        let fragment = indoc! {r#"
            /*{
                "INPUTS": [
                    { "NAME": "TIME", "TYPE": "float" },
                    { "NAME": "speed", "TYPE": "float" }
                ]
            }*/
            void main() {
                gl_FragColor = vec4(TIME * speed);
            }
        "#};
        let doc = IsfDoc::from_source(fragment, None, "", LoadOptions::permissive()).unwrap();
        assert_eq!(1, doc.inputs().len());

        let source = doc.generate_shader_source(GlslVersion::Gl4, false).unwrap();
        assert_eq!(1, source.fragment.matches("uniform float TIME;").count());
        assert!(source.fragment.contains("uniform float speed;"));
    }

    #[test]
    fn scene_association() {
        let doc = IsfDoc::from_source(
            BRIGHTNESS,
            None,
            "",
            LoadOptions {
                scene: Some(SceneId(3)),
                strict: true,
            },
        )
        .unwrap();
        assert_eq!(Some(SceneId(3)), doc.scene());
        doc.set_scene(None);
        assert_eq!(None, doc.scene());
    }

    #[test]
    fn shared_between_threads() {
        let doc = doc(MULTI_PASS);
        std::thread::scope(|s| {
            for i in 1..=4 {
                let doc = &doc;
                s.spawn(move || {
                    doc.eval_buffer_dimensions_with_render_size([64 * i, 64 * i]);
                    doc.generate_shader_source(GlslVersion::Gl4, i % 2 == 0)
                        .unwrap();
                });
            }
        });
        assert!(doc.target_size("halfA").is_some());
    }

    #[test]
    fn missing_metadata() {
        let text = "void main() { gl_FragColor = vec4(1.0); }";
        assert!(matches!(
            IsfDoc::from_source(text, None, "", LoadOptions::default()),
            Err(ParseDocError::MissingMetadata)
        ));

        let doc = IsfDoc::from_source(text, None, "", LoadOptions::permissive()).unwrap();
        assert_eq!(0, doc.inputs().len());
        assert_eq!(text, doc.fragment_source());
        assert_eq!("", doc.json_string());
        assert_eq!(1, doc.render_passes().len());
    }

    #[test]
    fn truncated_metadata() {
        let text = indoc! {r#"
            /*{
                "INPUTS": [
                    { "NAME": "a", "TYPE": "float" }
            */
            void main() {}
        "#};
        assert!(matches!(
            IsfDoc::from_source(text, None, "", LoadOptions::default()),
            Err(ParseDocError::Json(_))
        ));

        let doc = IsfDoc::from_source(text, None, "", LoadOptions::permissive()).unwrap();
        assert_eq!(0, doc.inputs().len());
        assert_eq!("void main() {}\n", doc.fragment_source());
    }

    #[test]
    fn transition_file_type() {
        let doc = doc(indoc! {r#"
            /*{
                "INPUTS": [
                    { "NAME": "startImage", "TYPE": "image" },
                    { "NAME": "endImage", "TYPE": "image" },
                    { "NAME": "progress", "TYPE": "float" }
                ]
            }*/
            void main() {}
        "#});
        assert_eq!(FileType::Transition, doc.file_type());
    }

    #[test]
    fn display_summary() {
        let doc = doc(MULTI_PASS);
        assert_eq!(
            indoc! {"
                IsfDoc \"\" (Filter)
                categories: Blur, Filter
                inputs:
                    inputImage: image
                    level: long
                    waveform: audio
                passes:
                    0: halfA (temporary, byte)
                    1: feedback (persistent, float)
                    2: output
            "},
            doc.to_string()
        );
    }
}

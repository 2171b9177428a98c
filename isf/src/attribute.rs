//! Declared inputs and imported images.

/// The `TYPE` of an input like `"float"` or `"image"`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum AttributeKind {
    Event,
    Bool,
    Long,
    Float,
    Point2D,
    Color,
    Image,
    Audio,
    AudioFft,
    /// Cube maps are only created by `IMPORTED` entries with `"TYPE": "cube"`.
    Cube,
}

impl AttributeKind {
    pub fn from_type_str(ty: &str) -> Option<Self> {
        match ty {
            "event" => Some(Self::Event),
            "bool" => Some(Self::Bool),
            "long" => Some(Self::Long),
            "float" => Some(Self::Float),
            "point2D" => Some(Self::Point2D),
            "color" => Some(Self::Color),
            "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            "audioFFT" => Some(Self::AudioFft),
            "cube" => Some(Self::Cube),
            _ => None,
        }
    }

    pub fn type_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Bool => "bool",
            Self::Long => "long",
            Self::Float => "float",
            Self::Point2D => "point2D",
            Self::Color => "color",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::AudioFft => "audioFFT",
            Self::Cube => "cube",
        }
    }

    /// Kinds listed in [crate::IsfDoc::image_inputs].
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image | Self::Cube)
    }

    /// Kinds listed in [crate::IsfDoc::audio_inputs].
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio | Self::AudioFft)
    }

    /// Kinds bound as a texture sampler instead of a plain uniform.
    pub fn is_sampler(&self) -> bool {
        self.is_image() || self.is_audio()
    }

    /// Kinds with a single numeric value usable in pass size expressions.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Event | Self::Bool | Self::Long | Self::Float)
    }
}

/// The current, default, min, max, or identity value of an [Attribute].
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Value {
    Event(bool),
    Bool(bool),
    Long(i32),
    Float(f64),
    Point2D([f64; 2]),
    Color([f64; 4]),
}

impl Value {
    /// The value used before the renderer assigns anything.
    pub fn zero(kind: AttributeKind) -> Option<Self> {
        match kind {
            AttributeKind::Event => Some(Self::Event(false)),
            AttributeKind::Bool => Some(Self::Bool(false)),
            AttributeKind::Long => Some(Self::Long(0)),
            AttributeKind::Float => Some(Self::Float(0.0)),
            AttributeKind::Point2D => Some(Self::Point2D([0.0; 2])),
            AttributeKind::Color => Some(Self::Color([0.0; 4])),
            _ => None,
        }
    }

    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::Event(_) => AttributeKind::Event,
            Self::Bool(_) => AttributeKind::Bool,
            Self::Long(_) => AttributeKind::Long,
            Self::Float(_) => AttributeKind::Float,
            Self::Point2D(_) => AttributeKind::Point2D,
            Self::Color(_) => AttributeKind::Color,
        }
    }

    /// The value used for expression substitution or `None` for vectors.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Event(v) | Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Long(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Point2D(_) | Self::Color(_) => None,
        }
    }
}

/// A single entry in `INPUTS` or `IMPORTED`.
#[derive(Debug, PartialEq, Clone)]
pub struct Attribute {
    /// The uniform name used in the shader code.
    pub name: String,
    pub kind: AttributeKind,
    pub label: Option<String>,
    /// The resolved file path for imported images.
    pub description: Option<String>,
    pub default: Option<Value>,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub identity: Option<Value>,
    /// Allowed `VALUES` for [AttributeKind::Long].
    pub values: Vec<i32>,
    /// Display `LABELS` matching each of [Self::values].
    pub labels: Vec<String>,
    /// The number of samples requested by audio inputs with `MAX`.
    pub sample_count: Option<u32>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            label: None,
            description: None,
            default: None,
            min: None,
            max: None,
            identity: None,
            values: Vec::new(),
            labels: Vec::new(),
            sample_count: None,
        }
    }

    /// The value assigned when the document is created.
    pub fn initial_value(&self) -> Option<Value> {
        match self.default {
            Some(v) => Some(v),
            None => match (self.kind, self.values.first()) {
                (AttributeKind::Long, Some(first)) => Some(Value::Long(*first)),
                _ => Value::zero(self.kind),
            },
        }
    }

    pub fn is_filter_input_image(&self) -> bool {
        self.kind == AttributeKind::Image && self.name == "inputImage"
    }

    pub fn is_trans_start_image(&self) -> bool {
        self.kind == AttributeKind::Image && self.name == "startImage"
    }

    pub fn is_trans_end_image(&self) -> bool {
        self.kind == AttributeKind::Image && self.name == "endImage"
    }

    pub fn is_trans_progress_float(&self) -> bool {
        self.kind == AttributeKind::Float && self.name == "progress"
    }
}

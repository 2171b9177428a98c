//! Render passes and the buffers they render into.
use log::warn;

use crate::expr::{Expr, SubstitutionMap};

/// A single entry in `PASSES` in render order.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RenderPass {
    /// The name of the [PassTarget] or `None` for passes that render to the final output.
    pub target: Option<String>,
}

/// The output buffer description for a render pass with a `TARGET`.
#[derive(Debug, PartialEq, Clone)]
pub struct PassTarget {
    /// The `TARGET` name also used as the sampler name in later passes.
    pub name: String,
    pub width: Option<DimensionExpr>,
    pub height: Option<DimensionExpr>,
    /// Render to a 32-bit floating point buffer instead of 8-bit.
    pub float: bool,
    /// Keep the buffer contents between frames.
    pub persistent: bool,
}

/// A `WIDTH` or `HEIGHT` value like `"$WIDTH / 2"`.
#[derive(Debug, PartialEq, Clone)]
pub struct DimensionExpr {
    /// The expression as written in the JSON.
    pub text: String,
    /// The parsed expression or `None` if the text could not be parsed.
    pub expr: Option<Expr>,
}

impl DimensionExpr {
    pub fn parse(text: impl Into<String>) -> Self {
        let text = text.into();
        let expr = match Expr::parse(&text) {
            Ok(expr) => Some(expr),
            Err(e) => {
                warn!("Error parsing dimension expression {text:?}: {e}");
                None
            }
        };
        Self { text, expr }
    }
}

impl PassTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width: None,
            height: None,
            float: false,
            persistent: false,
        }
    }

    /// Calculate the buffer size for a pass rendering at `render_size`.
    ///
    /// Missing or invalid dimensions use the corresponding render dimension.
    pub fn resolve_size(&self, render_size: [u32; 2], values: &SubstitutionMap) -> [u32; 2] {
        [
            resolve_dimension(&self.name, self.width.as_ref(), render_size[0], values),
            resolve_dimension(&self.name, self.height.as_ref(), render_size[1], values),
        ]
    }
}

fn resolve_dimension(
    name: &str,
    dimension: Option<&DimensionExpr>,
    render_dimension: u32,
    values: &SubstitutionMap,
) -> u32 {
    match dimension {
        Some(DimensionExpr {
            expr: Some(expr),
            text,
        }) => {
            let value = expr.eval(values);
            if value.is_finite() {
                value.round().max(1.0) as u32
            } else {
                warn!("Dimension {text:?} for {name:?} evaluated to {value}. Using {render_dimension}.");
                render_dimension
            }
        }
        _ => render_dimension,
    }
}

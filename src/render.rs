//! Render configuration resolution.
//!
//! A render request carries an optional, partially filled `RenderConfig`.
//! It is resolved once into a `ResolvedRenderConfig` when the render stage
//! starts, and the burn style is then flattened into the `force_style`
//! key-value string understood by ffmpeg's `subtitles` filter.

use serde::{Deserialize, Serialize};

pub const DEFAULT_FONT_NAME: &str = "Arial";
pub const DEFAULT_FONT_SIZE: u32 = 24;
/// Opaque white, in `&HAABBGGRR`
pub const DEFAULT_PRIMARY_COLOUR: &str = "&H00FFFFFF";
/// Half-transparent black
pub const DEFAULT_OUTLINE_COLOUR: &str = "&H80000000";
pub const DEFAULT_BACK_COLOUR: &str = "&H80000000";
pub const DEFAULT_OUTLINE: f32 = 2.0;
pub const DEFAULT_SHADOW: f32 = 0.0;
pub const DEFAULT_MARGIN_V: u32 = 30;
pub const DEFAULT_LINE_HEIGHT: f32 = 1.2;

/// Border style of burned text.
///
/// Only outline and opaque box have a meaning here; any other value given by
/// the caller is kept verbatim and handed to the engine uninterpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BorderStyleRepr", into = "BorderStyleRepr")]
pub enum BorderStyle {
    Outline,
    OpaqueBox,
    Raw(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BorderStyleRepr {
    Code(i64),
    Name(String),
}

impl From<BorderStyleRepr> for BorderStyle {
    fn from(repr: BorderStyleRepr) -> Self {
        match repr {
            BorderStyleRepr::Code(1) => BorderStyle::Outline,
            BorderStyleRepr::Code(3) => BorderStyle::OpaqueBox,
            BorderStyleRepr::Code(code) => BorderStyle::Raw(code.to_string()),
            BorderStyleRepr::Name(name) => match name.as_str() {
                "outline" => BorderStyle::Outline,
                "opaque-box" | "opaque_box" | "box" => BorderStyle::OpaqueBox,
                _ => BorderStyle::Raw(name),
            },
        }
    }
}

impl From<BorderStyle> for BorderStyleRepr {
    fn from(style: BorderStyle) -> Self {
        match style {
            BorderStyle::Outline => BorderStyleRepr::Name("outline".to_string()),
            BorderStyle::OpaqueBox => BorderStyleRepr::Name("opaque-box".to_string()),
            BorderStyle::Raw(value) => BorderStyleRepr::Name(value),
        }
    }
}

impl BorderStyle {
    /// Value of the ASS `BorderStyle` field
    pub fn engine_value(&self) -> &str {
        match self {
            BorderStyle::Outline => "1",
            BorderStyle::OpaqueBox => "3",
            BorderStyle::Raw(value) => value,
        }
    }
}

/// Caller-supplied burn style; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnStyleConfig {
    pub font_name: Option<String>,
    pub font_size: Option<u32>,
    pub primary_colour: Option<String>,
    pub outline_colour: Option<String>,
    pub back_colour: Option<String>,
    pub bold: Option<bool>,
    pub border_style: Option<BorderStyle>,
    pub outline: Option<f32>,
    pub shadow: Option<f32>,
    pub margin_v: Option<u32>,
    pub line_height: Option<f32>,
}

/// Caller-supplied render configuration; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    pub render_soft: Option<bool>,
    pub render_burn: Option<bool>,
    #[serde(default)]
    pub burn_style: BurnStyleConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BurnStyle {
    pub font_name: String,
    pub font_size: u32,
    /// Colours are engine-native strings and are not validated
    pub primary_colour: String,
    pub outline_colour: String,
    pub back_colour: String,
    pub bold: bool,
    pub border_style: BorderStyle,
    pub outline: f32,
    pub shadow: f32,
    pub margin_v: u32,
    /// Kept for the review UI; the subtitles filter has no line height key
    pub line_height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRenderConfig {
    pub render_soft: bool,
    pub render_burn: bool,
    pub style: BurnStyle,
}

impl Default for ResolvedRenderConfig {
    fn default() -> Self {
        resolve(None)
    }
}

/// Fill every unspecified field with its default
pub fn resolve(config: Option<&RenderConfig>) -> ResolvedRenderConfig {
    let empty = RenderConfig::default();
    let config = config.unwrap_or(&empty);
    let style = &config.burn_style;

    ResolvedRenderConfig {
        render_soft: config.render_soft.unwrap_or(true),
        render_burn: config.render_burn.unwrap_or(true),
        style: BurnStyle {
            font_name: style.font_name.clone().unwrap_or_else(|| DEFAULT_FONT_NAME.to_string()),
            font_size: style.font_size.unwrap_or(DEFAULT_FONT_SIZE),
            primary_colour: style.primary_colour.clone().unwrap_or_else(|| DEFAULT_PRIMARY_COLOUR.to_string()),
            outline_colour: style.outline_colour.clone().unwrap_or_else(|| DEFAULT_OUTLINE_COLOUR.to_string()),
            back_colour: style.back_colour.clone().unwrap_or_else(|| DEFAULT_BACK_COLOUR.to_string()),
            bold: style.bold.unwrap_or(false),
            border_style: style.border_style.clone().unwrap_or(BorderStyle::Outline),
            outline: style.outline.unwrap_or(DEFAULT_OUTLINE),
            shadow: style.shadow.unwrap_or(DEFAULT_SHADOW),
            margin_v: style.margin_v.unwrap_or(DEFAULT_MARGIN_V),
            line_height: style.line_height.unwrap_or(DEFAULT_LINE_HEIGHT),
        },
    }
}

impl BurnStyle {
    /// Flatten into the `force_style` mini-language: `Key=Value` pairs joined by commas.
    ///
    /// The style list has no escape for its separators, so `,` and `=` inside a
    /// value become spaces. Quotes and colons are left for the filter-graph
    /// quoting applied by the media command builder.
    pub fn force_style(&self) -> String {
        let pairs = [
            ("FontName", self.font_name.clone()),
            ("FontSize", self.font_size.to_string()),
            ("PrimaryColour", self.primary_colour.clone()),
            ("OutlineColour", self.outline_colour.clone()),
            ("BackColour", self.back_colour.clone()),
            ("Bold", if self.bold { "-1" } else { "0" }.to_string()),
            ("BorderStyle", self.border_style.engine_value().to_string()),
            ("Outline", self.outline.to_string()),
            ("Shadow", self.shadow.to_string()),
            ("MarginV", self.margin_v.to_string()),
        ];

        pairs
            .iter()
            .map(|(key, value)| format!("{}={}", key, value.replace([',', '='], " ")))
            .collect::<Vec<_>>()
            .join(",")
    }
}

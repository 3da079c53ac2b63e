//! Option string parsing into canonical transform options.
//!
//! An option string is a whitespace-separated, case-insensitive list of
//! tokens in any order:
//!
//! ```text
//! "300x200 bottomLeft q68 Box webp"
//!  ^^^^^^^ ^^^^^^^^^^ ^^^ ^^^ ^^^^
//!  size    anchor     |   |   format
//!                     |   resampling filter
//!                     quality
//! ```
//!
//! Tokens are tried against each grammar in a fixed priority order:
//!
//! | Grammar | Examples |
//! |---|---|
//! | action keyword | `resize`, `crop`, `fill`, `fit` |
//! | size | `300x200`, `300x`, `x200` |
//! | anchor | `center`, `topLeft`, `smart`, … |
//! | quality | `q1` … `q100` |
//! | rotation | `r0`, `r90`, `r180`, `r270` |
//! | resampling filter | `box`, `linear`, `lanczos`, … |
//! | format | `jpg`, `png`, `gif`, `webp`, `tif`, `avif` |
//! | background colour | `#fff`, `#e3e615` |
//!
//! A token that matches nothing, or a second token of the same kind, is an
//! [`InvalidSpec`](ImageError::InvalidSpec). Rejecting repeats keeps the
//! result independent of token order.
//!
//! Parsing happens in two steps. [`ParsedOptions::parse`] is purely lexical.
//! [`ParsedOptions::resolve`] fills in defaults from configuration and the
//! source format and checks the per-action requirements, producing a
//! [`TransformOptions`]. The option strings end up inside published file
//! names, so the grammar and [`TransformOptions::key`] must stay stable.

use crate::error::{ImageError, Result};
use crate::imaging::Filter;
use crate::media::Format;
use std::fmt;
use std::str::FromStr;

/// Bumped when the smart-crop selector changes, to invalidate stale crops.
pub const SMART_CROP_VERSION: u32 = 1;

/// The operation a derivation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Resize,
    Crop,
    Fill,
    Fit,
    Convert,
    Filter,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Resize => "resize",
            Action::Crop => "crop",
            Action::Fill => "fill",
            Action::Fit => "fit",
            Action::Convert => "convert",
            Action::Filter => "filter",
        }
    }

    fn from_keyword(token: &str) -> Option<Action> {
        match token {
            "resize" => Some(Action::Resize),
            "crop" => Some(Action::Crop),
            "fill" => Some(Action::Fill),
            "fit" => Some(Action::Fit),
            _ => None,
        }
    }

    /// Actions that select a sub-rectangle and therefore use the anchor.
    pub fn uses_anchor(self) -> bool {
        matches!(self, Action::Crop | Action::Fill)
    }
}

/// Where a crop rectangle is placed within the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anchor {
    Center,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    /// Content-aware placement, delegated to the smart-crop selector.
    Smart,
}

const ANCHORS: &[(&str, Anchor)] = &[
    ("center", Anchor::Center),
    ("top", Anchor::Top),
    ("bottom", Anchor::Bottom),
    ("left", Anchor::Left),
    ("right", Anchor::Right),
    ("topleft", Anchor::TopLeft),
    ("topright", Anchor::TopRight),
    ("bottomleft", Anchor::BottomLeft),
    ("bottomright", Anchor::BottomRight),
    ("smart", Anchor::Smart),
];

impl Anchor {
    pub fn as_str(self) -> &'static str {
        ANCHORS
            .iter()
            .find(|(_, a)| *a == self)
            .map(|(s, _)| *s)
            .unwrap_or("center")
    }

    fn key(self) -> String {
        match self {
            Anchor::Smart => format!("smart{SMART_CROP_VERSION}"),
            other => other.as_str().to_string(),
        }
    }
}

impl FromStr for Anchor {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        ANCHORS
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, a)| *a)
            .ok_or_else(|| ImageError::invalid_spec(s, "unknown anchor"))
    }
}

/// Counter-clockwise rotation applied before the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    None,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: u32) -> Option<Rotation> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    /// Quarter turns swap width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Resampling filter used when scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResampleFilter {
    NearestNeighbor,
    Box,
    Linear,
    CatmullRom,
    Gaussian,
    Lanczos,
}

const RESAMPLE_FILTERS: &[(&str, ResampleFilter)] = &[
    ("nearestneighbor", ResampleFilter::NearestNeighbor),
    ("box", ResampleFilter::Box),
    ("linear", ResampleFilter::Linear),
    ("catmullrom", ResampleFilter::CatmullRom),
    ("gaussian", ResampleFilter::Gaussian),
    ("lanczos", ResampleFilter::Lanczos),
];

impl ResampleFilter {
    pub fn as_str(self) -> &'static str {
        RESAMPLE_FILTERS
            .iter()
            .find(|(_, f)| *f == self)
            .map(|(s, _)| *s)
            .unwrap_or("box")
    }
}

impl FromStr for ResampleFilter {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        RESAMPLE_FILTERS
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, f)| *f)
            .ok_or_else(|| ImageError::invalid_spec(s, "unknown resampling filter"))
    }
}

/// Lossy encoding quality (1–100). Clamped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(75)
    }
}

/// Background colour used when flattening transparency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const WHITE: Rgb = Rgb([0xff, 0xff, 0xff]);

    pub fn to_hex(self) -> String {
        let [r, g, b] = self.0;
        format!("{r:02x}{g:02x}{b:02x}")
    }
}

impl FromStr for Rgb {
    type Err = ImageError;

    /// Parse `#rgb` or `#rrggbb` (the `#` is optional).
    fn from_str(s: &str) -> Result<Self> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        let bad = || ImageError::invalid_spec(s, "invalid colour");
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(bad());
        }
        let expanded: String = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect(),
            6 => hex.to_string(),
            _ => return Err(bad()),
        };
        let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).map_err(|_| bad());
        Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
    }
}

/// Defaults applied to options the caller left unset.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDefaults {
    pub quality: Quality,
    pub filter: ResampleFilter,
    pub anchor: Anchor,
    pub background: Rgb,
}

impl Default for OptionDefaults {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            filter: ResampleFilter::Box,
            anchor: Anchor::Smart,
            background: Rgb::WHITE,
        }
    }
}

/// The lexical result of parsing an option string: only what was written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOptions {
    pub action: Option<Action>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub anchor: Option<Anchor>,
    pub quality: Option<Quality>,
    pub rotation: Option<Rotation>,
    pub filter: Option<ResampleFilter>,
    pub format: Option<Format>,
    pub background: Option<Rgb>,
}

/// Parse a `WxH`, `Wx` or `xH` size token. Empty sides are `None`.
fn parse_size(token: &str) -> Option<(Option<u32>, Option<u32>)> {
    let (w, h) = token.split_once('x')?;
    if w.is_empty() && h.is_empty() {
        return None;
    }
    let side = |s: &str| -> Option<Option<u32>> {
        if s.is_empty() {
            Some(None)
        } else if s.chars().all(|c| c.is_ascii_digit()) {
            s.parse().ok().map(Some)
        } else {
            None
        }
    };
    Some((side(w)?, side(h)?))
}

/// Parse `<prefix><digits>`, e.g. `q68` or `r90`.
fn parse_prefixed(token: &str, prefix: char) -> Option<u32> {
    let digits = token.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn set_once<T>(slot: &mut Option<T>, value: T, spec: &str, what: &str) -> Result<()> {
    if slot.is_some() {
        return Err(ImageError::invalid_spec(spec, format!("duplicate {what}")));
    }
    *slot = Some(value);
    Ok(())
}

impl ParsedOptions {
    /// Tokenize and classify an option string.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parsed = ParsedOptions::default();
        let mut saw_size = false;

        for raw in spec.split_whitespace() {
            let token = raw.to_ascii_lowercase();

            if let Some(action) = Action::from_keyword(&token) {
                set_once(&mut parsed.action, action, spec, "action")?;
            } else if let Some((w, h)) = parse_size(&token) {
                if saw_size {
                    return Err(ImageError::invalid_spec(spec, "duplicate size"));
                }
                saw_size = true;
                parsed.width = w;
                parsed.height = h;
            } else if let Ok(anchor) = token.parse::<Anchor>() {
                set_once(&mut parsed.anchor, anchor, spec, "anchor")?;
            } else if let Some(q) = parse_prefixed(&token, 'q') {
                if !(1..=100).contains(&q) {
                    return Err(ImageError::invalid_spec(
                        spec,
                        format!("quality {q} out of range 1-100"),
                    ));
                }
                set_once(&mut parsed.quality, Quality::new(q), spec, "quality")?;
            } else if let Some(deg) = parse_prefixed(&token, 'r') {
                let rotation = Rotation::from_degrees(deg).ok_or_else(|| {
                    ImageError::invalid_spec(spec, format!("rotation must be 0, 90, 180 or 270, got {deg}"))
                })?;
                set_once(&mut parsed.rotation, rotation, spec, "rotation")?;
            } else if let Ok(filter) = token.parse::<ResampleFilter>() {
                set_once(&mut parsed.filter, filter, spec, "resampling filter")?;
            } else if let Some(format) = Format::from_extension(&token) {
                set_once(&mut parsed.format, format, spec, "format")?;
            } else if token.starts_with('#') {
                let rgb = token
                    .parse::<Rgb>()
                    .map_err(|_| ImageError::invalid_spec(spec, format!("invalid colour {raw:?}")))?;
                set_once(&mut parsed.background, rgb, spec, "background colour")?;
            } else {
                return Err(ImageError::invalid_spec(
                    spec,
                    format!("unrecognized token {raw:?}"),
                ));
            }
        }

        Ok(parsed)
    }

    /// Apply defaults and per-action rules.
    ///
    /// `method` is the action implied by the call site (`fill(...)`); it must
    /// agree with an action keyword in the string, if there is one. With
    /// neither, a string without a size is a format conversion.
    pub fn resolve(
        self,
        spec: &str,
        method: Option<Action>,
        defaults: &OptionDefaults,
        source_format: Format,
    ) -> Result<TransformOptions> {
        let action = match (method, self.action) {
            (Some(m), Some(k)) if m != k => {
                return Err(ImageError::invalid_spec(
                    spec,
                    format!("action {} conflicts with {}", k.as_str(), m.as_str()),
                ));
            }
            (Some(m), _) => m,
            (None, Some(k)) => k,
            (None, None) if self.width.is_none() && self.height.is_none() => Action::Convert,
            (None, None) => {
                return Err(ImageError::invalid_spec(
                    spec,
                    "a size needs an action (resize, crop, fill or fit)",
                ));
            }
        };

        // Zero means "unset" for resize; everything else needs both sides.
        let nonzero = |v: Option<u32>| v.filter(|&n| n > 0);
        let (width, height) = match action {
            Action::Resize => (nonzero(self.width), nonzero(self.height)),
            Action::Crop | Action::Fill | Action::Fit => {
                match (nonzero(self.width), nonzero(self.height)) {
                    (Some(w), Some(h)) => (Some(w), Some(h)),
                    _ => {
                        return Err(ImageError::invalid_spec(
                            spec,
                            format!("{} needs a positive width and height", action.as_str()),
                        ));
                    }
                }
            }
            Action::Convert | Action::Filter => {
                if self.width.is_some() || self.height.is_some() {
                    return Err(ImageError::invalid_spec(
                        spec,
                        format!("{} does not take a size", action.as_str()),
                    ));
                }
                (None, None)
            }
        };

        Ok(TransformOptions {
            action,
            width,
            height,
            anchor: self.anchor.unwrap_or(defaults.anchor),
            rotation: self.rotation.unwrap_or_default(),
            filter: self.filter.unwrap_or(defaults.filter),
            quality: self.quality.unwrap_or(defaults.quality),
            quality_explicit: self.quality.is_some(),
            format: self.format.unwrap_or(source_format),
            background: self.background,
            default_background: defaults.background,
            filters: Vec::new(),
        })
    }
}

/// Fully resolved options for one derivation step.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    pub action: Action,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub anchor: Anchor,
    pub rotation: Rotation,
    pub filter: ResampleFilter,
    pub quality: Quality,
    quality_explicit: bool,
    pub format: Format,
    /// Explicit background colour token, if any.
    pub background: Option<Rgb>,
    default_background: Rgb,
    /// Filter chain, applied in order. Only used by [`Action::Filter`].
    pub filters: Vec<Filter>,
}

impl TransformOptions {
    /// Parse and resolve in one step.
    pub fn parse(
        spec: &str,
        method: Option<Action>,
        defaults: &OptionDefaults,
        source_format: Format,
    ) -> Result<Self> {
        ParsedOptions::parse(spec)?.resolve(spec, method, defaults, source_format)
    }

    /// Options for a filter chain, keeping the source format.
    pub fn filter_chain(filters: Vec<Filter>, defaults: &OptionDefaults, format: Format) -> Self {
        Self {
            action: Action::Filter,
            width: None,
            height: None,
            anchor: defaults.anchor,
            rotation: Rotation::None,
            filter: defaults.filter,
            quality: defaults.quality,
            quality_explicit: false,
            format,
            background: None,
            default_background: defaults.background,
            filters,
        }
    }

    /// The colour transparent pixels are flattened onto.
    pub fn effective_background(&self) -> Rgb {
        self.background.unwrap_or(self.default_background)
    }

    /// Quality passed to the encoder, when the format takes one.
    pub fn encoder_quality(&self) -> Option<Quality> {
        (self.format.uses_quality() || self.quality_explicit).then_some(self.quality)
    }

    /// Human-readable key, embedded in derived file names.
    ///
    /// Fields appear in a fixed order regardless of token order:
    /// `{w}x{h}_{action}[_q{q}][_r{deg}][_bg{hex}][_{filter}][_{anchor}]`.
    /// Filter chains list their filters in application order instead of a
    /// size and resampling filter.
    pub fn key(&self) -> String {
        let mut key = match self.action {
            Action::Filter => {
                let mut k = String::from("filter");
                for f in &self.filters {
                    k.push('_');
                    k.push_str(&f.key());
                }
                k
            }
            action => format!(
                "{}x{}_{}",
                self.width.unwrap_or(0),
                self.height.unwrap_or(0),
                action.as_str()
            ),
        };
        if let Some(q) = self.encoder_quality() {
            key.push_str(&format!("_q{}", q.value()));
        }
        if self.rotation != Rotation::None {
            key.push_str(&format!("_r{}", self.rotation.degrees()));
        }
        if let Some(bg) = self.background {
            key.push_str(&format!("_bg{}", bg.to_hex()));
        }
        if matches!(
            self.action,
            Action::Resize | Action::Crop | Action::Fill | Action::Fit
        ) {
            key.push('_');
            key.push_str(self.filter.as_str());
        }
        if self.action.uses_anchor() {
            key.push('_');
            key.push_str(&self.anchor.key());
        }
        key
    }

    /// Complete serialization used for fingerprints: the key plus every
    /// setting that changes output bytes but is not shown in the key.
    pub fn canonical(&self) -> String {
        let mut out = format!("{}.{}", self.key(), self.format.default_extension());
        if !self.format.supports_alpha() && self.background.is_none() {
            out.push_str(&format!("|bg={}", self.default_background.to_hex()));
        }
        out
    }
}

impl fmt::Display for TransformOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

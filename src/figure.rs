//! Drawing surface for figure routines.
//!
//! A [`Figure`] is a retained list of artists (line series, scatter series,
//! bars, text) plus axes decoration. Routines draw into it through the script
//! API; rendering backends read it back. The surface is long-lived: between
//! runs it is cleared, never recreated, so its identity survives reloads.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Largest raster edge we allow a size hint to produce.
const MAX_EDGE_PIXELS: f32 = 8192.0;

/// Figure size in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct FigureSize {
    pub width: f32,
    pub height: f32,
}

impl FigureSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// Pixel dimensions at the given resolution, clamped to a sane range.
    pub fn to_pixels(&self, dpi: f32) -> (u32, u32) {
        let w = (self.width * dpi).round().clamp(1.0, MAX_EDGE_PIXELS);
        let h = (self.height * dpi).round().clamp(1.0, MAX_EDGE_PIXELS);
        (w as u32, h as u32)
    }
}

impl From<[f32; 2]> for FigureSize {
    fn from(v: [f32; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

impl From<FigureSize> for [f32; 2] {
    fn from(s: FigureSize) -> Self {
        [s.width, s.height]
    }
}

/// RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub [u8; 4]);

/// Default series colors, cycled in draw order.
const COLOR_CYCLE: [[u8; 3]; 10] = [
    [0x1f, 0x77, 0xb4],
    [0xff, 0x7f, 0x0e],
    [0x2c, 0xa0, 0x2c],
    [0xd6, 0x27, 0x28],
    [0x94, 0x67, 0xbd],
    [0x8c, 0x56, 0x4b],
    [0xe3, 0x77, 0xc2],
    [0x7f, 0x7f, 0x7f],
    [0xbc, 0xbd, 0x22],
    [0x17, 0xbe, 0xcf],
];

impl Color {
    pub const BLACK: Color = Color([0, 0, 0, 255]);
    pub const WHITE: Color = Color([255, 255, 255, 255]);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color([r, g, b, 255])
    }

    pub fn cycle(index: usize) -> Self {
        let [r, g, b] = COLOR_CYCLE[index % COLOR_CYCLE.len()];
        Color::rgb(r, g, b)
    }

    /// Parse a color name, single-letter shorthand, `#rrggbb` or `#rrggbbaa`.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if let Some(hex) = spec.strip_prefix('#') {
            return Self::parse_hex(hex);
        }
        let color = match spec.to_ascii_lowercase().as_str() {
            "k" | "black" => Color::BLACK,
            "w" | "white" => Color::WHITE,
            "r" | "red" => Color::rgb(214, 39, 40),
            "g" | "green" => Color::rgb(44, 160, 44),
            "b" | "blue" => Color::rgb(31, 119, 180),
            "c" | "cyan" => Color::rgb(23, 190, 207),
            "m" | "magenta" => Color::rgb(227, 119, 194),
            "y" | "yellow" => Color::rgb(188, 189, 34),
            "orange" => Color::rgb(255, 127, 14),
            "purple" => Color::rgb(148, 103, 189),
            "brown" => Color::rgb(140, 86, 75),
            "pink" => Color::rgb(247, 182, 210),
            "gray" | "grey" => Color::rgb(127, 127, 127),
            _ => return None,
        };
        Some(color)
    }

    fn parse_hex(hex: &str) -> Option<Self> {
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        let alpha = if hex.len() == 8 { byte(6)? } else { 255 };
        Some(Color([byte(0)?, byte(2)?, byte(4)?, alpha]))
    }
}

/// A point in data coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Style shared by all series artists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStyle {
    pub color: Color,
    /// Line width, marker radius or bar width depending on the artist.
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artist {
    Line { points: Vec<Point2>, style: SeriesStyle },
    Scatter { points: Vec<Point2>, style: SeriesStyle },
    /// Each point is (bar center, bar height).
    Bars { points: Vec<Point2>, style: SeriesStyle },
    Text { at: Point2, text: String, color: Color },
}

impl Artist {
    fn include_in(&self, bounds: &mut Bounds) {
        match self {
            Artist::Line { points, .. } | Artist::Scatter { points, .. } => {
                for p in points {
                    bounds.include(*p);
                }
            }
            Artist::Bars { points, style } => {
                let half = style.weight * 0.5;
                for p in points {
                    bounds.include(Point2::new(p.x - half, 0.0));
                    bounds.include(Point2::new(p.x + half, p.y));
                }
            }
            Artist::Text { at, .. } => bounds.include(*at),
        }
    }

    pub fn is_series(&self) -> bool {
        !matches!(self, Artist::Text { .. })
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Artist::Line { style, .. } | Artist::Scatter { style, .. } | Artist::Bars { style, .. } => {
                style.label.as_deref()
            }
            Artist::Text { .. } => None,
        }
    }
}

/// Axis-aligned data-space rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl Bounds {
    fn empty() -> Self {
        Self {
            min_x: f32::INFINITY,
            max_x: f32::NEG_INFINITY,
            min_y: f32::INFINITY,
            max_y: f32::NEG_INFINITY,
        }
    }

    fn include(&mut self, p: Point2) {
        if !p.x.is_finite() || !p.y.is_finite() {
            return;
        }
        self.min_x = self.min_x.min(p.x);
        self.max_x = self.max_x.max(p.x);
        self.min_y = self.min_y.min(p.y);
        self.max_y = self.max_y.max(p.y);
    }

    fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Widen degenerate extents so the view never has zero width or height.
    fn widened(mut self) -> Self {
        if self.max_x - self.min_x <= f32::EPSILON {
            self.min_x -= 0.5;
            self.max_x += 0.5;
        }
        if self.max_y - self.min_y <= f32::EPSILON {
            self.min_y -= 0.5;
            self.max_y += 0.5;
        }
        self
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }
}

/// The drawing surface.
#[derive(Debug, Clone, Serialize)]
pub struct Figure {
    size: FigureSize,
    window_title: String,
    title: Option<String>,
    xlabel: Option<String>,
    ylabel: Option<String>,
    xlim: Option<(f32, f32)>,
    ylim: Option<(f32, f32)>,
    grid: bool,
    legend: bool,
    artists: Vec<Artist>,
    #[serde(skip)]
    clear_count: u64,
}

impl Figure {
    pub fn new(size: FigureSize) -> Self {
        Self {
            size,
            window_title: String::new(),
            title: None,
            xlabel: None,
            ylabel: None,
            xlim: None,
            ylim: None,
            grid: false,
            legend: false,
            artists: Vec::new(),
            clear_count: 0,
        }
    }

    /// Apply size and window title without touching drawn content.
    pub fn configure(&mut self, size: FigureSize, window_title: &str) {
        self.size = size;
        self.window_title = window_title.to_string();
    }

    /// Remove all drawn content and axes decoration. Size and window title stay.
    pub fn clear(&mut self) {
        self.title = None;
        self.xlabel = None;
        self.ylabel = None;
        self.xlim = None;
        self.ylim = None;
        self.grid = false;
        self.legend = false;
        self.artists.clear();
        self.clear_count += 1;
    }

    pub fn size(&self) -> FigureSize {
        self.size
    }

    pub fn window_title(&self) -> &str {
        &self.window_title
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn xlabel(&self) -> Option<&str> {
        self.xlabel.as_deref()
    }

    pub fn ylabel(&self) -> Option<&str> {
        self.ylabel.as_deref()
    }

    pub fn grid(&self) -> bool {
        self.grid
    }

    pub fn legend(&self) -> bool {
        self.legend
    }

    pub fn artists(&self) -> &[Artist] {
        &self.artists
    }

    /// Number of times this surface has been cleared.
    pub fn clear_count(&self) -> u64 {
        self.clear_count
    }

    pub fn is_blank(&self) -> bool {
        self.artists.is_empty() && self.title.is_none()
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = Some(title.to_string());
    }

    pub fn set_xlabel(&mut self, label: &str) {
        self.xlabel = Some(label.to_string());
    }

    pub fn set_ylabel(&mut self, label: &str) {
        self.ylabel = Some(label.to_string());
    }

    pub fn set_xlim(&mut self, min: f32, max: f32) {
        self.xlim = Some((min, max));
    }

    pub fn set_ylim(&mut self, min: f32, max: f32) {
        self.ylim = Some((min, max));
    }

    pub fn set_grid(&mut self, enabled: bool) {
        self.grid = enabled;
    }

    pub fn set_legend(&mut self, enabled: bool) {
        self.legend = enabled;
    }

    /// Color for the next series when the caller gives none.
    pub fn next_color(&self) -> Color {
        Color::cycle(self.artists.iter().filter(|a| a.is_series()).count())
    }

    pub fn push(&mut self, artist: Artist) {
        self.artists.push(artist);
    }

    /// Extent of everything drawn, or None for an empty figure.
    pub fn data_bounds(&self) -> Option<Bounds> {
        let mut bounds = Bounds::empty();
        for artist in &self.artists {
            artist.include_in(&mut bounds);
        }
        if bounds.is_empty() {
            None
        } else {
            Some(bounds)
        }
    }

    /// The data rectangle a backend should map onto the plot area:
    /// explicit limits win, otherwise the data extent.
    pub fn view_bounds(&self) -> Bounds {
        let data = self.data_bounds().unwrap_or(Bounds {
            min_x: 0.0,
            max_x: 1.0,
            min_y: 0.0,
            max_y: 1.0,
        });
        let (min_x, max_x) = self.xlim.unwrap_or((data.min_x, data.max_x));
        let (min_y, max_y) = self.ylim.unwrap_or((data.min_y, data.max_y));
        Bounds {
            min_x,
            max_x,
            min_y,
            max_y,
        }
        .widened()
    }
}

/// Shared handle to the long-lived drawing surface.
///
/// Scripts receive clones of the handle; every clone points at the same figure.
#[derive(Debug, Clone)]
pub struct FigureHandle(Rc<RefCell<Figure>>);

impl FigureHandle {
    pub fn new(figure: Figure) -> Self {
        Self(Rc::new(RefCell::new(figure)))
    }

    pub fn borrow(&self) -> Ref<'_, Figure> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Figure> {
        self.0.borrow_mut()
    }

    /// True if both handles refer to the same surface.
    pub fn same_surface(&self, other: &FigureHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

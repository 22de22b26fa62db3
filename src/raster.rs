//! Figure rendering and file output.
//!
//! Figures are drawn with `plotters` into an RGB buffer: caption, axis
//! labels and ticks, grid, line series, scatter markers, bars, text
//! annotations and the legend. When text cannot be drawn (no usable system
//! font) the figure is drawn again without any text.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;
use plotters::coord::types::RangedCoordf32;
use plotters::prelude::*;
use plotters::style::Color as _;
use serde::{Deserialize, Serialize};

use crate::executor::RenderBackend;
use crate::figure::{Artist, Color, Figure};

/// Fraction of the image kept free around the chart.
const MARGIN_FRACTION: f32 = 0.03;

/// Points per inch; line widths, marker sizes and fonts are given in points.
const POINTS_PER_INCH: f32 = 72.0;

const FONT_FAMILY: &str = "sans-serif";
const FONT_POINTS: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Json => "json",
        }
    }
}

/// Write `figure` to `path` in the given format.
pub fn export(figure: &Figure, dpi: f32, format: OutputFormat, path: &Path) -> Result<()> {
    match format {
        OutputFormat::Png => save_png(&rasterize(figure, dpi)?, path),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(figure)?;
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
        }
    }
}

fn save_png(img: &RgbImage, path: &Path) -> Result<()> {
    image::save_buffer(
        path,
        img.as_raw(),
        img.width(),
        img.height(),
        image::ColorType::Rgb8,
    )
    .with_context(|| format!("writing {}", path.display()))
}

/// Backend that rasterizes every drawn figure and optionally writes it to a
/// preview file, so an image viewer with auto-reload can act as the window.
pub struct RasterBackend {
    dpi: f32,
    size_px: (u32, u32),
    title: String,
    preview: Option<PathBuf>,
    last: Option<RgbImage>,
}

impl RasterBackend {
    pub fn new(dpi: f32, preview: Option<PathBuf>) -> Self {
        Self {
            dpi,
            size_px: (0, 0),
            title: String::new(),
            preview,
            last: None,
        }
    }

    pub fn last_image(&self) -> Option<&RgbImage> {
        self.last.as_ref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl RenderBackend for RasterBackend {
    fn configure(&mut self, size_px: (u32, u32), title: &str) {
        self.size_px = size_px;
        self.title = title.to_string();
    }

    fn clear(&mut self) {
        self.last = None;
    }

    fn draw(&mut self, figure: &Figure) -> Result<()> {
        let img = rasterize(figure, self.dpi)?;
        debug_assert_eq!((img.width(), img.height()), self.size_px);
        if let Some(path) = &self.preview {
            save_png(&img, path)?;
            log::info!("Preview updated: {} ({})", path.display(), self.title);
        }
        self.last = Some(img);
        Ok(())
    }
}

fn plot_color(color: Color) -> RGBAColor {
    let [r, g, b, a] = color.0;
    RGBColor(r, g, b).mix(a as f64 / 255.0)
}

/// Pixel size of a length given in points, at least one pixel.
fn points_to_px(points: f32, dpi: f32) -> u32 {
    (points * dpi / POINTS_PER_INCH).round().max(1.0) as u32
}

/// Rasterize the figure at `dpi` pixels per inch.
pub fn rasterize(figure: &Figure, dpi: f32) -> Result<RgbImage> {
    let (width, height) = figure.size().to_pixels(dpi);
    let mut buffer = vec![0u8; width as usize * height as usize * 3];

    if let Err(err) = draw_figure(&mut buffer, (width, height), figure, dpi, true) {
        log::warn!("Drawing figure text failed ({}); drawing without text", err);
        draw_figure(&mut buffer, (width, height), figure, dpi, false)?;
    }

    RgbImage::from_raw(width, height, buffer).context("figure buffer has the wrong size")
}

fn draw_figure(buffer: &mut [u8], size: (u32, u32), figure: &Figure, dpi: f32, with_text: bool) -> Result<()> {
    let (width, height) = size;
    let font_px = points_to_px(FONT_POINTS, dpi) as f64;

    let root = BitMapBackend::with_buffer(buffer, size).into_drawing_area();
    root.fill(&WHITE)?;

    let view = figure.view_bounds();
    let mut builder = ChartBuilder::on(&root);
    builder.margin((height as f32 * MARGIN_FRACTION).round() as u32);
    if with_text {
        if let Some(title) = figure.title() {
            builder.caption(title, (FONT_FAMILY, font_px * 1.2));
        }
        builder
            .x_label_area_size((font_px * 2.5).min(height as f64 * 0.2) as u32)
            .y_label_area_size((font_px * 4.0).min(width as f64 * 0.2) as u32);
    }
    let mut chart = builder.build_cartesian_2d(view.min_x..view.max_x, view.min_y..view.max_y)?;

    let mut mesh = chart.configure_mesh();
    if !figure.grid() {
        mesh.disable_mesh();
    }
    if with_text {
        mesh.label_style((FONT_FAMILY, font_px));
        if let Some(label) = figure.xlabel() {
            mesh.x_desc(label);
        }
        if let Some(label) = figure.ylabel() {
            mesh.y_desc(label);
        }
    }
    mesh.draw()?;

    draw_artists(&mut chart, figure, dpi, with_text)?;

    let labelled = figure.artists().iter().any(|a| a.is_series() && a.label().is_some());
    if with_text && figure.legend() && labelled {
        chart
            .configure_series_labels()
            .label_font((FONT_FAMILY, font_px))
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

fn draw_artists(
    chart: &mut ChartContext<'_, BitMapBackend<'_>, Cartesian2d<RangedCoordf32, RangedCoordf32>>,
    figure: &Figure,
    dpi: f32,
    with_text: bool,
) -> Result<()> {
    let font_px = points_to_px(FONT_POINTS, dpi) as f64;

    for artist in figure.artists() {
        match artist {
            Artist::Line { points, style } => {
                let color = plot_color(style.color);
                let width = points_to_px(style.weight, dpi);
                if let [single] = points.as_slice() {
                    chart.draw_series(std::iter::once(Circle::new((single.x, single.y), width, color.filled())))?;
                    continue;
                }
                let series = chart.draw_series(LineSeries::new(
                    points.iter().map(|p| (p.x, p.y)),
                    color.stroke_width(width),
                ))?;
                if let Some(label) = &style.label {
                    series
                        .label(label.clone())
                        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(width)));
                }
            }
            Artist::Scatter { points, style } => {
                let color = plot_color(style.color);
                let radius = points_to_px(style.weight, dpi);
                let series = chart.draw_series(
                    points.iter().map(|p| Circle::new((p.x, p.y), radius, color.filled())),
                )?;
                if let Some(label) = &style.label {
                    series
                        .label(label.clone())
                        .legend(move |(x, y)| Circle::new((x + 10, y), radius, color.filled()));
                }
            }
            Artist::Bars { points, style } => {
                let color = plot_color(style.color);
                let half = style.weight * 0.5;
                let series = chart.draw_series(
                    points
                        .iter()
                        .map(|p| Rectangle::new([(p.x - half, 0.0), (p.x + half, p.y)], color.filled())),
                )?;
                if let Some(label) = &style.label {
                    series
                        .label(label.clone())
                        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 20, y + 5)], color.filled()));
                }
            }
            Artist::Text { at, text, color } => {
                if with_text {
                    let style = (FONT_FAMILY, font_px).into_font().color(&plot_color(*color));
                    chart.draw_series(std::iter::once(Text::new(text.clone(), (at.x, at.y), style)))?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::figure::{FigureSize, Point2, SeriesStyle};

    fn figure_with(artist: Artist) -> Figure {
        let mut figure = Figure::new(FigureSize::new(2.0, 1.0));
        figure.push(artist);
        figure
    }

    fn style(color: Color, weight: f32) -> SeriesStyle {
        SeriesStyle {
            color,
            weight,
            label: None,
        }
    }

    fn count_pixels(img: &RgbImage, rgb: [u8; 3]) -> usize {
        img.pixels().filter(|p| p.0 == rgb).count()
    }

    fn draw_plain(figure: &Figure, dpi: f32) -> RgbImage {
        let (width, height) = figure.size().to_pixels(dpi);
        let mut buffer = vec![0u8; width as usize * height as usize * 3];
        draw_figure(&mut buffer, (width, height), figure, dpi, false).unwrap();
        RgbImage::from_raw(width, height, buffer).unwrap()
    }

    #[test]
    fn test_image_size_follows_figure_size() {
        let img = rasterize(&Figure::new(FigureSize::new(3.0, 2.0)), 50.0).unwrap();
        assert_eq!((img.width(), img.height()), (150, 100));
    }

    #[test]
    fn test_blank_figure_is_white() {
        let img = draw_plain(&Figure::new(FigureSize::new(2.0, 2.0)), 100.0);
        assert_eq!(count_pixels(&img, [255, 255, 255]), 200 * 200);
    }

    #[test]
    fn test_line_pixels_use_series_color() {
        let red = Color::rgb(255, 0, 0);
        let figure = figure_with(Artist::Line {
            points: vec![Point2::new(0.0, 0.5), Point2::new(1.0, 0.5)],
            style: style(red, 2.0),
        });
        let img = rasterize(&figure, 100.0).unwrap();
        assert!(count_pixels(&img, [255, 0, 0]) > 50);
    }

    #[test]
    fn test_bars_fill_from_zero() {
        let blue = Color::rgb(0, 0, 255);
        let mut figure = figure_with(Artist::Bars {
            points: vec![Point2::new(0.0, 1.0)],
            style: style(blue, 0.5),
        });
        figure.set_xlim(-1.0, 1.0);
        figure.set_ylim(0.0, 1.0);
        let img = draw_plain(&figure, 100.0);

        // Without text the chart spans the image inside a 3 px margin, so the
        // bar covers the middle quarter of the width.
        assert_eq!(img.get_pixel(100, 50).0, [0, 0, 255]);
        assert_eq!(img.get_pixel(40, 50).0, [255, 255, 255]);
        let filled = count_pixels(&img, [0, 0, 255]);
        assert!(filled > 40 * 80 && filled < 60 * 100, "bar covered {} pixels", filled);
    }

    #[test]
    fn test_grid_draws_mesh_lines() {
        let mut figure = Figure::new(FigureSize::new(2.0, 2.0));
        let plain = draw_plain(&figure, 100.0);
        figure.set_grid(true);
        let gridded = draw_plain(&figure, 100.0);
        assert!(count_pixels(&gridded, [255, 255, 255]) < count_pixels(&plain, [255, 255, 255]));
    }

    #[test]
    fn test_plain_drawing_has_no_text() {
        let mut figure = figure_with(Artist::Text {
            at: Point2::new(0.5, 0.5),
            text: "note".to_string(),
            color: Color::BLACK,
        });
        figure.set_title("Example");
        figure.set_xlabel("x");

        let img = draw_plain(&figure, 100.0);
        assert_eq!(count_pixels(&img, [255, 255, 255]), 200 * 100);
    }

    #[test]
    fn test_figure_with_text_always_renders() {
        let mut figure = figure_with(Artist::Line {
            points: vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)],
            style: SeriesStyle {
                color: Color::rgb(255, 0, 0),
                weight: 1.5,
                label: Some("rising".to_string()),
            },
        });
        figure.push(Artist::Text {
            at: Point2::new(0.2, 0.8),
            text: "note".to_string(),
            color: Color::BLACK,
        });
        figure.set_title("Example");
        figure.set_ylabel("value");
        figure.set_legend(true);

        let img = rasterize(&figure, 100.0).unwrap();
        assert_eq!((img.width(), img.height()), (200, 100));
        assert!(count_pixels(&img, [255, 0, 0]) > 0);
    }

    #[test]
    fn test_export_png_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut figure = figure_with(Artist::Text {
            at: Point2::new(0.5, 0.5),
            text: "note".to_string(),
            color: Color::BLACK,
        });
        figure.set_title("Example");

        let png = dir.path().join("fig.png");
        export(&figure, 40.0, OutputFormat::Png, &png).unwrap();
        let loaded = image::open(&png).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (80, 40));

        let json = dir.path().join("fig.json");
        export(&figure, 40.0, OutputFormat::Json, &json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(value["title"], "Example");
        assert_eq!(value["artists"][0]["kind"], "text");
        assert_eq!(value["artists"][0]["text"], "note");
    }

    #[test]
    fn test_backend_keeps_last_image_and_writes_preview() {
        let dir = tempfile::tempdir().unwrap();
        let preview = dir.path().join("preview.png");
        let figure = Figure::new(FigureSize::new(1.0, 1.0));

        let mut backend = RasterBackend::new(64.0, Some(preview.clone()));
        backend.configure((64, 64), "fig_a");
        backend.draw(&figure).unwrap();
        assert!(backend.last_image().is_some());
        assert!(preview.exists());

        backend.clear();
        assert!(backend.last_image().is_none());
    }
}

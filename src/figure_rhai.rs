//! Rhai integration for the drawing surface.
//!
//! Registers the `Figure` type handed to every figure routine, plus a couple
//! of numeric helpers for building data series.
//!
//! Figure methods:
//!   fig.plot(ys) / fig.plot(xs, ys) / fig.plot(xs, ys, #{ color, width, label })
//!   fig.scatter(xs, ys) / fig.scatter(xs, ys, #{ color, size, label })
//!   fig.bar(heights) / fig.bar(xs, heights) / fig.bar(xs, heights, #{ color, width, label })
//!   fig.text(x, y, "text")
//!   fig.title(s), fig.xlabel(s), fig.ylabel(s)
//!   fig.xlim(min, max), fig.ylim(min, max), fig.grid(bool), fig.legend(bool)
//!
//! Figure properties (read-only):
//!   fig.width, fig.height    // inches
//!   fig.artist_count
//!
//! Helpers:
//!   linspace(start, end, n)  // n evenly spaced floats, inclusive
//!   arange(start, end, step) // start, start+step, ... < end

use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, FLOAT, INT};

use crate::figure::{Artist, Color, FigureHandle, Point2, SeriesStyle};

const DEFAULT_LINE_WIDTH: f32 = 2.0;
const DEFAULT_MARKER_SIZE: f32 = 3.0;
const DEFAULT_BAR_WIDTH: f32 = 0.8;

/// Upper bound on helper-generated arrays.
const MAX_GENERATED_POINTS: INT = 1_000_000;

type ApiResult<T> = Result<T, Box<EvalAltResult>>;

/// Convert a Rhai number (int or float) to f32.
fn to_f32(value: &Dynamic, what: &str) -> ApiResult<f32> {
    if let Ok(f) = value.as_float() {
        return Ok(f as f32);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f32);
    }
    Err(format!("Expected number for {}, got {}", what, value.type_name()).into())
}

fn to_numbers(values: &Array, what: &str) -> ApiResult<Vec<f32>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| to_f32(v, &format!("{}[{}]", what, i)))
        .collect()
}

fn zip_points(xs: &Array, ys: &Array) -> ApiResult<Vec<Point2>> {
    if xs.len() != ys.len() {
        return Err(format!(
            "x and y must have the same length (got {} and {})",
            xs.len(),
            ys.len()
        )
        .into());
    }
    let xs = to_numbers(xs, "x")?;
    let ys = to_numbers(ys, "y")?;
    Ok(xs.into_iter().zip(ys).map(|(x, y)| Point2::new(x, y)).collect())
}

fn indexed_points(ys: &Array) -> ApiResult<Vec<Point2>> {
    let ys = to_numbers(ys, "y")?;
    Ok(ys
        .into_iter()
        .enumerate()
        .map(|(i, y)| Point2::new(i as f32, y))
        .collect())
}

fn parse_color(value: &Dynamic) -> ApiResult<Color> {
    let spec = value
        .clone()
        .into_string()
        .map_err(|t| format!("Expected color string, got {}", t))?;
    Color::parse(&spec).ok_or_else(|| format!("Unknown color '{}'", spec).into())
}

/// Build a series style from an options map.
/// `weight_key` names the option that sets the style's weight ("width" or "size").
fn parse_style(
    options: &Map,
    default_color: Color,
    weight_key: &str,
    default_weight: f32,
) -> ApiResult<SeriesStyle> {
    let mut style = SeriesStyle {
        color: default_color,
        weight: default_weight,
        label: None,
    };

    for (key, value) in options {
        match key.as_str() {
            "color" => style.color = parse_color(value)?,
            "label" => {
                let label = value
                    .clone()
                    .into_string()
                    .map_err(|t| format!("Expected string for label, got {}", t))?;
                style.label = Some(label);
            }
            k if k == weight_key => {
                let weight = to_f32(value, weight_key)?;
                if !(weight > 0.0) {
                    return Err(format!("{} must be positive, got {}", weight_key, weight).into());
                }
                style.weight = weight;
            }
            other => {
                return Err(format!(
                    "Unknown option '{}' (expected color, {}, label)",
                    other, weight_key
                )
                .into())
            }
        }
    }

    Ok(style)
}

fn add_line(fig: &FigureHandle, points: Vec<Point2>, options: &Map) -> ApiResult<()> {
    let mut figure = fig.borrow_mut();
    let style = parse_style(options, figure.next_color(), "width", DEFAULT_LINE_WIDTH)?;
    figure.push(Artist::Line { points, style });
    Ok(())
}

fn add_scatter(fig: &FigureHandle, points: Vec<Point2>, options: &Map) -> ApiResult<()> {
    let mut figure = fig.borrow_mut();
    let style = parse_style(options, figure.next_color(), "size", DEFAULT_MARKER_SIZE)?;
    figure.push(Artist::Scatter { points, style });
    Ok(())
}

fn add_bars(fig: &FigureHandle, points: Vec<Point2>, options: &Map) -> ApiResult<()> {
    let mut figure = fig.borrow_mut();
    let style = parse_style(options, figure.next_color(), "width", DEFAULT_BAR_WIDTH)?;
    figure.push(Artist::Bars { points, style });
    Ok(())
}

/// Register the Figure API and numeric helpers with a Rhai engine.
pub fn register_figure_api(engine: &mut Engine) {
    engine.register_type_with_name::<FigureHandle>("Figure");

    // === Series ===
    engine.register_fn("plot", |fig: &mut FigureHandle, ys: Array| -> ApiResult<()> {
        add_line(fig, indexed_points(&ys)?, &Map::new())
    });
    engine.register_fn("plot", |fig: &mut FigureHandle, xs: Array, ys: Array| -> ApiResult<()> {
        add_line(fig, zip_points(&xs, &ys)?, &Map::new())
    });
    engine.register_fn(
        "plot",
        |fig: &mut FigureHandle, xs: Array, ys: Array, options: Map| -> ApiResult<()> {
            add_line(fig, zip_points(&xs, &ys)?, &options)
        },
    );

    engine.register_fn("scatter", |fig: &mut FigureHandle, xs: Array, ys: Array| -> ApiResult<()> {
        add_scatter(fig, zip_points(&xs, &ys)?, &Map::new())
    });
    engine.register_fn(
        "scatter",
        |fig: &mut FigureHandle, xs: Array, ys: Array, options: Map| -> ApiResult<()> {
            add_scatter(fig, zip_points(&xs, &ys)?, &options)
        },
    );

    engine.register_fn("bar", |fig: &mut FigureHandle, heights: Array| -> ApiResult<()> {
        add_bars(fig, indexed_points(&heights)?, &Map::new())
    });
    engine.register_fn("bar", |fig: &mut FigureHandle, xs: Array, heights: Array| -> ApiResult<()> {
        add_bars(fig, zip_points(&xs, &heights)?, &Map::new())
    });
    engine.register_fn(
        "bar",
        |fig: &mut FigureHandle, xs: Array, heights: Array, options: Map| -> ApiResult<()> {
            add_bars(fig, zip_points(&xs, &heights)?, &options)
        },
    );

    engine.register_fn(
        "text",
        |fig: &mut FigureHandle, x: Dynamic, y: Dynamic, text: ImmutableString| -> ApiResult<()> {
            let at = Point2::new(to_f32(&x, "x")?, to_f32(&y, "y")?);
            fig.borrow_mut().push(Artist::Text {
                at,
                text: text.to_string(),
                color: Color::BLACK,
            });
            Ok(())
        },
    );

    // === Decoration ===
    engine.register_fn("title", |fig: &mut FigureHandle, title: ImmutableString| {
        fig.borrow_mut().set_title(title.as_str());
    });
    engine.register_fn("xlabel", |fig: &mut FigureHandle, label: ImmutableString| {
        fig.borrow_mut().set_xlabel(label.as_str());
    });
    engine.register_fn("ylabel", |fig: &mut FigureHandle, label: ImmutableString| {
        fig.borrow_mut().set_ylabel(label.as_str());
    });
    engine.register_fn(
        "xlim",
        |fig: &mut FigureHandle, min: Dynamic, max: Dynamic| -> ApiResult<()> {
            let (min, max) = (to_f32(&min, "xlim min")?, to_f32(&max, "xlim max")?);
            if !(min < max) {
                return Err(format!("xlim requires min < max (got {}, {})", min, max).into());
            }
            fig.borrow_mut().set_xlim(min, max);
            Ok(())
        },
    );
    engine.register_fn(
        "ylim",
        |fig: &mut FigureHandle, min: Dynamic, max: Dynamic| -> ApiResult<()> {
            let (min, max) = (to_f32(&min, "ylim min")?, to_f32(&max, "ylim max")?);
            if !(min < max) {
                return Err(format!("ylim requires min < max (got {}, {})", min, max).into());
            }
            fig.borrow_mut().set_ylim(min, max);
            Ok(())
        },
    );
    engine.register_fn("grid", |fig: &mut FigureHandle, enabled: bool| {
        fig.borrow_mut().set_grid(enabled);
    });
    engine.register_fn("legend", |fig: &mut FigureHandle, enabled: bool| {
        fig.borrow_mut().set_legend(enabled);
    });

    // === Properties ===
    engine.register_get("width", |fig: &mut FigureHandle| -> FLOAT {
        fig.borrow().size().width as FLOAT
    });
    engine.register_get("height", |fig: &mut FigureHandle| -> FLOAT {
        fig.borrow().size().height as FLOAT
    });
    engine.register_get("artist_count", |fig: &mut FigureHandle| -> INT {
        fig.borrow().artists().len() as INT
    });

    // === Helpers ===
    engine.register_fn(
        "linspace",
        |start: Dynamic, end: Dynamic, n: INT| -> ApiResult<Array> {
            let (start, end) = (to_f32(&start, "start")?, to_f32(&end, "end")?);
            if !(0..=MAX_GENERATED_POINTS).contains(&n) {
                return Err(format!("linspace count out of range: {}", n).into());
            }
            let values = match n {
                0 => Array::new(),
                1 => vec![Dynamic::from(start as FLOAT)],
                _ => {
                    let step = (end - start) / (n - 1) as f32;
                    (0..n)
                        .map(|i| Dynamic::from((start + step * i as f32) as FLOAT))
                        .collect()
                }
            };
            Ok(values)
        },
    );
    engine.register_fn(
        "arange",
        |start: Dynamic, end: Dynamic, step: Dynamic| -> ApiResult<Array> {
            let start = to_f32(&start, "start")?;
            let end = to_f32(&end, "end")?;
            let step = to_f32(&step, "step")?;
            if !(step > 0.0) {
                return Err(format!("arange step must be positive, got {}", step).into());
            }
            let count = ((end - start) / step).ceil().max(0.0);
            if count > MAX_GENERATED_POINTS as f32 {
                return Err(format!("arange would produce {} values", count).into());
            }
            Ok((0..count as INT)
                .map(|i| Dynamic::from((start + step * i as f32) as FLOAT))
                .collect())
        },
    );
}

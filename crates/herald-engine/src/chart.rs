//! Outcome pie chart — drawn as SVG, rasterized to PNG for upload as a photo.

use std::f64::consts::PI;
use std::fmt::Write;
use std::sync::{Arc, LazyLock};

use herald_core::{HeraldError, Result};
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::{self, fontdb};

use crate::retry::ErrorKind;
use crate::run_state::{RunSnapshot, percent};

const WIDTH: u32 = 600;
const HEIGHT: u32 = 250;
const RADIUS: f64 = 120.0;
const CENTER_X: f64 = WIDTH as f64 / 2.0 - 100.0;
const CENTER_Y: f64 = HEIGHT as f64 / 2.0;
const LEGEND_X: u32 = 374;
const LEGEND_Y: u32 = 50;
/// Raster scale over the SVG's own size.
const SCALE: f32 = 2.0;

/// System fonts, loaded once. `sans-serif` falls back to the first installed face.
static FONTS: LazyLock<Arc<fontdb::Database>> = LazyLock::new(|| {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    let fallback = db
        .faces()
        .next()
        .and_then(|face| face.families.first())
        .map(|(name, _)| name.clone());
    if let Some(name) = fallback {
        db.set_sans_serif_family(name);
    }
    tracing::debug!("🔤 Loaded {} font faces for charts", db.len());
    Arc::new(db)
});

/// One outcome category of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub label: &'static str,
    pub color: &'static str,
    /// Share of the run's total, 0–100.
    pub percent: f64,
}

/// Outcome categories as shares of `total`.
pub fn slices(snapshot: &RunSnapshot) -> Vec<Slice> {
    let share = |count| percent(count, snapshot.total);
    let mut slices = vec![
        Slice {
            label: "Success",
            color: "#28A745",
            percent: share(snapshot.done),
        },
        Slice {
            label: "401 Unauthorized",
            color: "#DC3545",
            percent: share(snapshot.tally.get(ErrorKind::Unauthorized)),
        },
        Slice {
            label: "403 Bot Blocked",
            color: "#FFC107",
            percent: share(snapshot.tally.get(ErrorKind::BotBlocked)),
        },
        Slice {
            label: "404 Not Found",
            color: "#17A2B8",
            percent: share(snapshot.tally.get(ErrorKind::NotFound)),
        },
        Slice {
            label: "Unknown Errors",
            color: "#6C757D",
            percent: share(snapshot.tally.get(ErrorKind::Unknown)),
        },
    ];
    let untouched = snapshot.total.saturating_sub(snapshot.attempted());
    if snapshot.stopped && untouched > 0 {
        slices.push(Slice {
            label: "Not attempted",
            color: "#E9ECEF",
            percent: share(untouched),
        });
    }
    slices
}

/// Render the pie chart. Fails for a run with no targets.
pub fn render_svg(snapshot: &RunSnapshot) -> Result<String> {
    if snapshot.total == 0 {
        return Err(HeraldError::Chart("no targets to chart".into()));
    }
    let slices = slices(snapshot);

    let mut svg = String::new();
    fmt(write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
    ))?;
    fmt(write!(
        svg,
        r##"<rect width="{WIDTH}" height="{HEIGHT}" fill="#FFFFFF"/>"##
    ))?;

    let mut start = -PI / 2.0;
    for slice in slices.iter().filter(|s| s.percent > 0.0) {
        if slice.percent >= 100.0 {
            // A single arc cannot close on itself.
            fmt(write!(
                svg,
                r#"<circle cx="{CENTER_X}" cy="{CENTER_Y}" r="{RADIUS}" fill="{}"/>"#,
                slice.color
            ))?;
            break;
        }
        let end = start + slice.percent / 100.0 * 2.0 * PI;
        let (x1, y1) = point(start);
        let (x2, y2) = point(end);
        let large_arc = u8::from(end - start > PI);
        fmt(write!(
            svg,
            r#"<path d="M {CENTER_X} {CENTER_Y} L {x1:.2} {y1:.2} A {RADIUS} {RADIUS} 0 {large_arc} 1 {x2:.2} {y2:.2} Z" fill="{}"/>"#,
            slice.color
        ))?;
        start = end;
    }

    let mut y = LEGEND_Y;
    for slice in &slices {
        fmt(write!(
            svg,
            r#"<rect x="{LEGEND_X}" y="{y}" width="15" height="15" fill="{}"/>"#,
            slice.color
        ))?;
        fmt(write!(
            svg,
            r##"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="14" fill="#000000">{}: {:.2}%</text>"##,
            LEGEND_X + 20,
            y + 12,
            slice.label,
            slice.percent
        ))?;
        y += 20;
    }
    svg.push_str("</svg>");
    Ok(svg)
}

/// Render the pie chart as PNG bytes. Fails for a run with no targets.
pub fn render_png(snapshot: &RunSnapshot) -> Result<Vec<u8>> {
    let svg = render_svg(snapshot)?;
    let options = usvg::Options {
        fontdb: FONTS.clone(),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(&svg, &options)
        .map_err(|e| HeraldError::Chart(format!("invalid chart SVG: {e}")))?;

    let size = tree.size().to_int_size();
    let (width, height) = (
        (size.width() as f32 * SCALE) as u32,
        (size.height() as f32 * SCALE) as u32,
    );
    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| HeraldError::Chart(format!("cannot allocate {width}x{height} canvas")))?;
    resvg::render(&tree, Transform::from_scale(SCALE, SCALE), &mut pixmap.as_mut());

    pixmap
        .encode_png()
        .map_err(|e| HeraldError::Chart(format!("PNG encoding failed: {e}")))
}

fn point(angle: f64) -> (f64, f64) {
    (
        CENTER_X + RADIUS * angle.cos(),
        CENTER_Y + RADIUS * angle.sin(),
    )
}

fn fmt(result: std::fmt::Result) -> Result<()> {
    result.map_err(|e| HeraldError::Chart(e.to_string()))
}

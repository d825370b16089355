// =============================================================================
// Chart Renderer — snapshot → SVG candlestick chart (plotters)
// =============================================================================
//
// Layout: the top band carries the previous headline (grey), the current
// headline (bold blue) and an info row with the index level on the left and
// the remaining time on the right. The rest is the candle plot.
// =============================================================================

use anyhow::Result;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::FontStyle;

use crate::news::wrap_headline;
use crate::runtime_config::ChartConfig;
use crate::snapshot::Snapshot;

const FONT: &str = "serif";
const HEADER_SHARE: f64 = 0.24;
const PREVIOUS_NEWS_COLOR: RGBColor = RGBColor(105, 105, 105);
const CURRENT_NEWS_COLOR: RGBColor = RGBColor(0, 5, 139);
const LAST_PRICE_COLOR: RGBColor = RGBColor(70, 70, 200);

/// Encoded chart image plus the content type to serve it with.
#[derive(Debug, Clone)]
pub struct RenderedChart {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

pub struct ChartRenderer {
    config: ChartConfig,
    up: RGBColor,
    down: RGBColor,
}

impl ChartRenderer {
    pub fn new(config: ChartConfig) -> Self {
        let up = parse_hex_color(&config.up_color).unwrap_or(RGBColor(0, 139, 102));
        let down = parse_hex_color(&config.down_color).unwrap_or(RGBColor(214, 0, 0));
        Self { config, up, down }
    }

    pub fn render(&self, snap: &Snapshot) -> Result<RenderedChart> {
        let (width, height) = (self.config.width, self.config.height);
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, (width, height)).into_drawing_area();
            root.fill(&WHITE).map_err(draw_err)?;

            let header_px = (height as f64 * HEADER_SHARE) as i32;
            let (header, body) = root.split_vertically(header_px);
            self.draw_header(&header, snap)?;
            self.draw_candles(&body, snap)?;

            root.present().map_err(draw_err)?;
        }
        Ok(RenderedChart {
            bytes: svg.into_bytes(),
            content_type: "image/svg+xml",
        })
    }

    fn draw_header<DB: DrawingBackend>(
        &self,
        area: &DrawingArea<DB, Shift>,
        snap: &Snapshot,
    ) -> Result<()> {
        let (w, h) = area.dim_in_pixel();
        let center_x = (w / 2) as i32;
        let mut y = 8i32;

        if let Some(prev) = &snap.news.previous {
            let style = (FONT, 16.0)
                .into_font()
                .color(&PREVIOUS_NEWS_COLOR)
                .pos(Pos::new(HPos::Center, VPos::Top));
            for line in wrap_headline(
                &prev.headline,
                self.config.previous_headline_len,
                self.config.previous_headline_lines,
            ) {
                area.draw(&Text::new(line, (center_x, y), style.clone()))
                    .map_err(draw_err)?;
                y += 20;
            }
            y += 6;
        }

        if let Some(cur) = &snap.news.current {
            let style = (FONT, 24.0)
                .into_font()
                .style(FontStyle::Bold)
                .color(&CURRENT_NEWS_COLOR)
                .pos(Pos::new(HPos::Center, VPos::Top));
            for line in wrap_headline(
                &cur.headline,
                self.config.current_headline_len,
                self.config.current_headline_lines,
            ) {
                area.draw(&Text::new(line, (center_x, y), style.clone()))
                    .map_err(draw_err)?;
                y += 28;
            }
        }

        let info_y = h as i32 - 8;
        let index_level = match snap.index_price {
            Some(p) => format!("{p:.2}"),
            None => "—".to_string(),
        };
        let left = match &snap.ticker {
            Some(t) => format!("{t}  Current Index Level: {index_level}"),
            None => format!("Current Index Level: {index_level}"),
        };
        let left_style = (FONT, 18.0)
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(HPos::Left, VPos::Bottom));
        area.draw(&Text::new(left, ((w as f64 * 0.05) as i32, info_y), left_style))
            .map_err(draw_err)?;

        let right = format!(
            "Time Remaining: {}  [{}]",
            snap.status.remaining_display, snap.status.phase
        );
        let right_style = (FONT, 18.0)
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(HPos::Right, VPos::Bottom));
        area.draw(&Text::new(right, ((w as f64 * 0.95) as i32, info_y), right_style))
            .map_err(draw_err)?;

        Ok(())
    }

    fn draw_candles<DB: DrawingBackend>(
        &self,
        area: &DrawingArea<DB, Shift>,
        snap: &Snapshot,
    ) -> Result<()> {
        let candles = snap.visible_candles(self.config.visible_max);
        let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
            let (w, h) = area.dim_in_pixel();
            let style = (FONT, 20.0)
                .into_font()
                .color(&PREVIOUS_NEWS_COLOR)
                .pos(Pos::new(HPos::Center, VPos::Center));
            area.draw(&Text::new(
                "Waiting for ticks…",
                ((w / 2) as i32, (h / 2) as i32),
                style,
            ))
            .map_err(draw_err)?;
            return Ok(());
        };

        let interval = snap.interval.max(1);
        let x_range = (first.bucket_start - interval)..(last.bucket_start + interval);

        let low = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let high = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let pad = if high > low {
            (high - low) * 0.05
        } else {
            (high.abs() * 0.001).max(0.01)
        };

        let mut chart = ChartBuilder::on(area)
            .margin(20)
            .x_label_area_size(45)
            .y_label_area_size(80)
            .build_cartesian_2d(x_range.clone(), (low - pad)..(high + pad))
            .map_err(draw_err)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc(snap.time_axis_label())
            .y_desc("Price")
            .label_style((FONT, 15.0))
            .y_label_formatter(&|v| format!("{v:.2}"))
            .draw()
            .map_err(draw_err)?;

        let plot_w = chart.plotting_area().dim_in_pixel().0 as f64;
        let slots = ((x_range.end - x_range.start) / interval).max(1) as f64;
        let body_px = ((plot_w / slots) * 0.6).clamp(1.0, 40.0) as u32;

        let (up, down) = (self.up, self.down);
        chart
            .draw_series(candles.iter().map(|c| {
                CandleStick::new(
                    c.bucket_start,
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    up.filled(),
                    down.filled(),
                    body_px,
                )
            }))
            .map_err(draw_err)?;

        if let Some(price) = snap.index_price {
            chart
                .draw_series(LineSeries::new(
                    vec![(x_range.start, price), (x_range.end, price)],
                    LAST_PRICE_COLOR.mix(0.4).stroke_width(1),
                ))
                .map_err(draw_err)?;
        }

        Ok(())
    }
}

fn draw_err<E: std::fmt::Display>(e: E) -> anyhow::Error {
    anyhow::anyhow!("chart drawing failed: {e}")
}

/// Parse `#rrggbb`.
pub fn parse_hex_color(s: &str) -> Option<RGBColor> {
    let hex = s.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}

use std::f64::consts::PI;

use camino::{Utf8Path, Utf8PathBuf};
use svg::Document;
use svg::node::element::{Circle, Path, Rectangle, Text};
use tracing::debug;

use crate::cache::Cache;
use crate::config::ChartSettings;
use crate::domain::{AppName, ChartGenerator, ChartType};
use crate::error::IprError;
use crate::store::{Session, SessionStore};

const COLOURS: &[&str] = &["#66FF66", "#FFFF66", "#66FF99", "#99CCFF", "#FF9966", "#CC99FF"];
const TEXT_BAR_WIDTH: usize = 50;

/// Count chart for one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    app: AppName,
    title: String,
}

impl Chart {
    pub fn new(app: AppName, title: impl Into<String>) -> Self {
        Self {
            app,
            title: title.into(),
        }
    }

    /// `"<app> Matches"`, the title used for session charts.
    pub fn for_app(app: AppName) -> Self {
        let title = format!("{app} Matches");
        Self::new(app, title)
    }

    pub fn app(&self) -> &AppName {
        &self.app
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// e.g. `pfam_matchessvgbar.svg`
    pub fn file_name(&self, settings: &ChartSettings) -> String {
        let extension = match settings.generator {
            ChartGenerator::Svg => "svg",
            ChartGenerator::Text => "txt",
        };
        format!(
            "{}{}{}.{extension}",
            self.title.replace(' ', "_").to_lowercase(),
            settings.generator,
            settings.chart_type
        )
    }

    pub fn default_path(&self, session: &Session, settings: &ChartSettings) -> Utf8PathBuf {
        session.dir().join(self.file_name(settings))
    }

    /// Renders the app's counts to `path`. `false` when there is nothing to draw.
    pub fn save(
        &self,
        cache: &Cache,
        settings: &ChartSettings,
        path: &Utf8Path,
    ) -> Result<bool, IprError> {
        let Some((values, labels)) = cache.get_counts(self.app.as_str()) else {
            return Ok(false);
        };
        let content = match settings.generator {
            ChartGenerator::Svg => {
                render_svg(&values, &labels, settings.chart_type, &self.title, settings.scale)
            }
            ChartGenerator::Text => render_text(&values, &labels, &self.title),
        };
        SessionStore::write_bytes_atomic(path, content.as_bytes())?;
        debug!(app = %self.app, path = %path, "chart saved");
        Ok(true)
    }
}

pub fn render_svg(
    values: &[i64],
    labels: &[String],
    chart_type: ChartType,
    title: &str,
    scale: u32,
) -> String {
    match chart_type {
        ChartType::Pie => render_pie(values, labels, title, scale),
        ChartType::Bar => render_bar(values, labels, title, scale),
    }
}

fn title_text(title: &str, x: f64) -> Text {
    Text::new(title)
        .set("x", x)
        .set("y", 18)
        .set("text-anchor", "middle")
        .set("font-family", "sans-serif")
        .set("font-size", 14)
        .set("font-weight", "bold")
}

fn render_pie(values: &[i64], labels: &[String], title: &str, scale: u32) -> String {
    let scale = f64::from(scale.max(50));
    let width = 3.6 * scale;
    let height = scale;
    let radius = (height - 40.0) / 2.0;
    let (cx, cy) = (radius + 20.0, 30.0 + radius);
    let total: i64 = values.iter().map(|value| value.max(&0)).sum();

    let mut doc = Document::new()
        .set("viewBox", (0.0, 0.0, width, height))
        .set("width", width)
        .set("height", height)
        .add(title_text(title, width / 2.0));

    if total > 0 {
        let mut angle = -PI / 2.0;
        for (index, value) in values.iter().enumerate() {
            let fraction = (*value).max(0) as f64 / total as f64;
            if fraction <= 0.0 {
                continue;
            }
            let colour = COLOURS[index % COLOURS.len()];
            if fraction >= 1.0 {
                doc = doc.add(
                    Circle::new()
                        .set("cx", cx)
                        .set("cy", cy)
                        .set("r", radius)
                        .set("fill", colour)
                        .set("stroke", "#333333"),
                );
                break;
            }
            let end = angle + fraction * 2.0 * PI;
            let large_arc = i32::from(fraction > 0.5);
            let d = format!(
                "M {cx:.2} {cy:.2} L {:.2} {:.2} A {radius:.2} {radius:.2} 0 {large_arc} 1 {:.2} {:.2} Z",
                cx + radius * angle.cos(),
                cy + radius * angle.sin(),
                cx + radius * end.cos(),
                cy + radius * end.sin(),
            );
            doc = doc.add(
                Path::new()
                    .set("d", d)
                    .set("fill", colour)
                    .set("stroke", "#333333"),
            );
            angle = end;
        }
    }

    let legend_x = cx + radius + 30.0;
    for (index, (value, label)) in values.iter().zip(labels).enumerate() {
        let y = 34.0 + index as f64 * 16.0;
        if y > height - 4.0 {
            break;
        }
        doc = doc
            .add(
                Rectangle::new()
                    .set("x", legend_x)
                    .set("y", y - 10.0)
                    .set("width", 10)
                    .set("height", 10)
                    .set("fill", COLOURS[index % COLOURS.len()]),
            )
            .add(
                Text::new(format!("{label} ({value})"))
                    .set("x", legend_x + 16.0)
                    .set("y", y)
                    .set("font-family", "sans-serif")
                    .set("font-size", 11),
            );
    }
    doc.to_string()
}

fn render_bar(values: &[i64], labels: &[String], title: &str, scale: u32) -> String {
    let scale = f64::from(scale.max(50));
    let bar_height = (scale / 20.0).floor().max(4.0);
    let width = 3.6 * scale;
    let height = values.len() as f64 * (bar_height + 8.0) + 35.0 + 20.0;
    let label_width = width * 0.3;
    let plot_width = width - label_width - 20.0;
    let max_x = axis_max(values.first().copied().unwrap_or(0)) as f64;

    let mut doc = Document::new()
        .set("viewBox", (0.0, 0.0, width, height))
        .set("width", width)
        .set("height", height)
        .add(title_text(title, width / 2.0));

    for (index, (value, label)) in values.iter().zip(labels).enumerate() {
        let y = 30.0 + index as f64 * (bar_height + 8.0);
        let bar_width = if max_x > 0.0 {
            plot_width * (*value).max(0) as f64 / max_x
        } else {
            0.0
        };
        doc = doc
            .add(
                Text::new(label.as_str())
                    .set("x", label_width - 6.0)
                    .set("y", y + bar_height * 0.8)
                    .set("text-anchor", "end")
                    .set("font-family", "sans-serif")
                    .set("font-size", 11),
            )
            .add(
                Rectangle::new()
                    .set("x", label_width)
                    .set("y", y)
                    .set("width", bar_width)
                    .set("height", bar_height)
                    .set("fill", COLOURS[index % COLOURS.len()])
                    .set("stroke", "#333333"),
            )
            .add(
                Text::new(value.to_string())
                    .set("x", label_width + bar_width + 4.0)
                    .set("y", y + bar_height * 0.8)
                    .set("font-family", "sans-serif")
                    .set("font-size", 10),
            );
    }
    doc.to_string()
}

/// Upper bound of the x axis: at most ten steps above the largest count.
fn axis_max(largest: i64) -> i64 {
    let step = ((largest + 9) / 10).max(1);
    (largest / step + 1).min(11) * step
}

pub fn render_text(values: &[i64], labels: &[String], title: &str) -> String {
    let mut out = format!("{title}\n");
    let largest = values.iter().copied().max().unwrap_or(0).max(1);
    let label_width = labels.iter().map(|label| label.len()).max().unwrap_or(0);
    for (value, label) in values.iter().zip(labels) {
        let bar = usize::try_from(value.max(&0) * TEXT_BAR_WIDTH as i64 / largest).unwrap_or(0);
        out.push_str(&format!(
            "{label:>label_width$} | {} {value}\n",
            "#".repeat(bar)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_follows_title_and_settings() {
        let chart = Chart::for_app("PFAM".parse().unwrap());
        let settings = ChartSettings {
            max_results: 10,
            chart_type: ChartType::Bar,
            generator: ChartGenerator::Svg,
            scale: 200,
        };
        assert_eq!(chart.file_name(&settings), "pfam_matchessvgbar.svg");
    }

    #[test]
    fn axis_bound_covers_largest_count() {
        assert_eq!(axis_max(50), 55);
        assert_eq!(axis_max(7), 8);
        assert_eq!(axis_max(0), 1);
    }

    #[test]
    fn svg_contains_labels() {
        let labels = vec!["Kringle".to_string(), "PAN".to_string()];
        let svg = render_svg(&[5, 3], &labels, ChartType::Pie, "PFAM Matches", 200);
        assert!(svg.contains("<svg"));
        assert!(svg.contains("Kringle (5)"));
        let svg = render_svg(&[5, 3], &labels, ChartType::Bar, "PFAM Matches", 200);
        assert!(svg.contains("PAN"));
    }

    #[test]
    fn text_chart_one_line_per_label() {
        let labels = vec!["Kringle".to_string(), "PAN".to_string()];
        let text = render_text(&[10, 5], &labels, "PFAM Matches");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "PFAM Matches");
        assert_eq!(lines[1], format!("Kringle | {} 10", "#".repeat(TEXT_BAR_WIDTH)));
        assert_eq!(lines[2], format!("    PAN | {} 5", "#".repeat(TEXT_BAR_WIDTH / 2)));
        assert!(text.ends_with('\n'));
    }
}

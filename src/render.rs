//! Rendering feature records to static HTML pages
//!
//! Output layout under the output directory:
//!
//! ```text
//! feature_pages/
//!   index.html          one link per feature
//!   feature_{id}.html   one page per feature, overwritten on every run
//!   summary.json        run totals and settings
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::analysis::RunSummary;
use crate::buffer::Example;
use crate::classify::{ActivationHistogram, FeatureRecord};
use crate::codec::TextCodec;

/// Receives each feature's record as soon as it is computed
pub trait FeatureRenderer {
    /// Called once before the first feature
    fn begin(&mut self, n_features: usize) -> Result<()>;

    fn render(&mut self, record: &FeatureRecord) -> Result<()>;

    /// Called once after the last feature
    fn finish(&mut self, summary: &RunSummary) -> Result<()>;
}

const STYLE: &str = "body { font-family: sans-serif; margin: 2em; }
.window { font-family: monospace; white-space: pre; margin: 2px 0; }
.window span { padding: 0 1px; }
.center { outline: 1px solid #333; }
table { border-collapse: collapse; }
td { padding: 2px 8px; }
.meta { color: #666; }";

/// Writes one HTML page per feature
pub struct HtmlRenderer<'a> {
    dir: PathBuf,
    codec: &'a dyn TextCodec,
    histogram_bins: usize,
}

impl<'a> HtmlRenderer<'a> {
    /// Render into `<output>/feature_pages`, creating it if needed
    pub fn new(output: &Path, codec: &'a dyn TextCodec, histogram_bins: usize) -> Result<Self> {
        let dir = output.join("feature_pages");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(Self {
            dir,
            codec,
            histogram_bins,
        })
    }

    /// Directory the pages are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&self, name: &str, content: &str) -> Result<()> {
        let path = self.dir.join(name);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    fn examples_html(&self, examples: &[Example]) -> String {
        let max = examples
            .iter()
            .flat_map(|e| e.activations.iter().copied())
            .fold(0.0f32, f32::max);
        let mut html = String::new();
        for example in examples {
            let tokens = self.codec.decode_each(&example.tokens);
            html.push_str(&window_html(&tokens, &example.activations, max));
        }
        html
    }
}

impl FeatureRenderer for HtmlRenderer<'_> {
    fn begin(&mut self, n_features: usize) -> Result<()> {
        let mut body = String::from("<h1>Autoencoder features</h1>\n<ul>\n");
        for id in 0..n_features {
            body.push_str(&format!(
                "<li><a href=\"feature_{id}.html\">Feature {id}</a></li>\n"
            ));
        }
        body.push_str("</ul>\n");
        self.write("index.html", &page("Autoencoder features", &body))?;
        info!("Writing feature pages to {}", self.dir.display());
        Ok(())
    }

    fn render(&mut self, record: &FeatureRecord) -> Result<()> {
        let id = record.feature_id();
        let mut body = format!(
            "<p><a href=\"index.html\">All features</a></p>\n<h1>Feature {id}</h1>\n"
        );

        match record {
            FeatureRecord::Dead { .. } => {
                body.push_str("<p>Dead feature: no activations on any sampled token.</p>\n");
            }
            FeatureRecord::UltraLow {
                top_examples,
                histogram,
                ..
            } => {
                body.push_str("<p>Ultra-low density feature.</p>\n");
                body.push_str(&histogram_html(histogram, self.histogram_bins));
                body.push_str(&top_heading(top_examples.len()));
                body.push_str(&self.examples_html(top_examples));
            }
            FeatureRecord::Alive {
                top_examples,
                intervals,
                histogram,
                ..
            } => {
                body.push_str(&histogram_html(histogram, self.histogram_bins));
                body.push_str(&top_heading(top_examples.len()));
                body.push_str(&self.examples_html(top_examples));
                for (i, interval) in intervals.iter().enumerate() {
                    let (lo, hi) = center_range(interval);
                    body.push_str(&format!(
                        "<h2>Interval {}</h2>\n<p class=\"meta\">center activations {lo:.3} to {hi:.3}</p>\n",
                        i + 1
                    ));
                    body.push_str(&self.examples_html(interval));
                }
            }
        }

        self.write(&format!("feature_{id}.html"), &page(&format!("Feature {id}"), &body))
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<()> {
        self.write("summary.json", &serde_json::to_string_pretty(summary)?)?;
        info!("Summary saved to {}", self.dir.join("summary.json").display());
        Ok(())
    }
}

fn top_heading(n: usize) -> String {
    format!("<h2>Top activations ({n})</h2>\n")
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{STYLE}\n</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        escape_html(title)
    )
}

/// Lowest and highest center activation among `examples`
fn center_range(examples: &[Example]) -> (f32, f32) {
    examples
        .iter()
        .map(Example::center_activation)
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), a| {
            (lo.min(a), hi.max(a))
        })
}

/// One token window, each token shaded by its activation relative to `max`
fn window_html(tokens: &[String], activations: &[f32], max: f32) -> String {
    let center = tokens.len() / 2;
    let mut html = String::from("<div class=\"window\">");
    for (i, (token, &act)) in tokens.iter().zip(activations).enumerate() {
        let alpha = if max > 0.0 { (act / max).clamp(0.0, 1.0) } else { 0.0 };
        let class = if i == center { " class=\"center\"" } else { "" };
        html.push_str(&format!(
            "<span{class} title=\"{act:.4}\" style=\"background: rgba(255, 0, 0, {alpha:.3})\">{}</span>",
            escape_html(&format_token(token))
        ));
    }
    html.push_str("</div>\n");
    html
}

/// Inline SVG bar chart of the non-zero activation histogram
fn histogram_html(histogram: &ActivationHistogram, n_bins: usize) -> String {
    let bins = histogram.bins(n_bins);
    let mut html = format!(
        "<h2>Activation histogram</h2>\n<p class=\"meta\">{} non-zero activations, density {:.4}%</p>\n",
        histogram.values.len(),
        histogram.density_percent
    );
    let Some(peak) = bins.iter().map(|b| b.count).max().filter(|&c| c > 0) else {
        return html;
    };

    let (width, height) = (600.0, 150.0);
    let bar = width / bins.len() as f64;
    html.push_str(&format!(
        "<svg width=\"{width}\" height=\"{height}\" xmlns=\"http://www.w3.org/2000/svg\">\n"
    ));
    for (i, b) in bins.iter().enumerate() {
        let h = height * b.count as f64 / peak as f64;
        html.push_str(&format!(
            "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{h:.1}\" fill=\"steelblue\"><title>{:.3} to {:.3}: {}</title></rect>\n",
            i as f64 * bar,
            height - h,
            (bar - 1.0).max(1.0),
            b.lo,
            b.hi,
            b.count
        ));
    }
    html.push_str("</svg>\n");
    let (lo, hi) = (bins[0].lo, bins[bins.len() - 1].hi);
    html.push_str(&format!("<p class=\"meta\">range {lo:.3} to {hi:.3}</p>\n"));
    html
}

/// Make whitespace control characters visible
pub fn format_token(token: &str) -> String {
    token
        .replace('\n', "\\n")
        .replace('\t', "\\t")
        .replace('\r', "\\r")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

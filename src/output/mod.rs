//! Human-readable result summary
//!
//! Printed at the end of a run, next to whatever the reporters published.

use crate::models::{duration_str, CheckupResult, PingSample, Verdict};
use colored::*;
use std::fmt::Write as _;

/// Colors used by the summary
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub header: Color,
    pub success: Color,
    pub error: Color,
    pub warning: Color,
    pub muted: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            header: Color::Blue,
            success: Color::Green,
            error: Color::Red,
            warning: Color::Yellow,
            muted: Color::BrightBlack,
        }
    }
}

/// Renders a [`CheckupResult`] for a terminal or a plain log
pub struct ResultSummary<'a> {
    result: &'a CheckupResult,
    use_color: bool,
    scheme: ColorScheme,
}

impl<'a> ResultSummary<'a> {
    pub fn new(result: &'a CheckupResult, use_color: bool) -> Self {
        Self {
            result,
            use_color,
            scheme: ColorScheme::default(),
        }
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.use_color {
            text.color(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn status_line(&self) -> String {
        if self.result.succeeded() {
            return self.paint("PASSED", self.scheme.success).bold_if(self.use_color);
        }
        match (&self.result.error, &self.result.verdict) {
            (None, Some(Verdict::ThresholdExceeded { .. })) => {
                self.paint("FAILED (threshold exceeded)", self.scheme.warning).bold_if(self.use_color)
            }
            _ => self.paint("FAILED", self.scheme.error).bold_if(self.use_color),
        }
    }

    fn latency_lines(&self, out: &mut String, sample: &PingSample) {
        let threshold = self.result.config.max_desired_latency;
        let max_color = if sample.max > threshold {
            self.scheme.error
        } else {
            self.scheme.success
        };
        let _ = writeln!(out, "  Min latency:     {}", duration_str::format(sample.min));
        let _ = writeln!(out, "  Average latency: {}", duration_str::format(sample.avg));
        let _ = writeln!(
            out,
            "  Max latency:     {} (threshold {})",
            self.paint(&duration_str::format(sample.max), max_color),
            duration_str::format(threshold)
        );
        let _ = writeln!(out, "  Jitter:          {}", duration_str::format(sample.jitter));
    }

    pub fn render(&self) -> String {
        let config = &self.result.config;
        let mut out = String::new();

        let _ = writeln!(out, "{}", self.paint("VM latency checkup", self.scheme.header).bold_if(self.use_color));
        let _ = writeln!(out, "  Network:         {}", config.network_reference());
        let _ = writeln!(
            out,
            "  Nodes:           {} -> {}",
            placement(&config.source_node),
            placement(&config.target_node)
        );
        let _ = writeln!(out, "  Sample duration: {}", duration_str::format(config.sample_duration));
        if let Some(elapsed) = self.result.elapsed {
            let rounded = std::time::Duration::from_millis(elapsed.as_millis() as u64);
            let _ = writeln!(out, "  Elapsed:         {}", duration_str::format(rounded));
        }

        match &self.result.latency {
            Some(sample) => self.latency_lines(&mut out, sample),
            None => {
                let _ = writeln!(out, "  Latency:         {}", self.paint("not measured", self.scheme.muted));
            }
        }

        let _ = writeln!(out, "  Result:          {}", self.status_line());
        if !self.result.succeeded() {
            let _ = writeln!(out, "  Reason:          {}", self.result.failure_reason());
        }
        out
    }
}

fn placement(node: &str) -> &str {
    if node.is_empty() {
        "(any node)"
    } else {
        node
    }
}

trait BoldIf {
    fn bold_if(self, enabled: bool) -> String;
}

impl BoldIf for String {
    fn bold_if(self, enabled: bool) -> String {
        if enabled {
            self.bold().to_string()
        } else {
            self
        }
    }
}

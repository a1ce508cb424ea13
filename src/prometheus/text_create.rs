// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Prometheus text exposition format writer.

use std::fmt::{self, Write};

use crate::prometheus::labelset::LabelSet;
use crate::prometheus::registry::MetricCollector;

/// Writes one metric family (HELP, TYPE and every series) to `out`.
pub fn metric_family_to_text(out: &mut String, collector: &MetricCollector) -> fmt::Result {
    let desc = collector.desc();
    let name = desc.fq_name();

    writeln!(out, "# HELP {} {}", name, escape_string(desc.help(), false))?;
    writeln!(out, "# TYPE {} {}", name, collector.kind())?;

    match collector {
        MetricCollector::Counter(counter) => {
            for m in counter.collect(None) {
                write_sample(out, name, "", m.labels.as_ref(), None, &format_float(m.value))?;
            }
        }
        MetricCollector::Gauge(gauge) => {
            for m in gauge.collect(None) {
                write_sample(out, name, "", m.labels.as_ref(), None, &format_float(m.value))?;
            }
        }
        MetricCollector::Histogram(histogram) => {
            for m in histogram.collect(None) {
                let labels = m.labels.as_ref();
                for bucket in &m.value.buckets {
                    write_sample(
                        out,
                        name,
                        "_bucket",
                        labels,
                        Some(("le", &format_float(bucket.upper_bound))),
                        &bucket.cumulative_count.to_string(),
                    )?;
                }
                write_sample(out, name, "_bucket", labels, Some(("le", "+Inf")), &m.value.count.to_string())?;
                write_sample(out, name, "_sum", labels, None, &format_float(m.value.sum))?;
                write_sample(out, name, "_count", labels, None, &m.value.count.to_string())?;
            }
        }
    }
    Ok(())
}

fn write_sample(
    out: &mut String,
    name: &str,
    suffix: &str,
    labels: Option<&LabelSet>,
    additional_label: Option<(&str, &str)>,
    value: &str,
) -> fmt::Result {
    write!(out, "{}{}", name, suffix)?;
    write_label_pairs(out, labels, additional_label)?;
    writeln!(out, " {}", value)
}

/// The unlabeled series gets no braces at all; an empty label set is
/// written as `{}`.
fn write_label_pairs(out: &mut String, labels: Option<&LabelSet>, additional_label: Option<(&str, &str)>) -> fmt::Result {
    if labels.is_none() && additional_label.is_none() {
        return Ok(());
    }

    let mut separator = "";
    out.push('{');
    if let Some(labels) = labels {
        for (name, value) in labels {
            write!(out, "{}{}=\"{}\"", separator, name, escape_string(&value.to_string(), true))?;
            separator = ",";
        }
    }
    if let Some((name, value)) = additional_label {
        write!(out, "{}{}=\"{}\"", separator, name, value)?;
    }
    out.push('}');
    Ok(())
}

/// Formats a sample value: integral values carry no fraction, non-finite
/// values use the exposition spellings.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() && value.is_sign_positive() {
        "+Inf".to_string()
    } else if value.is_infinite() {
        "-Inf".to_string()
    } else if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}

pub fn escape_string(s: &str, escape_double_quote: bool) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str(r"\\"),
            '\n' => escaped.push_str(r"\n"),
            '"' if escape_double_quote => escaped.push_str(r#"\""#),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Label names follow `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

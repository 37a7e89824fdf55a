//! Markdown records with a YAML front-matter block.
//!
//! ```text
//! ---
//! id: approval_20260101090000_1a2b3c4d
//! status: pending
//! ---
//!
//! # Send invoice reminder
//! ```
//!
//! The front matter carries every field; the body is for humans and is
//! ignored on read.

use serde::de::DeserializeOwned;
use serde::Serialize;

const FENCE: &str = "---";

pub fn render<T: Serialize>(front: &T, body: &str) -> Result<String, String> {
    let yaml = serde_yaml::to_string(front).map_err(|err| err.to_string())?;
    let mut out = String::with_capacity(yaml.len() + body.len() + 16);
    out.push_str(FENCE);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(FENCE);
    out.push('\n');
    if !body.is_empty() {
        out.push('\n');
        out.push_str(body.trim_end());
        out.push('\n');
    }
    Ok(out)
}

pub fn parse<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let rest = raw
        .strip_prefix(FENCE)
        .and_then(|rest| rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")))
        .ok_or_else(|| "record is missing the opening `---` fence".to_string())?;

    let mut yaml_len = None;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            yaml_len = Some(offset);
            break;
        }
        offset += line.len();
    }
    let yaml_len = yaml_len.ok_or_else(|| "record is missing the closing `---` fence".to_string())?;
    serde_yaml::from_str(&rest[..yaml_len]).map_err(|err| err.to_string())
}

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::ProgressEvent;

const CONVERT_MARKER: &str = "Convert Datapack to sqlite database";
const GENERATING_MARKER: &str = "Generating Image";
const NO_ERRORS_MARKER: &str = "ImageGenerator did not have any errors";

static LOADING_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Loading datapack \[(\d+)/(\d+)\]:\s*(\S.*)").ok());

/// Splits a byte stream into lines, carrying an incomplete trailing line
/// over to the next chunk.
#[derive(Debug, Default)]
pub struct LineAccumulator {
    pending: Vec<u8>,
}

impl LineAccumulator {
    /// Feed one chunk and return the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let rest = self.pending.split_off(newline + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop();
            lines.push(decode_line(line));
        }
        lines
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(decode_line(std::mem::take(&mut self.pending)))
    }
}

fn decode_line(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8_lossy(&line).into_owned()
}

/// Map one renderer output line to a progress milestone, if it is one.
pub fn parse_milestone(line: &str, display_names: &HashMap<String, String>) -> Option<ProgressEvent> {
    if line.contains(CONVERT_MARKER) {
        return Some(ProgressEvent::LoadingDatapacks { step: None });
    }
    if let Some(event) = parse_loading_line(line, display_names) {
        return Some(event);
    }
    if line.contains(GENERATING_MARKER) {
        return Some(ProgressEvent::GeneratingChart);
    }
    if line.contains(NO_ERRORS_MARKER) {
        return Some(ProgressEvent::WaitingForFile);
    }
    None
}

fn parse_loading_line(line: &str, display_names: &HashMap<String, String>) -> Option<ProgressEvent> {
    let captures = LOADING_LINE.as_ref()?.captures(line)?;
    let current = captures.get(1)?.as_str().parse().ok()?;
    let total = captures.get(2)?.as_str().parse().ok()?;
    let file_name = captures.get(3)?.as_str().trim();
    let name = display_names
        .get(file_name)
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(file_name);
    Some(ProgressEvent::loading(current, total, name))
}

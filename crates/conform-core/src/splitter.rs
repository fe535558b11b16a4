//! Dirty-JSON splitting
//!
//! Decompressed archives are JSON arrays of objects cut at arbitrary byte
//! offsets. [`split`] recovers the complete top-level `{...}` objects of one
//! text piece and returns the unfinished tail as carry-over, which the
//! caller prepends to the next piece. [`parse_candidates`] then parses each
//! candidate and stops trusting the piece at the first one that fails.

use serde_json::Value;

use crate::budget::{BudgetProbe, Unbounded};

/// Result of scanning one text piece
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Split {
    /// Complete top-level objects in textual order
    pub objects: Vec<String>,
    /// Unfinished trailing object
    pub carry_over: Option<String>,
    /// Budget ran out before the end of the text
    pub timed_out: bool,
}

/// Result of parsing the candidates of one [`Split`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parsed {
    pub objects: Vec<Value>,
    /// Text to prepend to the next piece
    pub carry_over: Option<String>,
    pub timed_out: bool,
}

/// Cut `text` into complete top-level objects
///
/// Braces inside string literals of an open object do not count. Text
/// outside any object (array brackets, commas, whitespace, stray closing
/// braces) is skipped. When the probe reports exhaustion the scan stops and
/// the partial object is dropped.
pub fn split(text: &str, probe: &dyn BudgetProbe) -> Split {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if probe.exhausted() {
            return Split {
                objects,
                carry_over: None,
                timed_out: true,
            };
        }

        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '{' => {
                if depth == 0 {
                    start = index;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    objects.push(text[start..=index].to_string());
                }
            }
            '"' if depth > 0 => in_string = true,
            _ => {}
        }
    }

    let carry_over = (depth > 0).then(|| text[start..].to_string());
    Split {
        objects,
        carry_over,
        timed_out: false,
    }
}

/// Parse the candidates of a split
///
/// The first candidate that is not valid JSON, every candidate after it and
/// the unfinished tail become carry-over, in textual order. Nothing is
/// carried over once the budget ran out.
pub fn parse_candidates(split: Split, probe: &dyn BudgetProbe) -> Parsed {
    let mut objects = Vec::with_capacity(split.objects.len());
    let mut unparsed = String::new();
    let mut timed_out = split.timed_out;

    let mut candidates = split.objects.into_iter();
    while let Some(candidate) = candidates.next() {
        match serde_json::from_str::<Value>(&candidate) {
            Ok(value) => objects.push(value),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    length = candidate.len(),
                    "Candidate object does not parse, carrying over the rest of the piece"
                );
                unparsed.push_str(&candidate);
                for rest in candidates.by_ref() {
                    unparsed.push_str(&rest);
                }
                break;
            }
        }
        if probe.exhausted() {
            timed_out = true;
            break;
        }
    }

    if timed_out {
        return Parsed {
            objects,
            carry_over: None,
            timed_out,
        };
    }

    if let Some(tail) = split.carry_over {
        unparsed.push_str(&tail);
    }
    Parsed {
        objects,
        carry_over: (!unparsed.is_empty()).then_some(unparsed),
        timed_out,
    }
}

/// Split and parse a piece without a budget
pub fn parse_dirty_json(text: &str) -> Parsed {
    parse_candidates(split(text, &Unbounded), &Unbounded)
}

use std::env;
use std::sync::OnceLock;

use crate::tir::DEFAULT_WORKSPACE_ALIGNMENT;

static TECC_WORKSPACE_ALIGNMENT: OnceLock<u64> = OnceLock::new();
static TECC_CAPTURE_OP_WEIGHTS: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

pub(crate) fn workspace_alignment() -> u64 {
    *TECC_WORKSPACE_ALIGNMENT.get_or_init(|| match env::var("TECC_WORKSPACE_ALIGNMENT") {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|alignment| *alignment > 0)
            .unwrap_or(DEFAULT_WORKSPACE_ALIGNMENT),
        Err(_) => DEFAULT_WORKSPACE_ALIGNMENT,
    })
}

pub(crate) fn capture_op_weights() -> bool {
    *TECC_CAPTURE_OP_WEIGHTS.get_or_init(|| match env::var("TECC_CAPTURE_OP_WEIGHTS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

//! 内置的 sing-box 配置模板。

use serde_json::{Map, Value};
use tracing::warn;

/// Bundled base document: tun + mixed inbounds, direct/block/dns outbounds and
/// the DNS / private-IP route rules every generated config keeps.
pub const DEFAULT_TEMPLATE: &str = include_str!("../../assets/singbox-template.json");

/// Tag of the outbound the generator owns.
pub const PROXY_OUTBOUND_TAG: &str = "proxy-out";

/// Parsed [`DEFAULT_TEMPLATE`]. Falls back to an empty object should the bundled text ever be broken.
pub fn default_document() -> Map<String, Value> {
    match serde_json::from_str::<Value>(DEFAULT_TEMPLATE) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!("bundled sing-box template is not a JSON object");
            Map::new()
        }
        Err(e) => {
            warn!(error = %e, "bundled sing-box template is not valid JSON");
            Map::new()
        }
    }
}

/// Parse a caller supplied template; `None` when absent, blank, invalid or not an object.
pub fn parse_override(text: Option<&str>) -> Option<Map<String, Value>> {
    let text = text.map(str::trim).filter(|t| !t.is_empty())?;
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) => {
            warn!(kind = json_kind(&other), "custom template is not a JSON object, using default");
            None
        }
        Err(e) => {
            warn!(error = %e, "failed to parse custom template, using default");
            None
        }
    }
}

/// Template-owned route rules survive every regeneration.
pub fn is_template_rule(rule: &Value) -> bool {
    rule.get("protocol").and_then(Value::as_str) == Some("dns")
        || rule.get("ip_is_private").and_then(Value::as_bool) == Some(true)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! sing-box 配置生成
//!
//! 以模板为基础：重建 `proxy-out` 出站，替换路由规则（模板自带的 DNS / 私有地址规则保留），
//! 然后输出格式化的 JSON。生成过程从不失败，模板问题一律回退到内置模板。

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::common::ControlError;
use crate::model::{outbound_tag, ProxyProtocol, RoutingRule, UpstreamProxy};

use super::template::{default_document, is_template_rule, parse_override, PROXY_OUTBOUND_TAG};

/// Render the full sing-box config as pretty printed JSON.
pub fn render(
    active_proxy: Option<&UpstreamProxy>,
    rules: &[RoutingRule],
    template: Option<&str>,
) -> String {
    let mut doc = parse_override(template).unwrap_or_else(default_document);

    match active_proxy {
        Some(proxy) => upsert_proxy_outbound(&mut doc, proxy_outbound(proxy)),
        None => remove_proxy_outbound(&mut doc),
    }
    replace_rules(&mut doc, rules, active_proxy.is_some());

    serde_json::to_string_pretty(&Value::Object(doc)).unwrap_or_else(|_| "{}".to_string())
}

/// Syntactic check only: is `text` well-formed JSON.
pub fn validate(text: &str) -> Result<(), ControlError> {
    serde_json::from_str::<Value>(text)
        .map(|_| ())
        .map_err(|e| ControlError::Parse(format!("invalid sing-box config: {}", e)))
}

/// The `proxy-out` outbound object for `proxy`.
pub fn proxy_outbound(proxy: &UpstreamProxy) -> Value {
    let mut out = Map::new();
    out.insert("type".into(), json!(proxy.protocol.as_str()));
    out.insert("tag".into(), json!(PROXY_OUTBOUND_TAG));
    out.insert("server".into(), json!(proxy.server));
    out.insert("server_port".into(), json!(proxy.server_port));

    match proxy.protocol {
        ProxyProtocol::Trojan => {
            out.insert("password".into(), json!(proxy.password.as_deref().unwrap_or("")));
        }
        ProxyProtocol::Vless => {
            out.insert("uuid".into(), json!(proxy.uuid.as_deref().unwrap_or("")));
            if let Some(flow) = proxy.flow.as_deref().filter(|f| !f.is_empty()) {
                out.insert("flow".into(), json!(flow));
            }
        }
        ProxyProtocol::Vmess => {
            out.insert("uuid".into(), json!(proxy.uuid.as_deref().unwrap_or("")));
            out.insert("alter_id".into(), json!(proxy.alter_id));
            out.insert("security".into(), json!(proxy.security.to_ascii_lowercase()));
        }
        ProxyProtocol::Shadowsocks => {
            out.insert("method".into(), json!(proxy.method.as_str()));
            out.insert("password".into(), json!(proxy.password.as_deref().unwrap_or("")));
        }
    }

    if proxy.protocol.uses_tls() {
        if proxy.network.is_transport() {
            out.insert("transport".into(), json!({ "type": proxy.network.as_str() }));
        } else {
            out.insert("network".into(), json!(proxy.network.as_str()));
        }
        out.insert(
            "tls".into(),
            json!({
                "enabled": true,
                "server_name": proxy.tls_server_name(),
                "insecure": proxy.insecure,
            }),
        );
    }

    Value::Object(out)
}

fn is_proxy_outbound(outbound: &Value) -> bool {
    outbound.get("tag").and_then(Value::as_str) == Some(PROXY_OUTBOUND_TAG)
}

fn upsert_proxy_outbound(doc: &mut Map<String, Value>, outbound: Value) {
    let outbounds = doc
        .entry("outbounds")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !outbounds.is_array() {
        warn!("template `outbounds` is not an array, replacing it");
        *outbounds = Value::Array(Vec::new());
    }
    let Some(list) = outbounds.as_array_mut() else {
        return;
    };
    match list.iter().position(is_proxy_outbound) {
        Some(idx) => list[idx] = outbound,
        None => list.push(outbound),
    }
}

fn remove_proxy_outbound(doc: &mut Map<String, Value>) {
    if let Some(list) = doc.get_mut("outbounds").and_then(Value::as_array_mut) {
        list.retain(|o| !is_proxy_outbound(o));
    }
}

/// Map a logical outbound tag to the sing-box outbound it targets.
pub fn map_outbound(tag: &str, has_proxy: bool) -> &str {
    match tag {
        outbound_tag::PROXY if has_proxy => PROXY_OUTBOUND_TAG,
        outbound_tag::PROXY => outbound_tag::DIRECT,
        other => other,
    }
}

/// Route rule object for `rule`; `None` when its value is an empty list.
pub fn rule_object(rule: &RoutingRule, has_proxy: bool) -> Option<Value> {
    let matcher = match serde_json::from_str::<Vec<String>>(&rule.value) {
        Ok(list) if list.is_empty() => {
            debug!(field = rule.kind.field(), "skipping rule with empty value list");
            return None;
        }
        Ok(list) => json!(list),
        Err(e) => {
            warn!(field = rule.kind.field(), error = %e, "rule value is not a string list, using it verbatim");
            json!(rule.value)
        }
    };

    let mut obj = Map::new();
    obj.insert(rule.kind.field().into(), matcher);
    obj.insert(
        "outbound".into(),
        json!(map_outbound(&rule.outbound_tag, has_proxy)),
    );
    Some(Value::Object(obj))
}

fn replace_rules(doc: &mut Map<String, Value>, rules: &[RoutingRule], has_proxy: bool) {
    let route = doc
        .entry("route")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(route) = route.as_object_mut() else {
        warn!("template `route` is not an object, routing rules not applied");
        return;
    };
    let existing = route
        .entry("rules")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Some(list) = existing.as_array_mut() else {
        warn!("template `route.rules` is not an array, routing rules not applied");
        return;
    };

    list.retain(is_template_rule);

    let mut enabled: Vec<&RoutingRule> = rules.iter().filter(|r| r.enabled).collect();
    // stable: equal priorities keep input order
    enabled.sort_by_key(|r| r.priority);
    list.extend(enabled.into_iter().filter_map(|r| rule_object(r, has_proxy)));
    debug!(rules = list.len(), "route rules rebuilt");
}

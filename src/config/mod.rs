pub mod env;
pub mod types;

use anyhow::{Context, Result};
use serde_yml::Value;
use std::path::Path;

pub use types::Config;

/// Load the control-plane config. An empty file yields all defaults.
pub fn load_config(path: &str) -> Result<Config> {
    let raw = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("reading config {}", path))?;
    parse_config(&raw)
}

/// wg-quick hooks are shell fragments and keep their `$` verbatim.
const VERBATIM_KEYS: &[&str] = &["default_post_up", "default_post_down"];

/// Parse YAML, then expand environment variables inside string scalars.
pub fn parse_config(content: &str) -> Result<Config> {
    if is_blank(content) {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    let mut tree: Value = serde_yml::from_str(content).context("parsing config")?;
    expand_tree(&mut tree);
    let config: Config = match tree {
        Value::Null => Config::default(),
        tree => serde_yml::from_value(tree).context("parsing config")?,
    };
    config.validate()?;
    Ok(config)
}

fn is_blank(content: &str) -> bool {
    content.lines().map(str::trim).all(|l| l.is_empty() || l.starts_with('#'))
}

fn expand_tree(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.contains('$') {
                let expanded = env::expand_env_vars(s);
                *value = rescalar(expanded);
            }
        }
        Value::Sequence(items) => items.iter_mut().for_each(expand_tree),
        Value::Mapping(map) => {
            for (key, item) in map.iter_mut() {
                if key.as_str().is_some_and(|k| VERBATIM_KEYS.contains(&k)) {
                    continue;
                }
                expand_tree(item);
            }
        }
        Value::Tagged(tagged) => expand_tree(&mut tagged.value),
        _ => {}
    }
}

/// `port: ${PORT:-8080}` must still land in a numeric field.
fn rescalar(expanded: String) -> Value {
    match serde_yml::from_str::<Value>(&expanded) {
        Ok(v @ (Value::Bool(_) | Value::Number(_))) => v,
        _ => Value::String(expanded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_all_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.wireguard.wg_quick, "/usr/bin/wg-quick");
        assert_eq!(config.singbox.config_path, "/etc/singbox/config.json");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = parse_config(
            "wireguard:\n  interface_name: wg7\n  default_post_up: iptables -A FORWARD -i %i -j ACCEPT\nsingbox:\n  check_before_start: true\n",
        )
        .unwrap();
        assert_eq!(config.wireguard.interface_name, "wg7");
        assert_eq!(config.wireguard.executable, "/usr/bin/wg");
        assert_eq!(
            config.wireguard.default_post_up.as_deref(),
            Some("iptables -A FORWARD -i %i -j ACCEPT")
        );
        assert!(config.singbox.check_before_start);
        assert_eq!(config.singbox.stop_grace_secs, 5);
    }

    #[test]
    fn load_config_expands_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wgsingbox.yaml");
        std::fs::write(
            &path,
            "singbox:\n  config_path: ${WGSB_TEST_SB_DIR:-/tmp/sb}/config.json\n",
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.singbox.config_path, "/tmp/sb/config.json");
    }

    #[test]
    fn hook_fragments_are_not_expanded() {
        let yaml = r#"
wireguard:
  interface_name: ${WGSB_TEST_UNSET_IFACE:-wg3}
  default_post_up: "iptables -t nat -A POSTROUTING -o $(ip route | awk '{print $5}') -j MASQUERADE; echo $IFACE"
  default_post_down: iptables -D FORWARD -i ${IFACE} -j ACCEPT
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.wireguard.interface_name, "wg3");
        assert_eq!(
            config.wireguard.default_post_up.as_deref(),
            Some("iptables -t nat -A POSTROUTING -o $(ip route | awk '{print $5}') -j MASQUERADE; echo $IFACE")
        );
        assert_eq!(
            config.wireguard.default_post_down.as_deref(),
            Some("iptables -D FORWARD -i ${IFACE} -j ACCEPT")
        );
    }

    #[test]
    fn expanded_numbers_stay_numeric() {
        let config =
            parse_config("singbox:\n  stop_grace_secs: ${WGSB_TEST_UNSET_GRACE:-9}\n").unwrap();
        assert_eq!(config.singbox.stop_grace_secs, 9);
    }

    #[test]
    fn comment_only_config_is_all_defaults() {
        let config = parse_config("# nothing yet\n").unwrap();
        assert_eq!(config.wireguard.interface_name, "wg0");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse_config("wireguard:\n  interface_name: \"\"\n").is_err());
        assert!(parse_config("status: [1, 2]\n").is_err());
    }
}

//! Tests for configuration.

#[cfg(test)]
mod tests {
    use super::super::config::*;
    use rust_decimal_macros::dec;

    #[test]
    fn engine_config_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert!(config.dry_run);
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.process_window_minutes, 12);
        assert_eq!(config.countries, vec!["GB".to_string(), "IE".to_string()]);
        assert_eq!(config.point_value, dec!(1));
        assert!(!config.spread_control_enabled);
        assert!(!config.jofs_enabled);
        assert_eq!(config.min_odds, dec!(2.0));
        assert_eq!(config.max_lay_odds, dec!(50.0));
    }

    #[test]
    fn engine_config_deserialize() {
        let toml_str = r#"
dry_run = false
poll_interval_secs = 60
process_window_minutes = 20
countries = ["GB", "IE", "FR"]
point_value = "10"
spread_control_enabled = true
jofs_enabled = true
min_odds = "1.5"
max_lay_odds = "30"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.dry_run);
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.process_window_minutes, 20);
        assert_eq!(config.countries.len(), 3);
        assert_eq!(config.point_value, dec!(10));
        assert!(config.spread_control_enabled);
        assert!(config.jofs_enabled);
        assert_eq!(config.min_odds, dec!(1.5));
        config.validate().unwrap();
    }

    #[test]
    fn full_config_parses() {
        let toml_str = r#"
[exchange]
app_key = "key123"
username = "user"
password = "pass"

[engine]
dry_run = true

[persistence]
state_path = "/tmp/state.json"
blob_base_url = "https://blobs.example.com/lay-bot"

[api]
bind = "0.0.0.0:9000"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.exchange.app_key, "key123");
        assert!(config.exchange.api_url.contains("betting"));
        assert_eq!(config.persistence.state_path, "/tmp/state.json");
        assert_eq!(
            config.persistence.blob_base_url.as_deref(),
            Some("https://blobs.example.com/lay-bot")
        );
        assert_eq!(config.api.bind, "0.0.0.0:9000");
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let toml_str = r#"
[exchange]
app_key = "key123"
username = "user"
password = "pass"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.engine.dry_run);
        assert!(config.persistence.blob_base_url.is_none());
        assert_eq!(config.api.bind, "127.0.0.1:8080");
    }

    #[test]
    fn window_bounds() {
        assert!(validate_window(1).is_ok());
        assert!(validate_window(12).is_ok());
        assert!(validate_window(60).is_ok());
        assert!(validate_window(0).is_err());
        assert!(validate_window(61).is_err());
    }

    #[test]
    fn point_values_are_enumerated() {
        for value in [dec!(1), dec!(2), dec!(5), dec!(10), dec!(20), dec!(50)] {
            assert!(validate_point_value(value).is_ok(), "{value}");
        }
        assert!(validate_point_value(dec!(3)).is_err());
        assert!(validate_point_value(dec!(0)).is_err());
        assert!(validate_point_value(dec!(100)).is_err());
    }

    #[test]
    fn countries_sanitised_to_allowed_set() {
        let sanitised =
            sanitize_countries(&["gb".to_string(), "ie".to_string(), "XX".to_string()]).unwrap();
        assert_eq!(sanitised, vec!["GB".to_string(), "IE".to_string()]);

        assert!(sanitize_countries(&[]).is_err());
        assert!(sanitize_countries(&["XX".to_string()]).is_err());
    }

    #[test]
    fn validate_rejects_inverted_odds_guards() {
        let config = EngineConfig {
            min_odds: dec!(5.0),
            max_lay_odds: dec!(4.0),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            min_odds: dec!(1.0),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

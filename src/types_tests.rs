//! Tests for core types.

#[cfg(test)]
mod tests {
    use super::super::types::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn tick_table_bands() {
        assert_eq!(tick_size(dec!(1.50)), dec!(0.01));
        assert_eq!(tick_size(dec!(1.99)), dec!(0.01));
        assert_eq!(tick_size(dec!(2.00)), dec!(0.02));
        assert_eq!(tick_size(dec!(2.98)), dec!(0.02));
        assert_eq!(tick_size(dec!(3.00)), dec!(0.05));
        assert_eq!(tick_size(dec!(4.00)), dec!(0.1));
        assert_eq!(tick_size(dec!(6.00)), dec!(0.2));
        assert_eq!(tick_size(dec!(10.0)), dec!(0.5));
        assert_eq!(tick_size(dec!(20.0)), dec!(1));
        assert_eq!(tick_size(dec!(30.0)), dec!(2));
        assert_eq!(tick_size(dec!(50.0)), dec!(5));
        assert_eq!(tick_size(dec!(120.0)), dec!(5));
    }

    #[test]
    fn snap_keeps_on_tick_prices() {
        assert_eq!(snap_to_tick(dec!(1.85)), dec!(1.85));
        assert_eq!(snap_to_tick(dec!(3.05)), dec!(3.05));
        assert_eq!(snap_to_tick(dec!(7.2)), dec!(7.2));
    }

    #[test]
    fn snap_floors_off_tick_prices() {
        assert_eq!(snap_to_tick(dec!(2.03)), dec!(2.02));
        assert_eq!(snap_to_tick(dec!(3.07)), dec!(3.05));
        assert_eq!(snap_to_tick(dec!(6.31)), dec!(6.2));
    }

    #[test]
    fn within_one_tick_uses_reference_band() {
        assert!(within_one_tick(dec!(4.0), dec!(4.0)));
        assert!(within_one_tick(dec!(4.0), dec!(4.1)));
        assert!(!within_one_tick(dec!(4.0), dec!(4.2)));
        assert!(within_one_tick(dec!(1.50), dec!(1.51)));
        assert!(!within_one_tick(dec!(1.50), dec!(1.52)));
    }

    #[test]
    fn liability_is_size_times_price_minus_one() {
        let instruction = BetInstruction {
            market_id: "1.1".to_string(),
            selection_id: 1,
            runner_name: "Alpha".to_string(),
            price: dec!(1.80),
            size: dec!(3.00),
            rule: RuleId::Rule1,
        };
        assert_eq!(instruction.liability(), dec!(2.40));
    }

    #[test]
    fn money_serialises_as_decimal_strings() {
        let instruction = BetInstruction {
            market_id: "1.1".to_string(),
            selection_id: 1,
            runner_name: "Alpha".to_string(),
            price: dec!(3.10),
            size: dec!(2.00),
            rule: RuleId::Rule2,
        };
        let json = serde_json::to_string(&instruction).unwrap();
        assert!(json.contains("\"price\":\"3.10\""), "{json}");
        assert!(json.contains("\"size\":\"2.00\""), "{json}");
    }

    #[test]
    fn rule_id_wire_names() {
        assert_eq!(serde_json::to_string(&RuleId::Rule1).unwrap(), "\"RULE_1\"");
        assert_eq!(serde_json::to_string(&RuleId::Rule3a).unwrap(), "\"RULE_3A\"");
        let parsed: RuleId = serde_json::from_str("\"RULE_3B\"").unwrap();
        assert_eq!(parsed, RuleId::Rule3b);
    }

    #[test]
    fn market_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&MarketStatus::Suspended).unwrap(),
            "\"SUSPENDED\""
        );
        let parsed: MarketStatus = serde_json::from_str("\"OPEN\"").unwrap();
        assert_eq!(parsed, MarketStatus::Open);
    }

    #[test]
    fn discipline_from_market_name() {
        assert_eq!(Discipline::from_market_name("16:05 R5 Hcap"), Discipline::Flat);
        assert_eq!(Discipline::from_market_name("14:10 6f Mdn Stks"), Discipline::Flat);
        assert_eq!(Discipline::from_market_name("14:30 2m Hrd"), Discipline::Jumps);
        assert_eq!(Discipline::from_market_name("15:40 3m Chs"), Discipline::Jumps);
        assert_eq!(Discipline::from_market_name("17:15 NHF"), Discipline::Jumps);
        assert_eq!(Discipline::from_market_name("15:00 R3"), Discipline::Unknown);
    }

    fn catalogue_market() -> Market {
        Market {
            market_id: "1.42".to_string(),
            market_name: "15:30 Hcap".to_string(),
            venue: "Ascot".to_string(),
            country: "GB".to_string(),
            race_time: Utc.with_ymd_and_hms(2026, 2, 8, 15, 30, 0).unwrap(),
            status: MarketStatus::Open,
            in_play: false,
            runners: vec![
                Runner {
                    selection_id: 1,
                    name: "Alpha".to_string(),
                    sort_priority: 1,
                    best_available_to_lay: None,
                    best_available_to_back: None,
                    last_price_traded: None,
                },
                Runner {
                    selection_id: 2,
                    name: "Beta".to_string(),
                    sort_priority: 2,
                    best_available_to_lay: None,
                    best_available_to_back: None,
                    last_price_traded: None,
                },
                Runner {
                    selection_id: 3,
                    name: "Gamma".to_string(),
                    sort_priority: 3,
                    best_available_to_lay: None,
                    best_available_to_back: None,
                    last_price_traded: None,
                },
            ],
        }
    }

    #[test]
    fn apply_book_reranks_by_lay_price() {
        let mut market = catalogue_market();
        let book = MarketBook {
            market_id: "1.42".to_string(),
            status: MarketStatus::Open,
            in_play: false,
            runners: vec![
                BookRunner {
                    selection_id: 1,
                    best_available_to_lay: Some(dec!(5.0)),
                    best_available_to_back: Some(dec!(4.9)),
                    last_price_traded: None,
                },
                BookRunner {
                    selection_id: 2,
                    best_available_to_lay: Some(dec!(1.8)),
                    best_available_to_back: Some(dec!(1.79)),
                    last_price_traded: None,
                },
                BookRunner {
                    selection_id: 3,
                    best_available_to_lay: None,
                    best_available_to_back: None,
                    last_price_traded: None,
                },
            ],
        };
        market.apply_book(&book);

        // Beta at 1.8 is the favourite despite catalogue order.
        let favourite = market.favourite().unwrap();
        assert_eq!(favourite.name, "Beta");
        assert_eq!(favourite.sort_priority, 1);
        assert_eq!(market.second_favourite().unwrap().name, "Alpha");
        // Unpriced runner ranks last.
        assert_eq!(market.runners[2].name, "Gamma");
        assert_eq!(market.runners[2].sort_priority, 3);
    }

    #[test]
    fn apply_book_list_is_authoritative() {
        let mut market = catalogue_market();
        // Runner 3 withdrawn: the book no longer carries it.
        let book = MarketBook {
            market_id: "1.42".to_string(),
            status: MarketStatus::Open,
            in_play: true,
            runners: vec![
                BookRunner {
                    selection_id: 1,
                    best_available_to_lay: Some(dec!(2.5)),
                    best_available_to_back: Some(dec!(2.48)),
                    last_price_traded: Some(dec!(2.5)),
                },
                BookRunner {
                    selection_id: 2,
                    best_available_to_lay: Some(dec!(3.0)),
                    best_available_to_back: Some(dec!(2.95)),
                    last_price_traded: None,
                },
            ],
        };
        market.apply_book(&book);

        assert_eq!(market.runners.len(), 2);
        assert!(market.in_play);
        assert!(market.runners.iter().all(|r| r.selection_id != 3));
        // Names carried over from the catalogue.
        assert_eq!(market.favourite().unwrap().name, "Alpha");
    }

    #[test]
    fn minutes_to_off_rounds_to_one_decimal() {
        let market = catalogue_market();
        let now = market.race_time - chrono::Duration::seconds(610);
        assert_eq!(market.minutes_to_off(now), dec!(10.2));
        let after = market.race_time + chrono::Duration::seconds(90);
        assert!(market.minutes_to_off(after) < dec!(0));
    }

    #[test]
    fn session_id_encodes_start_time() {
        let now = Utc.with_ymd_and_hms(2026, 2, 8, 9, 30, 15).unwrap();
        let session = Session::new(now, now.date_naive(), SessionMode::DryRun, vec!["GB".into()]);
        assert_eq!(session.session_id, "ses_20260208_093015");
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.stop_time.is_none());
    }

    #[test]
    fn api_key_preview_masks_secret() {
        let key = ApiKey {
            key_id: "abc".to_string(),
            key: "lay_0123456789abcdef0123".to_string(),
            label: "ui".to_string(),
            created_at: Utc::now(),
            last_used: None,
        };
        let preview = key.preview();
        assert!(preview.starts_with("lay_0123"));
        assert!(preview.ends_with("0123"));
        assert!(!preview.contains("89abcdef"));
    }

    #[test]
    fn rule_tally_bumps_by_rule() {
        let mut tally = RuleTally::default();
        tally.bump(RuleId::Rule1);
        tally.bump(RuleId::Rule3a);
        tally.bump(RuleId::Rule3a);
        tally.bump(RuleId::None);
        assert_eq!(tally.rule_1, 1);
        assert_eq!(tally.rule_3a, 2);
        assert_eq!(tally.rule_2, 0);
    }
}

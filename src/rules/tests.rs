//! Unit tests for the rule evaluator.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::EngineConfig;
    use crate::types::{Market, MarketStatus, Runner};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    /// Runners are supplied favourite-first; sort priorities follow the
    /// list order, as the book merge would produce.
    fn make_market(odds: &[(Option<Decimal>, Option<Decimal>)]) -> Market {
        Market {
            market_id: "1.234".to_string(),
            market_name: "16:05 R5 Hcap".to_string(),
            venue: "Ascot".to_string(),
            country: "GB".to_string(),
            race_time: Utc.with_ymd_and_hms(2026, 2, 8, 16, 5, 0).unwrap(),
            status: MarketStatus::Open,
            in_play: false,
            runners: odds
                .iter()
                .enumerate()
                .map(|(i, (lay, back))| Runner {
                    selection_id: 1001 + i as i64,
                    name: format!("Horse_{}", i + 1),
                    sort_priority: (i + 1) as u32,
                    best_available_to_lay: *lay,
                    best_available_to_back: *back,
                    last_price_traded: None,
                })
                .collect(),
        }
    }

    fn lays(odds: &[Decimal]) -> Market {
        make_market(&odds.iter().map(|o| (Some(*o), None)).collect::<Vec<_>>())
    }

    /// min_odds below every favourite under test so the band rules are
    /// reachable; guards get their own cases.
    fn base_config() -> EngineConfig {
        EngineConfig {
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        }
    }

    // -- Stake rules --

    #[test]
    fn rule_1_under_two() {
        let market = lays(&[dec!(1.5), dec!(3.0), dec!(8.0), dec!(12.0)]);
        let decision = apply_rules(&market, &base_config());

        assert!(!decision.skipped, "{:?}", decision.skip_reason);
        assert_eq!(decision.rule, RuleId::Rule1);
        assert_eq!(decision.instructions.len(), 1);
        assert_eq!(decision.instructions[0].size, dec!(3.00));
        assert_eq!(decision.instructions[0].price, dec!(1.5));
        assert_eq!(decision.instructions[0].runner_name, "Horse_1");
        assert_eq!(decision.instructions[0].liability(), dec!(1.50));
    }

    #[test]
    fn rule_1_edge_just_under_two() {
        let decision = apply_rules(&lays(&[dec!(1.99), dec!(4.0)]), &base_config());
        assert_eq!(decision.rule, RuleId::Rule1);
        assert_eq!(decision.instructions[0].size, dec!(3.00));
    }

    #[test]
    fn rule_2_mid_band() {
        let decision = apply_rules(&lays(&[dec!(3.0), dec!(5.5), dec!(8.0)]), &base_config());
        assert!(!decision.skipped);
        assert_eq!(decision.rule, RuleId::Rule2);
        assert_eq!(decision.instructions.len(), 1);
        assert_eq!(decision.instructions[0].size, dec!(2.00));
        assert_eq!(decision.instructions[0].liability(), dec!(4.00));
    }

    #[test]
    fn rule_2_boundary_exactly_two() {
        let decision = apply_rules(&lays(&[dec!(2.0), dec!(6.0)]), &base_config());
        assert_eq!(decision.rule, RuleId::Rule2);
        assert_eq!(decision.instructions[0].size, dec!(2.00));
    }

    #[test]
    fn rule_2_boundary_exactly_five() {
        let decision = apply_rules(&lays(&[dec!(5.0), dec!(8.0)]), &base_config());
        assert_eq!(decision.rule, RuleId::Rule2);
        assert_eq!(decision.instructions[0].size, dec!(2.00));
    }

    #[test]
    fn rule_3_boundary_just_over_five() {
        let decision = apply_rules(&lays(&[dec!(5.0001), dec!(9.0)]), &base_config());
        assert_eq!(decision.rule, RuleId::Rule3b);
    }

    #[test]
    fn rule_3a_narrow_gap() {
        let decision = apply_rules(
            &lays(&[dec!(7.0), dec!(8.0), dec!(15.0), dec!(20.0)]),
            &base_config(),
        );
        assert!(!decision.skipped);
        assert_eq!(decision.rule, RuleId::Rule3a);
        assert_eq!(decision.instructions.len(), 2);
        assert_eq!(decision.instructions[0].size, dec!(1.00));
        assert_eq!(decision.instructions[0].runner_name, "Horse_1");
        assert_eq!(decision.instructions[0].liability(), dec!(6.00));
        assert_eq!(decision.instructions[1].size, dec!(1.00));
        assert_eq!(decision.instructions[1].runner_name, "Horse_2");
        assert_eq!(decision.instructions[1].liability(), dec!(7.00));
    }

    #[test]
    fn rule_3a_gap_just_under_two() {
        let decision = apply_rules(&lays(&[dec!(6.0), dec!(7.99), dec!(15.0)]), &base_config());
        assert_eq!(decision.rule, RuleId::Rule3a);
        assert_eq!(decision.instructions.len(), 2);
    }

    #[test]
    fn rule_3b_wide_gap() {
        let decision = apply_rules(&lays(&[dec!(6.0), dec!(10.0), dec!(15.0)]), &base_config());
        assert_eq!(decision.rule, RuleId::Rule3b);
        assert_eq!(decision.instructions.len(), 1);
        assert_eq!(decision.instructions[0].size, dec!(1.00));
        assert_eq!(decision.instructions[0].runner_name, "Horse_1");
    }

    #[test]
    fn rule_3b_gap_exactly_two() {
        let decision = apply_rules(&lays(&[dec!(7.0), dec!(9.0), dec!(20.0)]), &base_config());
        assert_eq!(decision.rule, RuleId::Rule3b);
        assert_eq!(decision.instructions.len(), 1);
    }

    #[test]
    fn rule_3b_no_second_favourite() {
        let decision = apply_rules(&lays(&[dec!(6.0)]), &base_config());
        assert_eq!(decision.rule, RuleId::Rule3b);
        assert_eq!(decision.instructions.len(), 1);
    }

    // -- Guards --

    #[test]
    fn skips_empty_market() {
        let decision = apply_rules(&make_market(&[]), &base_config());
        assert!(decision.skipped);
        assert_eq!(decision.skip_reason.as_deref(), Some("no_price"));
    }

    #[test]
    fn skips_unpriced_favourite() {
        let decision = apply_rules(&make_market(&[(None, None)]), &base_config());
        assert!(decision.skipped);
        assert_eq!(decision.skip_reason.as_deref(), Some("no_price"));
    }

    #[test]
    fn skips_in_play_market() {
        let mut market = lays(&[dec!(3.0), dec!(6.0)]);
        market.in_play = true;
        let decision = apply_rules(&market, &base_config());
        assert!(decision.skipped);
        assert_eq!(decision.skip_reason.as_deref(), Some("in_play_or_closed"));
        assert!(decision.instructions.is_empty());
    }

    #[test]
    fn skips_suspended_market() {
        let mut market = lays(&[dec!(3.0), dec!(6.0)]);
        market.status = MarketStatus::Suspended;
        let decision = apply_rules(&market, &base_config());
        assert!(decision.skipped);
        assert_eq!(decision.skip_reason.as_deref(), Some("in_play_or_closed"));
    }

    #[test]
    fn skips_favourite_above_max_odds() {
        let decision = apply_rules(&lays(&[dec!(60.0), dec!(80.0)]), &base_config());
        assert!(decision.skipped);
        assert_eq!(decision.skip_reason.as_deref(), Some("max_odds_exceeded"));
    }

    #[test]
    fn skips_favourite_below_min_odds() {
        // Default guard: min_odds 2.0 blocks the sub-2 band entirely.
        let decision = apply_rules(&lays(&[dec!(1.8), dec!(4.0)]), &EngineConfig::default());
        assert!(decision.skipped);
        assert_eq!(decision.skip_reason.as_deref(), Some("below_min_odds"));
    }

    // -- Point value staking --

    #[test]
    fn point_value_scales_rule_3a_stakes() {
        let config = EngineConfig {
            point_value: dec!(10),
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        let decision = apply_rules(&lays(&[dec!(7.0), dec!(8.5), dec!(15.0)]), &config);

        assert_eq!(decision.rule, RuleId::Rule3a);
        assert_eq!(decision.instructions.len(), 2);
        assert_eq!(decision.instructions[0].size, dec!(10.00));
        assert_eq!(decision.instructions[1].size, dec!(10.00));
        // 10 * 6.00 + 10 * 7.50
        assert_eq!(decision.total_liability(), dec!(135.00));
    }

    #[test]
    fn point_value_scales_rule_1() {
        let config = EngineConfig {
            point_value: dec!(5),
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        let decision = apply_rules(&lays(&[dec!(1.8), dec!(4.5)]), &config);
        assert_eq!(decision.instructions[0].size, dec!(15.00));
        assert_eq!(decision.instructions[0].liability(), dec!(12.00));
    }

    // -- Spread gate --

    #[test]
    fn spread_gate_rejects_wide_favourite() {
        let config = EngineConfig {
            spread_control_enabled: true,
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        // spread 0.30 against a 0.05 band threshold
        let market = make_market(&[
            (Some(dec!(1.80)), Some(dec!(1.50))),
            (Some(dec!(4.50)), Some(dec!(4.40))),
        ]);
        let decision = apply_rules(&market, &config);

        assert!(decision.skipped);
        assert_eq!(decision.skip_reason.as_deref(), Some("spread"));
        assert!(decision.instructions.is_empty());
        assert_eq!(decision.spread_rejections.len(), 1);
        assert_eq!(decision.spread_rejections[0].spread, Some(dec!(0.30)));
        assert_eq!(decision.spread_rejections[0].max_spread, Some(dec!(0.05)));
    }

    #[test]
    fn spread_gate_passes_tight_market() {
        let config = EngineConfig {
            spread_control_enabled: true,
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        let market = make_market(&[
            (Some(dec!(3.10)), Some(dec!(3.00))),
            (Some(dec!(6.00)), Some(dec!(5.80))),
        ]);
        let decision = apply_rules(&market, &config);

        assert!(!decision.skipped);
        assert_eq!(decision.instructions.len(), 1);
        assert!(decision.spread_rejections.is_empty());
    }

    #[test]
    fn spread_gate_drops_only_failing_leg() {
        let config = EngineConfig {
            spread_control_enabled: true,
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        // Rule 3A: favourite tight at 7.0/6.8, second at 7.5 with a 0.9
        // spread against the 0.50 band.
        let market = make_market(&[
            (Some(dec!(7.0)), Some(dec!(6.8))),
            (Some(dec!(7.5)), Some(dec!(6.6))),
            (Some(dec!(15.0)), Some(dec!(14.0))),
        ]);
        let decision = apply_rules(&market, &config);

        assert!(!decision.skipped);
        assert_eq!(decision.rule, RuleId::Rule3a);
        assert_eq!(decision.instructions.len(), 1);
        assert_eq!(decision.instructions[0].runner_name, "Horse_1");
        assert_eq!(decision.spread_rejections.len(), 1);
        assert_eq!(decision.spread_rejections[0].runner_name, "Horse_2");
    }

    #[test]
    fn spread_gate_reject_band_at_eight_and_above() {
        let config = EngineConfig {
            spread_control_enabled: true,
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        let market = make_market(&[
            (Some(dec!(8.2)), Some(dec!(8.0))),
            (Some(dec!(12.0)), Some(dec!(11.5))),
        ]);
        let decision = apply_rules(&market, &config);

        assert!(decision.skipped);
        assert_eq!(decision.skip_reason.as_deref(), Some("spread"));
        assert!(decision.spread_rejections[0].max_spread.is_none());
    }

    #[test]
    fn spread_gate_rejects_missing_back_price() {
        let config = EngineConfig {
            spread_control_enabled: true,
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        let market = make_market(&[(Some(dec!(3.0)), None), (Some(dec!(6.0)), None)]);
        let decision = apply_rules(&market, &config);

        assert!(decision.skipped);
        assert!(decision.spread_rejections[0].back_price.is_none());
    }

    #[test]
    fn spread_thresholds_by_band() {
        assert_eq!(spread_threshold(dec!(1.5)), Some(dec!(0.05)));
        assert_eq!(spread_threshold(dec!(2.0)), Some(dec!(0.15)));
        assert_eq!(spread_threshold(dec!(3.0)), Some(dec!(0.30)));
        assert_eq!(spread_threshold(dec!(5.0)), Some(dec!(0.50)));
        assert_eq!(spread_threshold(dec!(7.99)), Some(dec!(0.50)));
        assert_eq!(spread_threshold(dec!(8.0)), None);
        assert_eq!(spread_threshold(dec!(20.0)), None);
    }

    // -- JOFS --

    #[test]
    fn jofs_splits_joint_favourites_evenly() {
        let config = EngineConfig {
            jofs_enabled: true,
            point_value: dec!(10),
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        let market = lays(&[dec!(4.0), dec!(4.0), dec!(9.0)]);
        let decision = apply_rules(&market, &config);

        assert_eq!(decision.rule, RuleId::Rule2);
        assert!(decision.jofs_split);
        assert_eq!(decision.instructions.len(), 2);
        assert_eq!(decision.instructions[0].size, dec!(10.00));
        assert_eq!(decision.instructions[1].size, dec!(10.00));
        assert_eq!(decision.total_stake(), dec!(20.00));
    }

    #[test]
    fn jofs_includes_peers_one_tick_away() {
        let config = EngineConfig {
            jofs_enabled: true,
            min_odds: dec!(1.01),
            point_value: dec!(2),
            ..EngineConfig::default()
        };
        // tick at 4.0 is 0.1, so 4.1 is a peer and 4.2 is not
        let near = apply_rules(&lays(&[dec!(4.0), dec!(4.1), dec!(9.0)]), &config);
        assert!(near.jofs_split);
        assert_eq!(near.instructions.len(), 2);
        assert_eq!(near.instructions[1].price, dec!(4.1));

        let far = apply_rules(&lays(&[dec!(4.0), dec!(4.2), dec!(9.0)]), &config);
        assert!(!far.jofs_split);
        assert_eq!(far.instructions.len(), 1);
        assert_eq!(far.instructions[0].size, dec!(4.00));
    }

    #[test]
    fn jofs_three_way_split_rounds_down() {
        let config = EngineConfig {
            jofs_enabled: true,
            point_value: dec!(5),
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        let market = lays(&[dec!(3.0), dec!(3.0), dec!(3.02), dec!(9.0)]);
        let decision = apply_rules(&market, &config);

        // 2 points * 5 = 10.00 over three runners
        assert!(decision.jofs_split);
        assert_eq!(decision.instructions.len(), 3);
        for i in &decision.instructions {
            assert_eq!(i.size, dec!(3.33));
        }
    }

    #[test]
    fn jofs_skips_split_below_exchange_minimum() {
        let config = EngineConfig {
            jofs_enabled: true,
            point_value: dec!(1),
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        // 2.00 over three joint runners would be 0.66 each
        let market = lays(&[dec!(3.0), dec!(3.0), dec!(3.02), dec!(9.0)]);
        let decision = apply_rules(&market, &config);

        assert!(!decision.jofs_split);
        assert_eq!(decision.instructions.len(), 1);
        assert_eq!(decision.instructions[0].size, dec!(2.00));
    }

    #[test]
    fn jofs_disabled_keeps_single_instruction() {
        let config = EngineConfig {
            jofs_enabled: false,
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        let decision = apply_rules(&lays(&[dec!(4.0), dec!(4.0), dec!(9.0)]), &config);
        assert!(!decision.jofs_split);
        assert_eq!(decision.instructions.len(), 1);
    }

    #[test]
    fn jofs_does_not_resplit_rule_3a() {
        let config = EngineConfig {
            jofs_enabled: true,
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        // 6.2 is within one tick of 6.0 (tick 0.2) but rule 3A already
        // targets both runners.
        let decision = apply_rules(&lays(&[dec!(6.0), dec!(6.2), dec!(15.0)]), &config);
        assert_eq!(decision.rule, RuleId::Rule3a);
        assert!(!decision.jofs_split);
        assert_eq!(decision.instructions.len(), 2);
        assert_eq!(decision.instructions[0].size, dec!(1.00));
        assert_eq!(decision.instructions[1].size, dec!(1.00));
    }

    // -- Invariants --

    #[test]
    fn instructions_satisfy_liability_identity() {
        let config = base_config();
        for odds in [
            vec![dec!(1.5), dec!(2.0)],
            vec![dec!(3.3), dec!(3.4)],
            vec![dec!(7.0), dec!(8.0)],
            vec![dec!(9.0), dec!(14.0)],
        ] {
            let decision = apply_rules(&lays(&odds), &config);
            for i in &decision.instructions {
                assert!(i.size >= crate::types::EXCHANGE_MIN_STAKE);
                assert!(i.price > Decimal::ONE);
                assert_eq!(i.liability(), (i.size * (i.price - Decimal::ONE)).round_dp(2));
            }
        }
    }

    #[test]
    fn evaluation_is_deterministic() {
        let config = EngineConfig {
            jofs_enabled: true,
            spread_control_enabled: true,
            min_odds: dec!(1.01),
            ..EngineConfig::default()
        };
        let market = make_market(&[
            (Some(dec!(3.0)), Some(dec!(2.9))),
            (Some(dec!(3.02)), Some(dec!(2.96))),
            (Some(dec!(9.0)), Some(dec!(8.8))),
        ]);
        let a = serde_json::to_string(&apply_rules(&market, &config)).unwrap();
        let b = serde_json::to_string(&apply_rules(&market, &config)).unwrap();
        assert_eq!(a, b);
    }
}

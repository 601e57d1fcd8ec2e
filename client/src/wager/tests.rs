use super::*;
use plinko_types::{PayoutTable, RowOption};

fn init(balance: f64) -> GameInit {
    GameInit {
        config: GameConfiguration {
            bets: vec![1.0, 5.0],
            risks: vec!["low".to_string(), "high".to_string()],
            rows: vec![
                RowOption {
                    rows: 8,
                    tables: vec![
                        PayoutTable {
                            multipliers: vec![5.6, 2.1, 1.1, 1.0, 0.5],
                            probabilities: vec![],
                        },
                        PayoutTable {
                            multipliers: vec![29.0, 4.0, 1.5, 0.3, 0.2],
                            probabilities: vec![],
                        },
                    ],
                },
                RowOption {
                    rows: 9,
                    tables: vec![
                        PayoutTable {
                            multipliers: vec![5.6, 2.0, 1.6, 1.0, 0.7],
                            probabilities: vec![],
                        },
                        PayoutTable {
                            multipliers: vec![43.0, 7.0, 2.0, 0.6, 0.2],
                            probabilities: vec![],
                        },
                    ],
                },
            ],
        },
        balance,
    }
}

fn coordinator(max_in_flight: usize) -> WagerCoordinator {
    let mut coordinator = WagerCoordinator::with_rng(
        WagerConfig {
            max_in_flight,
            history_depth: 3,
        },
        StdRng::seed_from_u64(42),
    );
    coordinator.configure(init(100.0));
    coordinator
}

fn result(index: usize, multiplier: f64, balance: f64) -> RoundResult {
    RoundResult {
        win_amount: multiplier,
        multiplier,
        index,
        risk_index: 0,
        row_index: 0,
        balance,
    }
}

/// Admit, send and confirm one wager.
fn confirm(coordinator: &mut WagerCoordinator, result: &RoundResult) -> Target {
    coordinator.place_wager().unwrap();
    coordinator.mark_sent();
    coordinator.on_result_confirmed(result)
}

#[test]
fn test_not_configured() {
    let mut coordinator = WagerCoordinator::new(WagerConfig::default());
    assert_eq!(coordinator.place_wager(), Err(Rejection::NotConfigured));
    assert_eq!(coordinator.select_bet(0), Err(Rejection::NotConfigured));
}

#[test]
fn test_admission_debits_balance() {
    let mut coordinator = coordinator(10);
    coordinator.select_bet(1).unwrap();
    let request = coordinator.place_wager().unwrap();
    assert_eq!(
        request,
        BetRequest {
            bet_index: 1,
            risk_index: 0,
            row_index: 0,
        }
    );
    let state = coordinator.state();
    assert_eq!(state.balance, 95.0);
    assert_eq!(state.in_flight, 1);
    assert!(state.request_outstanding);
    assert!(!state.admission_open());

    // Only one submission at a time
    assert_eq!(
        coordinator.place_wager(),
        Err(Rejection::SubmissionOutstanding)
    );
}

#[test]
fn test_in_flight_never_exceeds_limit() {
    let mut coordinator = coordinator(3);
    let mut admitted = 0;
    for _ in 0..10 {
        match coordinator.place_wager() {
            Ok(_) => {
                admitted += 1;
                coordinator.mark_sent();
                coordinator.on_result_confirmed(&result(0, 0.5, 99.0));
            }
            Err(rejection) => {
                assert_eq!(
                    rejection,
                    Rejection::AdmissionFull {
                        in_flight: 3,
                        limit: 3,
                    }
                );
            }
        }
        assert!(coordinator.state().in_flight <= 3);
    }
    assert_eq!(admitted, 3);

    // Completing one drop frees one slot
    coordinator.on_physical_completion(4).unwrap();
    assert!(coordinator.place_wager().is_ok());
}

#[test]
fn test_insufficient_balance() {
    let mut coordinator = coordinator(10);
    coordinator.configure(init(3.0));
    coordinator.select_bet(1).unwrap();
    assert_eq!(
        coordinator.place_wager(),
        Err(Rejection::InsufficientBalance {
            balance: 3.0,
            bet: 5.0,
        })
    );
    assert_eq!(coordinator.state().balance, 3.0);
    assert_eq!(coordinator.state().in_flight, 0);
    assert!(!coordinator.state().can_afford());
}

#[test]
fn test_settlement_is_fifo() {
    let mut coordinator = coordinator(10);
    let first = result(4, 5.6, 104.6);
    let second = result(0, 0.5, 104.1);
    let a = confirm(&mut coordinator, &first);
    let b = confirm(&mut coordinator, &second);
    assert_eq!(coordinator.pending().count(), 2);
    assert!([0, 8].contains(&a.slot));
    assert_eq!(b.slot, 4);

    // The second drop lands first but the first result settles
    let settled = coordinator.on_physical_completion(b.slot).unwrap();
    assert_eq!(settled.multiplier, 5.6);
    assert_eq!(settled.balance, 104.6);
    assert_eq!(settled.target, a.slot);
    assert_eq!(settled.slot, b.slot);
    assert!(settled.is_win());
    assert_eq!(coordinator.state().balance, 104.6);

    let settled = coordinator.on_physical_completion(a.slot).unwrap();
    assert_eq!(settled.multiplier, 0.5);
    assert!(!settled.is_win());
    assert_eq!(coordinator.state().balance, 104.1);
    assert_eq!(coordinator.state().in_flight, 0);

    assert!(coordinator.on_physical_completion(0).is_none());
    assert_eq!(coordinator.state().in_flight, 0);
}

#[test]
fn test_three_results_settle_in_order() {
    let mut coordinator = coordinator(10);
    let results = [
        result(4, 5.6, 104.6),
        result(0, 0.5, 104.1),
        result(3, 2.1, 105.2),
    ];
    let targets: Vec<Target> = results
        .iter()
        .map(|result| confirm(&mut coordinator, result))
        .collect();
    assert_eq!(coordinator.state().in_flight, 3);
    assert_eq!(coordinator.state().balance, 97.0);

    // Drops land C, A, B
    let landed = [targets[2].slot, targets[0].slot, targets[1].slot];
    for (expected, (slot, target)) in results.iter().zip(landed.into_iter().zip(&targets)) {
        let settled = coordinator.on_physical_completion(slot).unwrap();
        assert_eq!(settled.balance, expected.balance);
        assert_eq!(settled.multiplier, expected.multiplier);
        assert_eq!(settled.win_amount, expected.win_amount);
        assert_eq!(settled.is_win(), expected.multiplier > 1.0);
        assert_eq!(settled.slot, slot);
        assert_eq!(settled.target, target.slot);
        assert_eq!(coordinator.state().balance, expected.balance);
    }
    assert_eq!(coordinator.state().in_flight, 0);
    assert!(coordinator.on_physical_completion(0).is_none());

    let multipliers: Vec<f64> = coordinator.history().map(|entry| entry.multiplier).collect();
    assert_eq!(multipliers, vec![2.1, 0.5, 5.6]);
}

#[test]
fn test_result_targets_match_payout() {
    let mut coordinator = coordinator(10);
    coordinator.select_rows(1).unwrap();
    for index in 0..5 {
        let reported = RoundResult {
            row_index: 1,
            ..result(index, 1.0, 100.0)
        };
        let target = confirm(&mut coordinator, &reported);
        assert_eq!(target.rows, 9);
        let mapping = coordinator.mapper.mapping(9, 0, &[5.6, 2.0, 1.6, 1.0, 0.7]);
        assert!(mapping.resolve_slots(index).contains(&target.slot));
        coordinator.on_physical_completion(target.slot).unwrap();
    }
    // One mapping built for the pair
    assert_eq!(coordinator.mapper().builds(), 1);
}

#[test]
fn test_abort_submission_refunds() {
    let mut coordinator = coordinator(10);
    let request = coordinator.place_wager().unwrap();
    coordinator.abort_submission(&request);
    let state = coordinator.state();
    assert_eq!(state.balance, 100.0);
    assert_eq!(state.in_flight, 0);
    assert!(state.admission_open());
}

#[test]
fn test_row_change_refused_while_in_flight() {
    let mut coordinator = coordinator(10);
    confirm(&mut coordinator, &result(1, 1.0, 99.0));
    assert_eq!(coordinator.select_rows(1), Err(Rejection::WagersInFlight));
    // Bet and risk can still change
    coordinator.select_bet(1).unwrap();
    coordinator.select_risk(1).unwrap();
    assert_eq!(
        coordinator.select_risk(2),
        Err(Rejection::InvalidSelection {
            what: "risk",
            index: 2,
        })
    );

    coordinator.on_physical_completion(3).unwrap();
    coordinator.select_rows(1).unwrap();
    assert_eq!(coordinator.state().row_index, 1);
}

#[test]
fn test_history_is_bounded() {
    let mut coordinator = coordinator(10);
    for i in 0..5 {
        let target = confirm(&mut coordinator, &result(0, i as f64, 100.0));
        coordinator.on_physical_completion(target.slot).unwrap();
    }
    let multipliers: Vec<f64> = coordinator.history().map(|entry| entry.multiplier).collect();
    assert_eq!(multipliers, vec![4.0, 3.0, 2.0]);
}

#[test]
fn test_reconfigure_clamps_and_clears_cache() {
    let mut coordinator = coordinator(10);
    coordinator.select_bet(1).unwrap();
    coordinator.select_rows(1).unwrap();
    confirm(&mut coordinator, &result(0, 0.7, 99.0));
    assert_eq!(coordinator.mapper().len(), 1);

    let mut smaller = init(50.0);
    smaller.config.bets.truncate(1);
    smaller.config.rows.truncate(1);
    coordinator.configure(smaller);

    let state = coordinator.state();
    assert_eq!(state.bet_index, 0);
    assert_eq!(state.row_index, 0);
    assert_eq!(state.bet_amount, Some(1.0));
    assert_eq!(state.balance, 50.0);
    // Wagers in play survive a refresh
    assert_eq!(state.in_flight, 1);
    assert!(coordinator.mapper().is_empty());
}

#[test]
fn test_refresh_drops_unconfirmed_submission() {
    let mut coordinator = coordinator(10);
    coordinator.place_wager().unwrap();
    coordinator.mark_sent();
    assert!(!coordinator.state().admission_open());

    coordinator.configure(init(99.0));
    let state = coordinator.state();
    assert_eq!(state.in_flight, 0);
    assert!(!state.awaiting_confirmation);
    assert!(state.admission_open());
    assert_eq!(state.balance, 99.0);
}

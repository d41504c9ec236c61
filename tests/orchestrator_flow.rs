//! End-to-end round walks through a real orchestrator, hub and store.
//! Timer phases run under tokio's paused clock, so auto-advances fire as
//! soon as the test becomes idle.

mod common;

use common::*;

use g38d::game::command::{BallDraw, Origin};
use g38d::game::event::Event;
use g38d::game::phase::{BallKind, Phase};
use g38d::game::round::ExtraSide;
use g38d::game::Command;
use g38d::game::GameError;

fn draw_one(kind: BallKind, number: u8, is_last: bool) -> Command {
    Command::DrawBall {
        kind,
        balls: vec![BallDraw { number, is_last }],
    }
}

fn phase_changes(envelopes: &[g38d::game::EventEnvelope]) -> Vec<Phase> {
    envelopes
        .iter()
        .filter_map(|env| match env.event {
            Event::PhaseChanged { new, .. } => Some(new),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn s1_happy_path_without_jackpot() {
    let room = test_room("R1");
    let mut rx = subscribe_room(&room).await;
    let mut all = Vec::new();

    start_round(&room, false).await;
    let opening = events_until_phase(&mut rx, Phase::DrawingStart).await;
    assert!(matches!(
        opening[0].event,
        Event::RoundCreated { has_jackpot: false }
    ));
    assert_eq!(
        phase_changes(&opening),
        vec![
            Phase::NewRound,
            Phase::CardPurchaseOpen,
            Phase::CardPurchaseClose,
            Phase::DrawingStart,
        ]
    );
    all.extend(opening);

    // 30 distinct regular balls, the last one asserted as final.
    let regulars: Vec<u8> = (41..=70).collect();
    for (i, n) in regulars.iter().enumerate() {
        let is_last = i == regulars.len() - 1;
        room.orch
            .submit(draw_one(BallKind::Regular, *n, is_last), Origin::Dealer)
            .await
            .expect("regular draw");
    }
    let to_extra = events_until_phase(&mut rx, Phase::ExtraBallDrawingStart).await;
    let drawn: Vec<u8> = to_extra
        .iter()
        .filter_map(|env| match &env.event {
            Event::BallDrawn { ball, .. } => Some(ball.number),
            _ => None,
        })
        .collect();
    assert_eq!(drawn, regulars);
    let sides: Vec<ExtraSide> = to_extra
        .iter()
        .filter_map(|env| match env.event {
            Event::ExtraSideSelected { side } => Some(side),
            _ => None,
        })
        .collect();
    assert_eq!(sides.len(), 1, "auto side selection happens exactly once");
    assert_eq!(
        phase_changes(&to_extra),
        vec![
            Phase::DrawingClose,
            Phase::ExtraBallPrepare,
            Phase::ExtraBallSideSelectOpen,
            Phase::ExtraBallSideSelectClose,
            Phase::ExtraBallWaitClaim,
            Phase::ExtraBallDrawingStart,
        ]
    );
    all.extend(to_extra);

    // Three extra balls outside the regular numbers; the cap closes the
    // window without an explicit is_last.
    for n in [1u8, 2, 3] {
        room.orch
            .submit(draw_one(BallKind::Extra, n, false), Origin::Dealer)
            .await
            .expect("extra draw");
    }
    let to_lucky = events_until_phase(&mut rx, Phase::LuckyDrawingStart).await;
    // No jackpot on this round: settlement skips straight to the lucky leg.
    assert_eq!(
        phase_changes(&to_lucky),
        vec![
            Phase::ExtraBallDrawingClose,
            Phase::PayoutSettlement,
            Phase::LuckyPrepare,
            Phase::LuckyDrawingStart,
        ]
    );
    all.extend(to_lucky);

    for n in [10u8, 11, 12, 13, 14, 15, 16] {
        room.orch
            .submit(draw_one(BallKind::Lucky, n, false), Origin::Dealer)
            .await
            .expect("lucky draw");
    }
    let closing = events_until_phase(&mut rx, Phase::GameOver).await;
    assert_eq!(
        phase_changes(&closing),
        vec![Phase::LuckyDrawingClose, Phase::GameOver]
    );
    all.extend(closing);
    let completed = next_event(&mut rx).await;
    assert!(matches!(completed.event, Event::RoundCompleted {}));
    all.push(completed);

    // Stream ordinals are gap-free from the subscriber's point of view.
    assert_eq!(all[0].seq, 0);
    assert_gap_free(&all);

    // Terminal bookkeeping: live slot cleared, history written once.
    assert!(room.store.load_current("R1").unwrap().is_none());
    let ids = room.store.history_ids("R1").unwrap();
    assert_eq!(ids.len(), 1);
    let archived = room.store.load_history(ids[0]).unwrap().unwrap();
    assert_eq!(archived.regular.len(), 30);
    assert_eq!(archived.extra.len(), 3);
    assert_eq!(archived.lucky.len(), 7);
    assert!(archived.ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn s2_duplicate_ball_is_rejected_without_side_effects() {
    let room = test_room("R1");
    let mut rx = subscribe_room(&room).await;
    start_round(&room, false).await;
    events_until_phase(&mut rx, Phase::DrawingStart).await;

    room.orch
        .submit(draw_one(BallKind::Regular, 42, false), Origin::Dealer)
        .await
        .expect("first 42");
    let err = room
        .orch
        .submit(draw_one(BallKind::Regular, 42, false), Origin::Dealer)
        .await
        .expect_err("duplicate 42");
    assert!(matches!(err, GameError::InvalidBall { .. }));
    assert_eq!(err.code(), "INVALID_BALL");

    // Round state is unchanged and no event leaked to subscribers: the
    // next observed event is the next valid draw.
    let round = room.orch.current_round().await.expect("live round");
    assert_eq!(round.regular.len(), 1);
    let first = next_event(&mut rx).await;
    assert!(matches!(&first.event, Event::BallDrawn { ball, .. } if ball.number == 42));
    room.orch
        .submit(draw_one(BallKind::Regular, 43, false), Origin::Dealer)
        .await
        .expect("43");
    let second = next_event(&mut rx).await;
    assert!(matches!(&second.event, Event::BallDrawn { ball, .. } if ball.number == 43));
}

#[tokio::test(start_paused = true)]
async fn s3_cancel_mid_draw_finalizes_and_allows_a_new_round() {
    let room = test_room("R1");
    let mut rx = subscribe_room(&room).await;
    start_round(&room, false).await;
    events_until_phase(&mut rx, Phase::DrawingStart).await;

    for n in [5u8, 6, 7, 8, 9] {
        room.orch
            .submit(draw_one(BallKind::Regular, n, false), Origin::Dealer)
            .await
            .expect("draw");
    }
    let cancelled_id = room.orch.current_round().await.unwrap().round_id;
    room.orch
        .submit(
            Command::CancelRound {
                reason: "op-abort".into(),
            },
            Origin::Dealer,
        )
        .await
        .expect("cancel");

    // Skip the five draw events, then expect the cancellation.
    let mut env = next_event(&mut rx).await;
    while matches!(env.event, Event::BallDrawn { .. }) {
        env = next_event(&mut rx).await;
    }
    assert!(matches!(&env.event, Event::RoundCancelled { reason } if reason == "op-abort"));

    assert!(room.store.load_current("R1").unwrap().is_none());
    let archived = room.store.load_history(cancelled_id).unwrap().unwrap();
    assert_eq!(archived.cancelled.as_ref().unwrap().reason, "op-abort");
    assert_eq!(archived.regular.len(), 5);

    // The room is back in Preparation and accepts a fresh round.
    assert!(room.orch.current_round().await.is_none());
    start_round(&room, false).await;
    let reopened = next_event(&mut rx).await;
    assert!(matches!(reopened.event, Event::RoundCreated { .. }));
}

#[tokio::test(start_paused = true)]
async fn s6_jackpot_sub_sequence_runs_until_winner() {
    let room = test_room("R1");
    let mut rx = subscribe_room(&room).await;
    start_round(&room, true).await;
    events_until_phase(&mut rx, Phase::DrawingStart).await;
    room.orch
        .submit(draw_one(BallKind::Regular, 10, true), Origin::Dealer)
        .await
        .expect("close regular draw early");
    events_until_phase(&mut rx, Phase::ExtraBallDrawingStart).await;
    for n in [20u8, 21, 22] {
        room.orch
            .submit(draw_one(BallKind::Extra, n, false), Origin::Dealer)
            .await
            .expect("extra");
    }

    // With a jackpot armed and no winner yet, settlement enters the
    // jackpot branch.
    let to_jackpot = events_until_phase(&mut rx, Phase::JackpotDrawingStart).await;
    assert!(phase_changes(&to_jackpot).contains(&Phase::JackpotStart));

    for n in [60u8, 61] {
        room.orch
            .submit(draw_one(BallKind::Jackpot, n, false), Origin::Dealer)
            .await
            .expect("jackpot draw");
    }
    room.orch
        .submit(
            Command::NotifyJackpotWinner {
                subject_id: "u1".into(),
            },
            Origin::Dealer,
        )
        .await
        .expect("winner");

    let to_lucky = events_until_phase(&mut rx, Phase::LuckyDrawingStart).await;
    assert!(to_lucky.iter().any(|env| matches!(
        &env.event,
        Event::JackpotWinnerNotified { subject_id } if subject_id == "u1"
    )));
    assert_eq!(
        phase_changes(&to_lucky),
        vec![
            Phase::JackpotDrawingClose,
            Phase::JackpotSettlement,
            Phase::LuckyPrepare,
            Phase::LuckyDrawingStart,
        ]
    );
    let round = room.orch.current_round().await.unwrap();
    assert_eq!(round.jackpot_winner.as_deref(), Some("u1"));
    assert_eq!(round.jackpot.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn winner_can_be_notified_anywhere_in_the_branch() {
    let room = test_room("R1");
    let mut rx = subscribe_room(&room).await;
    start_round(&room, true).await;
    events_until_phase(&mut rx, Phase::DrawingStart).await;
    room.orch
        .submit(draw_one(BallKind::Regular, 10, true), Origin::Dealer)
        .await
        .unwrap();
    events_until_phase(&mut rx, Phase::ExtraBallDrawingStart).await;
    room.orch
        .submit(draw_one(BallKind::Extra, 20, true), Origin::Dealer)
        .await
        .unwrap();

    // The notify is legal in every branch phase, not just the draw window.
    let to_settlement = events_until_phase(&mut rx, Phase::JackpotStart).await;
    assert!(phase_changes(&to_settlement).contains(&Phase::PayoutSettlement));
    room.orch
        .submit(
            Command::NotifyJackpotWinner {
                subject_id: "early".into(),
            },
            Origin::Dealer,
        )
        .await
        .expect("notify in JackpotStart");
    let round = room.orch.current_round().await.unwrap();
    assert_eq!(round.jackpot_winner.as_deref(), Some("early"));
}

#[tokio::test(start_paused = true)]
async fn dealer_can_preempt_the_random_side() {
    let room = test_room("R1");
    let mut rx = subscribe_room(&room).await;
    start_round(&room, false).await;
    events_until_phase(&mut rx, Phase::DrawingStart).await;
    room.orch
        .submit(draw_one(BallKind::Regular, 10, true), Origin::Dealer)
        .await
        .unwrap();
    events_until_phase(&mut rx, Phase::ExtraBallSideSelectOpen).await;

    room.orch
        .submit(
            Command::SelectExtraSide {
                side: ExtraSide::Right,
            },
            Origin::Dealer,
        )
        .await
        .expect("dealer side pick");

    let walk = events_until_phase(&mut rx, Phase::ExtraBallDrawingStart).await;
    let sides: Vec<ExtraSide> = walk
        .iter()
        .filter_map(|env| match env.event {
            Event::ExtraSideSelected { side } => Some(side),
            _ => None,
        })
        .collect();
    assert_eq!(sides, vec![ExtraSide::Right], "no auto pick after preempt");
    let round = room.orch.current_round().await.unwrap();
    assert_eq!(round.selected_extra_side, Some(ExtraSide::Right));
}

#[tokio::test(start_paused = true)]
async fn commands_outside_their_phase_are_rejected() {
    let room = test_room("R1");

    // No round yet: draws and advances have nothing to act on.
    let err = room
        .orch
        .submit(draw_one(BallKind::Regular, 1, false), Origin::Dealer)
        .await
        .expect_err("draw before round");
    assert_eq!(err.code(), "INVALID_PHASE");
    let err = room
        .orch
        .submit(Command::AdvanceStage { force: false }, Origin::Dealer)
        .await
        .expect_err("advance before round");
    assert_eq!(err.code(), "INVALID_PHASE");

    let mut rx = subscribe_room(&room).await;
    start_round(&room, false).await;
    events_until_phase(&mut rx, Phase::DrawingStart).await;

    // Wrong-kind draws and unforced advances in a manual phase.
    let err = room
        .orch
        .submit(draw_one(BallKind::Lucky, 1, false), Origin::Dealer)
        .await
        .expect_err("lucky draw in regular window");
    assert_eq!(err.code(), "INVALID_PHASE");
    let err = room
        .orch
        .submit(Command::AdvanceStage { force: false }, Origin::Dealer)
        .await
        .expect_err("unforced advance in manual phase");
    assert_eq!(err.code(), "INVALID_PHASE");

    // A forced advance skips the draw window entirely.
    room.orch
        .submit(Command::AdvanceStage { force: true }, Origin::Dealer)
        .await
        .expect("forced advance");
    let round = room.orch.current_round().await.unwrap();
    assert_eq!(round.phase, Phase::DrawingClose);
    assert!(round.regular.is_empty());
}

#[tokio::test(start_paused = true)]
async fn ball_numbers_outside_range_are_invalid() {
    let room = test_room("R1");
    let mut rx = subscribe_room(&room).await;
    start_round(&room, false).await;
    events_until_phase(&mut rx, Phase::DrawingStart).await;

    for bad in [0u8, 76] {
        let err = room
            .orch
            .submit(draw_one(BallKind::Regular, bad, false), Origin::Dealer)
            .await
            .expect_err("out of range");
        assert_eq!(err.code(), "INVALID_BALL");
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_is_refused_in_lucky_phases() {
    let room = test_room("R1");
    let mut rx = subscribe_room(&room).await;
    start_round(&room, false).await;
    events_until_phase(&mut rx, Phase::DrawingStart).await;
    room.orch
        .submit(draw_one(BallKind::Regular, 10, true), Origin::Dealer)
        .await
        .unwrap();
    events_until_phase(&mut rx, Phase::ExtraBallDrawingStart).await;
    room.orch
        .submit(draw_one(BallKind::Extra, 20, true), Origin::Dealer)
        .await
        .unwrap();
    events_until_phase(&mut rx, Phase::LuckyDrawingStart).await;

    let err = room
        .orch
        .submit(
            Command::CancelRound {
                reason: "too late".into(),
            },
            Origin::Dealer,
        )
        .await
        .expect_err("cancel in lucky leg");
    assert_eq!(err.code(), "INVALID_PHASE");
}

#[tokio::test(start_paused = true)]
async fn operator_reset_discards_the_round() {
    let room = test_room("R1");
    let mut rx = subscribe_room(&room).await;
    start_round(&room, false).await;
    events_until_phase(&mut rx, Phase::CardPurchaseOpen).await;

    room.orch
        .submit(Command::Reset {}, Origin::Operator)
        .await
        .expect("reset");
    assert!(room.orch.current_round().await.is_none());
    assert!(room.store.load_current("R1").unwrap().is_none());

    // Discarded, not terminated: nothing lands in history.
    assert!(room.store.history_ids("R1").unwrap().is_empty());
    start_round(&room, false).await;
    assert!(room.orch.current_round().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn batch_draw_validates_each_entry_independently() {
    let room = test_room("R1");
    let mut rx = subscribe_room(&room).await;
    start_round(&room, false).await;
    events_until_phase(&mut rx, Phase::DrawingStart).await;

    // Second entry duplicates the first; the first sticks.
    let err = room
        .orch
        .submit(
            Command::DrawBall {
                kind: BallKind::Regular,
                balls: vec![
                    BallDraw {
                        number: 30,
                        is_last: false,
                    },
                    BallDraw {
                        number: 30,
                        is_last: false,
                    },
                ],
            },
            Origin::Dealer,
        )
        .await
        .expect_err("duplicate within batch");
    assert_eq!(err.code(), "INVALID_BALL");
    let round = room.orch.current_round().await.unwrap();
    assert_eq!(round.regular.len(), 1);

    // Entries after a closing is_last are refused.
    let err = room
        .orch
        .submit(
            Command::DrawBall {
                kind: BallKind::Regular,
                balls: vec![
                    BallDraw {
                        number: 31,
                        is_last: true,
                    },
                    BallDraw {
                        number: 32,
                        is_last: false,
                    },
                ],
            },
            Origin::Dealer,
        )
        .await
        .expect_err("entry after close");
    assert_eq!(err.code(), "INVALID_BALL");
    let round = room.orch.current_round().await.unwrap();
    assert_eq!(round.phase, Phase::DrawingClose);
    assert_eq!(round.regular.len(), 2);
}

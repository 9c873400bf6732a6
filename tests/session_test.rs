//! Integration tests for suspending, resuming and hinting across puzzles.

mod common;

use std::time::Duration;

use common::{mate_in_one, mate_in_two, mv, recorded_plies, sq};
use puzzle_trainer::{
    HintOutcome, HintStep, Phase, PuzzleOutcome, SessionStore, Trainer, TrainerConfig,
};

fn trainer() -> Trainer {
    let config = TrainerConfig {
        opponent_delay: Duration::ZERO,
        ..Default::default()
    };
    let (trainer, _events) = Trainer::with_rules(config, None);
    trainer
}

// ---------------------------------------------------------------------------
// Suspend and resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn suspended_free_play_resumes_with_pending_record() {
    let mut trainer = trainer();
    trainer.open_puzzle(mate_in_two());

    trainer.make_move(sq("c3"), sq("d4"), None).await.unwrap();
    let outcomes = trainer.observe();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], PuzzleOutcome::Failed { puzzle_id: 2, .. }));

    trainer.make_move(sq("h8"), sq("g8"), None).await.unwrap();
    trainer.make_move(sq("b2"), sq("b7"), None).await.unwrap();
    assert!(trainer.observe().is_empty());
    let before = trainer.machine().snapshot();

    // Switching away saves the board with its pending record.
    trainer.open_puzzle(mate_in_one());
    let saved = trainer.store().get(2).expect("puzzle 2 saved");
    assert!(saved.resume.is_failed);
    assert_eq!(saved.resume.history.len(), 1);
    assert!(saved.resume.pending.is_some());
    assert_eq!(saved.resume.plies_played(), 3);
    assert_eq!(trainer.machine().snapshot().puzzle.map(|p| p.id), Some(1));

    trainer.open_puzzle(mate_in_two());
    let resumed = trainer.machine().snapshot();
    assert_eq!(resumed.position, before.position);
    assert_eq!(resumed.history, before.history);
    assert_eq!(resumed.pending, before.pending);
    assert_eq!(resumed.last_move, Some((sq("b2"), sq("b7"))));
    assert!(resumed.is_failed);
    // Failure was already reported before the switch.
    assert!(trainer.observe().is_empty());

    trainer.make_move(sq("g8"), sq("h8"), None).await.unwrap();
    trainer.make_move(sq("a1"), sq("a8"), None).await.unwrap();

    let done = trainer.machine().snapshot();
    assert_eq!(done.phase, Phase::Complete);
    assert_eq!(done.history.len(), 3);
    assert_eq!(recorded_plies(&done), 5);

    let outcomes = trainer.observe();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        PuzzleOutcome::Completed {
            puzzle_id: 2,
            success: false,
            ..
        }
    ));
    assert!(!trainer.timer().is_running());
}

#[tokio::test]
async fn completed_puzzle_is_saved_with_timer_stopped() {
    let mut trainer = trainer();
    trainer.open_puzzle(mate_in_one());
    assert!(trainer.timer().is_running());

    assert_eq!(trainer.request_hint().await.unwrap(), HintOutcome::Origin(sq("h4")));
    trainer.make_move(sq("h4"), sq("e7"), None).await.unwrap();
    let outcomes = trainer.observe();
    assert!(matches!(
        outcomes.as_slice(),
        [PuzzleOutcome::Completed {
            puzzle_id: 1,
            success: true,
            ..
        }]
    ));

    trainer.open_puzzle(mate_in_two());
    let saved = trainer.store().get(1).expect("puzzle 1 saved");
    assert_eq!(saved.resume.phase, Phase::Complete);
    assert!(!saved.timer_running);
    assert_eq!(saved.hint_step, HintStep::Hidden);
    assert_eq!(saved.hint_move, None);

    // Reopening shows the finished board without reporting it again.
    trainer.open_puzzle(mate_in_one());
    assert_eq!(trainer.machine().snapshot().phase, Phase::Complete);
    assert!(!trainer.timer().is_running());
    assert!(trainer.observe().is_empty());
    assert_eq!(trainer.request_hint().await.unwrap(), HintOutcome::Unavailable);
}

#[tokio::test]
async fn reset_starts_over_and_forgets_the_session() {
    let mut trainer = trainer();
    trainer.open_puzzle(mate_in_two());
    trainer.make_move(sq("c3"), sq("d4"), None).await.unwrap();
    trainer.observe();

    trainer.open_puzzle(mate_in_one());
    trainer.open_puzzle(mate_in_two());
    assert!(trainer.machine().snapshot().is_failed);

    trainer.reset_current();
    let snapshot = trainer.machine().snapshot();
    assert_eq!(snapshot.phase, Phase::Playing);
    assert!(!snapshot.is_failed);
    assert!(snapshot.history.is_empty());
    assert_eq!(snapshot.position, mate_in_two().start_position);
    assert!(trainer.store().get(2).is_none());
    assert_eq!(trainer.hint(), (HintStep::Hidden, None));
    assert!(trainer.observe().is_empty());

    // A fresh attempt is judged again.
    trainer.make_move(sq("b2"), sq("b7"), None).await.unwrap();
    trainer.make_move(sq("a1"), sq("a8"), None).await.unwrap();
    assert!(matches!(
        trainer.observe().as_slice(),
        [PuzzleOutcome::Completed { success: true, .. }]
    ));
}

#[tokio::test]
async fn exported_store_resumes_in_a_new_trainer() {
    let mut first = trainer();
    first.open_puzzle(mate_in_two());
    first.make_move(sq("b2"), sq("b7"), None).await.unwrap();
    assert_eq!(first.request_hint().await.unwrap(), HintOutcome::Origin(sq("a1")));
    first.suspend_current();
    let json = first.store().to_json().unwrap();

    let mut second = trainer();
    *second.store_mut() = SessionStore::from_json(&json).unwrap();
    assert_eq!(second.store().len(), 1);

    second.open_puzzle(mate_in_two());
    let snapshot = second.machine().snapshot();
    assert_eq!(snapshot.history.len(), 1);
    assert!(!snapshot.is_failed);
    assert_eq!(second.hint(), (HintStep::Origin, Some(mv("a1a8"))));

    // The recorded line continues from where it was left.
    assert_eq!(
        second.request_hint().await.unwrap(),
        HintOutcome::Destination(mv("a1a8"))
    );
    assert_eq!(second.request_hint().await.unwrap(), HintOutcome::Played(mv("a1a8")));
    let snapshot = second.machine().snapshot();
    assert_eq!(snapshot.phase, Phase::Complete);
    assert!(!snapshot.is_failed);
}

// ---------------------------------------------------------------------------
// Hints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hint_reveals_origin_then_move_then_plays_it() {
    let mut trainer = trainer();
    assert_eq!(trainer.request_hint().await.unwrap(), HintOutcome::Unavailable);

    trainer.open_puzzle(mate_in_one());
    assert_eq!(trainer.request_hint().await.unwrap(), HintOutcome::Origin(sq("h4")));
    assert_eq!(trainer.hint(), (HintStep::Origin, Some(mv("h4e7"))));
    assert_eq!(
        trainer.request_hint().await.unwrap(),
        HintOutcome::Destination(mv("h4e7"))
    );
    assert_eq!(trainer.hint(), (HintStep::Destination, Some(mv("h4e7"))));
    assert_eq!(trainer.request_hint().await.unwrap(), HintOutcome::Played(mv("h4e7")));

    assert_eq!(trainer.hint(), (HintStep::Hidden, None));
    assert!(matches!(
        trainer.observe().as_slice(),
        [PuzzleOutcome::Completed {
            puzzle_id: 1,
            success: true,
            ..
        }]
    ));
    assert_eq!(trainer.request_hint().await.unwrap(), HintOutcome::Unavailable);
}

#[tokio::test]
async fn user_move_clears_the_hint() {
    let mut trainer = trainer();
    trainer.open_puzzle(mate_in_two());

    assert_eq!(trainer.request_hint().await.unwrap(), HintOutcome::Origin(sq("b2")));
    trainer.make_move(sq("b2"), sq("b7"), None).await.unwrap();
    assert_eq!(trainer.hint(), (HintStep::Hidden, None));

    // The next hint is for the next solution move.
    assert_eq!(trainer.request_hint().await.unwrap(), HintOutcome::Origin(sq("a1")));
}

#[tokio::test]
async fn shutdown_saves_the_current_puzzle() {
    let mut trainer = trainer();
    trainer.open_puzzle(mate_in_two());
    trainer.make_move(sq("b2"), sq("b7"), None).await.unwrap();

    trainer.shutdown().await;
    let saved = trainer.store().get(2).expect("puzzle 2 saved");
    assert_eq!(saved.resume.plies_played(), 2);
    assert!(saved.timer_running);
}

//! Unit tests for the traversal engine.
//!
//! Runs against an in-memory SQLite tree, with a mocked session store where
//! persistence failures need to be injected.

use super::*;
use crate::error::{Recovery, StorageError};
use crate::storage::{AnswerDraft, MockSessionStore, Question, SqliteStorage};
use pretty_assertions::assert_eq;

struct PluggedIn {
    yes: i64,
    no: i64,
    fuse_ok: i64,
    fuse_blown: i64,
}

async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

fn engine(storage: &SqliteStorage) -> TraversalEngine<SqliteStorage, SqliteStorage> {
    TraversalEngine::new(storage.clone(), storage.clone(), &TreeConfig::default())
}

/// start: "Is it plugged in?" → Yes: check_power, No: "Plug it in."
/// check_power: "Is the fuse intact?" → Yes: "Call support.", No: "Replace the fuse."
async fn plugged_in_tree(storage: &SqliteStorage) -> PluggedIn {
    storage
        .create_question(&Question::new("start", "Is it plugged in?"))
        .await
        .unwrap();
    storage
        .create_question(&Question::new("check_power", "Is the fuse intact?").with_category("power"))
        .await
        .unwrap();

    let yes = storage
        .create_answer(&AnswerDraft::new("start", "Yes").leading_to("check_power"))
        .await
        .unwrap();
    let no = storage
        .create_answer(&AnswerDraft::new("start", "No").concluding("Plug it in."))
        .await
        .unwrap();
    let fuse_ok = storage
        .create_answer(&AnswerDraft::new("check_power", "Yes").concluding("Call support."))
        .await
        .unwrap();
    let fuse_blown = storage
        .create_answer(&AnswerDraft::new("check_power", "No").concluding("Replace the fuse."))
        .await
        .unwrap();

    PluggedIn {
        yes: yes.id,
        no: no.id,
        fuse_ok: fuse_ok.id,
        fuse_blown: fuse_blown.id,
    }
}

// ============================================================================
// start / current_step
// ============================================================================

#[tokio::test]
async fn test_start_positions_session_at_start_question() {
    let storage = create_test_storage().await;
    plugged_in_tree(&storage).await;
    let engine = engine(&storage);

    let origin = SessionOrigin::new(Some("10.1.1.1".to_string()), Some("test-agent".to_string()));
    let session = engine.start(origin.clone()).await.unwrap();

    assert_eq!(session.current_question.as_deref(), Some("start"));
    assert!(session.history.is_empty());
    assert_eq!(session.origin, origin);

    let stored = storage.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(stored, session);
}

#[tokio::test]
async fn test_current_step_lists_choices_in_order() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let session = engine.start(SessionOrigin::default()).await.unwrap();

    let step = engine.current_step(&session).await.unwrap();
    match step {
        Step::Question(view) => {
            assert_eq!(view.question_id, "start");
            assert_eq!(view.text, "Is it plugged in?");
            assert_eq!(
                view.choices,
                vec![
                    Choice {
                        answer_id: tree.yes,
                        text: "Yes".to_string()
                    },
                    Choice {
                        answer_id: tree.no,
                        text: "No".to_string()
                    },
                ]
            );
        }
        other => panic!("expected question, got {:?}", other),
    }
}

#[tokio::test]
async fn test_current_step_breaks_order_ties_by_identity() {
    let storage = create_test_storage().await;
    storage
        .create_question(&Question::new("start", "Which light is on?"))
        .await
        .unwrap();
    let late = storage
        .create_answer(&AnswerDraft::new("start", "Amber").concluding("Wait.").with_order(5))
        .await
        .unwrap();
    let first_tie = storage
        .create_answer(&AnswerDraft::new("start", "Red").concluding("Unplug.").with_order(1))
        .await
        .unwrap();
    let second_tie = storage
        .create_answer(&AnswerDraft::new("start", "Green").concluding("Fine.").with_order(1))
        .await
        .unwrap();
    let engine = engine(&storage);
    let session = engine.start(SessionOrigin::default()).await.unwrap();

    let Step::Question(view) = engine.current_step(&session).await.unwrap() else {
        panic!("expected question");
    };
    let ids: Vec<i64> = view.choices.iter().map(|c| c.answer_id).collect();
    assert_eq!(ids, vec![first_tie.id, second_tie.id, late.id]);
}

#[tokio::test]
async fn test_single_terminal_answer_short_circuits_to_conclusion() {
    let storage = create_test_storage().await;
    storage
        .create_question(&Question::new("start", "Did you try turning it off and on?"))
        .await
        .unwrap();
    let only = storage
        .create_answer(&AnswerDraft::new("start", "Continue").concluding("Turn it off and on."))
        .await
        .unwrap();
    let engine = engine(&storage);
    let session = engine.start(SessionOrigin::default()).await.unwrap();

    let step = engine.current_step(&session).await.unwrap();
    assert_eq!(
        step,
        Step::Conclusion(ConclusionView {
            session_id: session.id.clone(),
            conclusion: "Turn it off and on.".to_string(),
            answer_id: Some(only.id),
            history: vec![],
        })
    );
}

#[tokio::test]
async fn test_resolve_step_records_short_circuited_conclusion() {
    let storage = create_test_storage().await;
    storage
        .create_question(&Question::new("start", "Did you try turning it off and on?"))
        .await
        .unwrap();
    storage
        .create_answer(&AnswerDraft::new("start", "Continue").concluding("Turn it off and on."))
        .await
        .unwrap();
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    let step = engine.resolve_step(&mut session).await.unwrap();
    assert_eq!(
        step,
        Step::Conclusion(ConclusionView {
            session_id: session.id.clone(),
            conclusion: "Turn it off and on.".to_string(),
            answer_id: None,
            history: vec![HistoryEntry::new("Did you try turning it off and on?", "Continue")],
        })
    );

    let stored = storage.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(stored, session);
    assert!(stored.is_completed());
    assert_eq!(stored.conclusion.as_deref(), Some("Turn it off and on."));

    // Resolving again is a read of the recorded conclusion.
    let again = engine.resolve_step(&mut session).await.unwrap();
    assert_eq!(again, step);
    assert_eq!(session.history.len(), 1);

    let summary = crate::engine::AnalyticsAggregator::default()
        .summarize_store(&storage)
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.abandoned, 0);
    assert_eq!(summary.top_conclusions[0].conclusion, "Turn it off and on.");
}

#[tokio::test]
async fn test_resolve_step_leaves_questions_alone() {
    let storage = create_test_storage().await;
    plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();
    let before = session.clone();

    let resolved = engine.resolve_step(&mut session).await.unwrap();
    assert_eq!(resolved, engine.current_step(&session).await.unwrap());
    assert!(matches!(resolved, Step::Question(_)));
    assert_eq!(session, before);
}

#[tokio::test]
async fn test_single_non_terminal_answer_is_still_a_question() {
    let storage = create_test_storage().await;
    storage
        .create_question(&Question::new("start", "Ready?"))
        .await
        .unwrap();
    storage
        .create_question(&Question::new("next", "Is it on?"))
        .await
        .unwrap();
    storage
        .create_answer(&AnswerDraft::new("start", "Go").leading_to("next"))
        .await
        .unwrap();
    let engine = engine(&storage);
    let session = engine.start(SessionOrigin::default()).await.unwrap();

    let step = engine.current_step(&session).await.unwrap();
    assert!(matches!(step, Step::Question(ref v) if v.choices.len() == 1));
}

#[tokio::test]
async fn test_two_terminal_answers_remain_a_choice() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();
    engine.submit_answer(&mut session, tree.yes).await.unwrap();

    let Step::Question(view) = engine.current_step(&session).await.unwrap() else {
        panic!("expected question");
    };
    assert_eq!(view.question_id, "check_power");
    assert_eq!(view.category.as_deref(), Some("power"));
    assert_eq!(view.choices.len(), 2);
    assert_eq!(view.history, vec![HistoryEntry::new("Is it plugged in?", "Yes")]);
}

#[tokio::test]
async fn test_current_step_on_deleted_question_is_node_not_found() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();
    engine.submit_answer(&mut session, tree.yes).await.unwrap();

    storage.delete_question("check_power").await.unwrap();

    let err = engine.current_step(&session).await.unwrap_err();
    assert!(matches!(err, TraversalError::NodeNotFound { ref question_id } if question_id == "check_power"));
}

#[tokio::test]
async fn test_current_step_not_started_is_node_not_found() {
    let storage = create_test_storage().await;
    plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = Session::new("start");
    session.current_question = None;

    let err = engine.current_step(&session).await.unwrap_err();
    assert!(matches!(err, TraversalError::NodeNotFound { .. }));
}

// ============================================================================
// submit_answer
// ============================================================================

#[tokio::test]
async fn test_plugged_in_scenario_concludes() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    let outcome = engine.submit_answer(&mut session, tree.no).await.unwrap();

    assert_eq!(
        outcome,
        NextStep::Concluded {
            conclusion: "Plug it in.".to_string()
        }
    );
    assert_eq!(session.history, vec![HistoryEntry::new("Is it plugged in?", "No")]);
    assert!(session.is_completed());
    assert_eq!(session.conclusion.as_deref(), Some("Plug it in."));

    let stored = storage.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(stored, session);
}

#[tokio::test]
async fn test_submit_advances_and_persists() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    let outcome = engine.submit_answer(&mut session, tree.yes).await.unwrap();

    assert_eq!(
        outcome,
        NextStep::Advance {
            question_id: "check_power".to_string()
        }
    );
    assert_eq!(session.current_question.as_deref(), Some("check_power"));
    assert!(session.abandoned);

    let stored = storage.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.current_question.as_deref(), Some("check_power"));
    assert_eq!(stored.history.len(), 1);
}

#[tokio::test]
async fn test_history_grows_by_one_per_submission() {
    let storage = create_test_storage().await;
    for (key, next) in [("start", "q1"), ("q1", "q2"), ("q2", "q3")] {
        storage
            .create_question(&Question::new(key, format!("At {}?", key)))
            .await
            .unwrap();
        storage
            .create_answer(&AnswerDraft::new(key, "Continue").leading_to(next))
            .await
            .unwrap();
        storage
            .create_answer(&AnswerDraft::new(key, "Stop").concluding("Stopped."))
            .await
            .unwrap();
    }
    storage
        .create_question(&Question::new("q3", "Last?"))
        .await
        .unwrap();
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    for expected in 1..=3 {
        let Step::Question(view) = engine.current_step(&session).await.unwrap() else {
            panic!("expected question");
        };
        engine
            .submit_answer(&mut session, view.choices[0].answer_id)
            .await
            .unwrap();
        assert_eq!(session.history.len(), expected);
    }
    assert_eq!(session.current_question.as_deref(), Some("q3"));
}

#[tokio::test]
async fn test_submit_rejects_answers_of_other_questions() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();
    let before = session.clone();

    for answer_id in [tree.fuse_ok, tree.fuse_blown] {
        let err = engine.submit_answer(&mut session, answer_id).await.unwrap_err();
        match err {
            TraversalError::StateMismatch { expected, actual } => {
                assert_eq!(expected, "start");
                assert_eq!(actual, "check_power");
            }
            other => panic!("expected StateMismatch, got {:?}", other),
        }
        assert_eq!(session, before);
    }
}

#[tokio::test]
async fn test_replayed_submission_after_advance_is_rejected() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    engine.submit_answer(&mut session, tree.yes).await.unwrap();
    let err = engine.submit_answer(&mut session, tree.yes).await.unwrap_err();

    assert!(matches!(err, TraversalError::StateMismatch { .. }));
    assert_eq!(session.history.len(), 1);
}

#[tokio::test]
async fn test_submit_unknown_answer() {
    let storage = create_test_storage().await;
    plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    let err = engine.submit_answer(&mut session, 9999).await.unwrap_err();
    assert!(matches!(err, TraversalError::AnswerNotFound { answer_id: 9999 }));
}

#[tokio::test]
async fn test_dangling_next_pointer_is_configuration_error() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    storage.delete_question("check_power").await.unwrap();

    let err = engine.submit_answer(&mut session, tree.yes).await.unwrap_err();
    match err {
        TraversalError::Configuration { reason } => assert_eq!(reason, "dangling next pointer"),
        other => panic!("expected Configuration, got {:?}", other),
    }
    assert_eq!(session.current_question.as_deref(), Some("start"));
    assert!(session.history.is_empty());

    let stored = storage.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.current_question.as_deref(), Some("start"));
    assert!(stored.history.is_empty());
}

#[tokio::test]
async fn test_answer_without_target_is_configuration_error() {
    let storage = create_test_storage().await;
    storage
        .create_question(&Question::new("start", "Is it plugged in?"))
        .await
        .unwrap();
    let broken = storage
        .create_answer(&AnswerDraft::new("start", "Maybe"))
        .await
        .unwrap();
    storage
        .create_answer(&AnswerDraft::new("start", "No").concluding("Plug it in."))
        .await
        .unwrap();
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();
    let before = session.clone();

    let err = engine.submit_answer(&mut session, broken.id).await.unwrap_err();
    match err {
        TraversalError::Configuration { reason } => assert_eq!(reason, "answer has no next step"),
        other => panic!("expected Configuration, got {:?}", other),
    }
    assert_eq!(session, before);
}

#[tokio::test]
async fn test_retry_succeeds_after_tree_is_fixed() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    storage.delete_question("check_power").await.unwrap();
    assert!(engine.submit_answer(&mut session, tree.yes).await.is_err());

    storage
        .create_question(&Question::new("check_power", "Is the fuse intact?"))
        .await
        .unwrap();
    let outcome = engine.submit_answer(&mut session, tree.yes).await.unwrap();
    assert!(matches!(outcome, NextStep::Advance { .. }));
    assert_eq!(session.history.len(), 1);
}

#[tokio::test]
async fn test_history_captures_text_at_submission_time() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    // Edited between showing the step and submitting the answer.
    engine.current_step(&session).await.unwrap();
    let mut question = storage.get_question("start").await.unwrap().unwrap();
    question.text = "Is the power cable connected?".to_string();
    storage.update_question(&question).await.unwrap();

    engine.submit_answer(&mut session, tree.yes).await.unwrap();
    assert_eq!(session.history[0].question, "Is the power cable connected?");

    // Later edits do not rewrite recorded history.
    question.text = "Something else entirely".to_string();
    storage.update_question(&question).await.unwrap();
    let stored = storage.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.history[0].question, "Is the power cable connected?");
}

#[tokio::test]
async fn test_concluded_session_accepts_terminal_replay() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    engine.submit_answer(&mut session, tree.no).await.unwrap();
    let finalized = session.clone();

    let outcome = engine.submit_answer(&mut session, tree.no).await.unwrap();
    assert_eq!(
        outcome,
        NextStep::Concluded {
            conclusion: "Plug it in.".to_string()
        }
    );
    assert_eq!(session, finalized);
    assert_eq!(storage.get_session(&session.id).await.unwrap().unwrap(), finalized);

    let step = engine.current_step(&session).await.unwrap();
    assert!(matches!(step, Step::Conclusion(ref v) if v.conclusion == "Plug it in." && v.answer_id.is_none()));
}

#[tokio::test]
async fn test_concluded_session_still_validates_submissions() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();

    engine.submit_answer(&mut session, tree.no).await.unwrap();
    assert_eq!(session.current_question.as_deref(), Some("start"));
    let finalized = session.clone();

    // Owned by another question.
    for answer_id in [tree.fuse_ok, tree.fuse_blown] {
        let err = engine
            .submit_answer(&mut session, answer_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TraversalError::StateMismatch { ref expected, ref actual }
                if expected == "start" && actual == "check_power"
        ));
    }

    // Same question, but not the way it concluded.
    let err = engine.submit_answer(&mut session, tree.yes).await.unwrap_err();
    assert!(matches!(err, TraversalError::StateMismatch { .. }));

    let err = engine.submit_answer(&mut session, 999_999).await.unwrap_err();
    assert!(matches!(err, TraversalError::AnswerNotFound { answer_id: 999_999 }));
    assert_eq!(err.recovery(), Recovery::Refetch);

    assert_eq!(session, finalized);
    assert_eq!(storage.get_session(&session.id).await.unwrap().unwrap(), finalized);
}

#[tokio::test]
async fn test_failed_session_write_leaves_session_unchanged() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;

    let mut sessions = MockSessionStore::new();
    sessions.expect_update_session().times(1).returning(|_| {
        Err(StorageError::Query {
            message: "disk I/O error".to_string(),
        })
    });
    let engine = TraversalEngine::new(storage.clone(), sessions, &TreeConfig::default());

    let mut session = Session::new("start");
    let before = session.clone();

    let err = engine.submit_answer(&mut session, tree.yes).await.unwrap_err();
    assert!(matches!(err, TraversalError::Storage(_)));
    assert_eq!(session, before);
}

// ============================================================================
// restart
// ============================================================================

#[tokio::test]
async fn test_restart_creates_new_session_and_keeps_previous() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let origin = SessionOrigin::new(Some("192.168.0.7".to_string()), None);
    let mut session = engine.start(origin.clone()).await.unwrap();
    engine.submit_answer(&mut session, tree.yes).await.unwrap();

    let fresh = engine.restart(&session).await.unwrap();

    assert_ne!(fresh.id, session.id);
    assert_eq!(fresh.current_question.as_deref(), Some("start"));
    assert!(fresh.history.is_empty());
    assert_eq!(fresh.origin, origin);

    let previous = storage.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(previous, session);
    assert_eq!(storage.list_sessions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_restart_from_concluded_session() {
    let storage = create_test_storage().await;
    let tree = plugged_in_tree(&storage).await;
    let engine = engine(&storage);
    let mut session = engine.start(SessionOrigin::default()).await.unwrap();
    engine.submit_answer(&mut session, tree.no).await.unwrap();

    let fresh = engine.restart(&session).await.unwrap();
    let step = engine.current_step(&fresh).await.unwrap();
    assert!(matches!(step, Step::Question(ref v) if v.question_id == "start"));
}

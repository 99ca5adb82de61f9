//! Unit tests for storage types and builder patterns.
//!
//! Tests answer target resolution, ordering, session state derivation,
//! and serialization for Question, Answer, AnswerDraft and Session.

use super::*;
use serde_json::json;

fn answer(id: i64, order: i64) -> Answer {
    Answer {
        id,
        question_id: "start".to_string(),
        text: format!("answer {}", id),
        next_question_id: None,
        conclusion: None,
        order,
        created_at: Utc::now(),
    }
}

// ============================================================================
// Question tests
// ============================================================================

#[test]
fn test_question_new() {
    let question = Question::new("start", "Is it plugged in?");
    assert_eq!(question.question_id, "start");
    assert_eq!(question.text, "Is it plugged in?");
    assert!(question.category.is_none());
}

#[test]
fn test_question_with_category() {
    let question = Question::new("start", "Is it plugged in?").with_category("power");
    assert_eq!(question.category, Some("power".to_string()));
}

// ============================================================================
// Answer tests
// ============================================================================

#[test]
fn test_answer_target_next() {
    let mut a = answer(1, 1);
    a.next_question_id = Some("check_power".to_string());
    assert_eq!(a.target(), AnswerTarget::Next("check_power"));
    assert!(!a.is_terminal());
}

#[test]
fn test_answer_target_conclusion() {
    let mut a = answer(1, 1);
    a.conclusion = Some("Plug it in.".to_string());
    assert_eq!(a.target(), AnswerTarget::Conclusion("Plug it in."));
    assert!(a.is_terminal());
}

#[test]
fn test_answer_target_missing() {
    let a = answer(1, 1);
    assert_eq!(a.target(), AnswerTarget::Missing);
    assert!(!a.is_terminal());
}

#[test]
fn test_answer_target_next_wins_over_conclusion() {
    let mut a = answer(1, 1);
    a.next_question_id = Some("check_power".to_string());
    a.conclusion = Some("Plug it in.".to_string());
    assert_eq!(a.target(), AnswerTarget::Next("check_power"));
}

#[test]
fn test_sort_answers_by_order_then_id() {
    let mut answers = vec![answer(5, 2), answer(3, 1), answer(4, 2), answer(9, 0)];
    sort_answers(&mut answers);
    let ids: Vec<i64> = answers.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![9, 3, 4, 5]);
}

#[test]
fn test_sort_answers_sparse_orders() {
    let mut answers = vec![answer(1, 100), answer(2, -5), answer(3, 40)];
    sort_answers(&mut answers);
    let ids: Vec<i64> = answers.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![2, 3, 1]);
}

// ============================================================================
// AnswerDraft tests
// ============================================================================

#[test]
fn test_answer_draft_builders() {
    let draft = AnswerDraft::new("start", "Yes")
        .leading_to("check_power")
        .with_order(3);
    assert_eq!(draft.question_id, "start");
    assert_eq!(draft.next_question_id, Some("check_power".to_string()));
    assert!(draft.conclusion.is_none());
    assert_eq!(draft.order, Some(3));

    let draft = AnswerDraft::new("start", "No").concluding("Plug it in.");
    assert_eq!(draft.conclusion, Some("Plug it in.".to_string()));
    assert!(draft.order.is_none());
}

// ============================================================================
// Session tests
// ============================================================================

#[test]
fn test_session_new() {
    let session = Session::new("start");
    assert!(!session.id.is_empty());
    assert_eq!(session.current_question, Some("start".to_string()));
    assert!(session.history.is_empty());
    assert!(session.completed_at.is_none());
    assert!(session.conclusion.is_none());
    assert!(session.abandoned);
    assert!(!session.is_completed());
}

#[test]
fn test_session_ids_are_unique() {
    let a = Session::new("start");
    let b = Session::new("start");
    assert_ne!(a.id, b.id);
}

#[test]
fn test_session_with_origin() {
    let origin = SessionOrigin::new(Some("10.0.0.1".to_string()), Some("curl/8.0".to_string()));
    let session = Session::new("start").with_origin(origin.clone());
    assert_eq!(session.origin, origin);
}

#[test]
fn test_session_state_transitions() {
    let mut session = Session::new("start");
    assert_eq!(session.state(), SessionState::AtQuestion("start"));

    session.current_question = None;
    assert_eq!(session.state(), SessionState::NotStarted);

    session.current_question = Some("start".to_string());
    session.completed_at = Some(Utc::now());
    session.conclusion = Some("Plug it in.".to_string());
    assert_eq!(session.state(), SessionState::Concluded("Plug it in."));
}

#[test]
fn test_session_completed_requires_abandoned_cleared() {
    let mut session = Session::new("start");
    session.completed_at = Some(Utc::now());
    assert!(!session.is_completed());

    session.abandoned = false;
    assert!(session.is_completed());
}

#[test]
fn test_session_serialization_flattens_origin() {
    let session = Session::new("start").with_origin(SessionOrigin::new(
        Some("127.0.0.1".to_string()),
        None,
    ));
    let value = serde_json::to_value(&session).unwrap();
    assert_eq!(value["client_address"], json!("127.0.0.1"));
    assert_eq!(value["current_question"], json!("start"));
    assert_eq!(value["abandoned"], json!(true));

    let back: Session = serde_json::from_value(value).unwrap();
    assert_eq!(back, session);
}

#[test]
fn test_history_entry_serialization() {
    let entry = HistoryEntry::new("Is it plugged in?", "No");
    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(value, json!({"question": "Is it plugged in?", "answer": "No"}));
}

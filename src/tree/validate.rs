//! Well-formedness checks over a snapshot of the tree.
//!
//! The tree is checked as an adjacency map (key → question) plus each
//! question's owned answer list, so every walk here is over keys.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::storage::{Answer, AnswerTarget, Question};

/// How serious an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Traversal through this part of the tree fails.
    Error,
    /// Traversal works but the tree is probably not what was intended.
    Warning,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum Issue {
    MissingStart {
        question_id: String,
    },
    DanglingNext {
        answer_id: i64,
        question_id: String,
        next_question_id: String,
    },
    NoNextStep {
        answer_id: i64,
        question_id: String,
    },
    ConflictingTargets {
        answer_id: i64,
        question_id: String,
    },
    NoAnswers {
        question_id: String,
    },
    Unreachable {
        question_id: String,
    },
    /// Keys along a loop, the first key repeated at the end.
    Cycle {
        path: Vec<String>,
    },
}

impl Issue {
    /// Severity of this issue. Loops are reported, never rejected.
    pub fn severity(&self) -> Severity {
        match self {
            Issue::MissingStart { .. }
            | Issue::DanglingNext { .. }
            | Issue::NoNextStep { .. }
            | Issue::NoAnswers { .. } => Severity::Error,
            Issue::ConflictingTargets { .. } | Issue::Unreachable { .. } | Issue::Cycle { .. } => {
                Severity::Warning
            }
        }
    }
}

/// Result of [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub question_count: usize,
    pub answer_count: usize,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    /// Issues that break traversal.
    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity() == Severity::Error)
    }

    /// Issues worth an administrator's attention.
    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity() == Severity::Warning)
    }

    /// True when there are no errors. Warnings do not count.
    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }
}

/// Check the tree rooted at `start_question`.
pub fn validate(questions: &[Question], answers: &[Answer], start_question: &str) -> ValidationReport {
    let nodes: BTreeMap<&str, &Question> = questions
        .iter()
        .map(|q| (q.question_id.as_str(), q))
        .collect();

    let mut owned: BTreeMap<&str, Vec<&Answer>> = BTreeMap::new();
    for answer in answers {
        owned.entry(answer.question_id.as_str()).or_default().push(answer);
    }
    for list in owned.values_mut() {
        list.sort_by_key(|a| (a.order, a.id));
    }

    let mut issues = Vec::new();

    if !nodes.contains_key(start_question) {
        issues.push(Issue::MissingStart {
            question_id: start_question.to_string(),
        });
    }

    for question_id in nodes.keys() {
        let list = owned.get(question_id).map(Vec::as_slice).unwrap_or_default();
        if list.is_empty() {
            issues.push(Issue::NoAnswers {
                question_id: question_id.to_string(),
            });
        }

        for answer in list.iter().copied() {
            if answer.next_question_id.is_some() && answer.conclusion.is_some() {
                issues.push(Issue::ConflictingTargets {
                    answer_id: answer.id,
                    question_id: question_id.to_string(),
                });
            }
            match answer.target() {
                AnswerTarget::Next(next) if !nodes.contains_key(next) => {
                    issues.push(Issue::DanglingNext {
                        answer_id: answer.id,
                        question_id: question_id.to_string(),
                        next_question_id: next.to_string(),
                    });
                }
                AnswerTarget::Missing => issues.push(Issue::NoNextStep {
                    answer_id: answer.id,
                    question_id: question_id.to_string(),
                }),
                _ => {}
            }
        }
    }

    let edges = successors(&nodes, &owned);

    if nodes.contains_key(start_question) {
        let reachable = reachable_from(start_question, &edges);
        for question_id in nodes.keys() {
            if !reachable.contains(question_id) {
                issues.push(Issue::Unreachable {
                    question_id: question_id.to_string(),
                });
            }
        }
    }

    for path in find_cycles(&nodes, &edges) {
        issues.push(Issue::Cycle { path });
    }

    ValidationReport {
        question_count: questions.len(),
        answer_count: answers.len(),
        issues,
    }
}

/// Successor keys per question, restricted to questions that exist.
fn successors<'a>(
    nodes: &BTreeMap<&'a str, &'a Question>,
    owned: &BTreeMap<&'a str, Vec<&'a Answer>>,
) -> BTreeMap<&'a str, Vec<&'a str>> {
    let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (question_id, list) in owned {
        if !nodes.contains_key(question_id) {
            continue;
        }
        let targets = edges.entry(*question_id).or_default();
        for answer in list.iter().copied() {
            if let AnswerTarget::Next(next) = answer.target() {
                if nodes.contains_key(next) && !targets.contains(&next) {
                    targets.push(next);
                }
            }
        }
    }
    edges
}

fn reachable_from<'a>(start: &'a str, edges: &BTreeMap<&'a str, Vec<&'a str>>) -> BTreeSet<&'a str> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);
    while let Some(node) = queue.pop_front() {
        if let Some(targets) = edges.get(node) {
            for target in targets {
                if seen.insert(*target) {
                    queue.push_back(*target);
                }
            }
        }
    }
    seen
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Every back edge found by a depth-first walk, as the loop it closes.
fn find_cycles<'a>(
    nodes: &BTreeMap<&'a str, &'a Question>,
    edges: &BTreeMap<&'a str, Vec<&'a str>>,
) -> Vec<Vec<String>> {
    let mut marks: BTreeMap<&str, Mark> = nodes.keys().map(|k| (*k, Mark::Unvisited)).collect();
    let mut cycles = Vec::new();

    for &root in nodes.keys() {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        // (node, index of the next edge to follow)
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::OnStack);

        while let Some((node, index)) = stack.last().copied() {
            let targets = edges.get(node).map(Vec::as_slice).unwrap_or_default();
            if index >= targets.len() {
                marks.insert(node, Mark::Done);
                stack.pop();
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            let target = targets[index];
            match marks[target] {
                Mark::Unvisited => {
                    marks.insert(target, Mark::OnStack);
                    stack.push((target, 0));
                }
                Mark::OnStack => {
                    let from = stack.iter().position(|(n, _)| *n == target).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[from..].iter().map(|(n, _)| n.to_string()).collect();
                    path.push(target.to_string());
                    cycles.push(path);
                }
                Mark::Done => {}
            }
        }
    }

    cycles
}

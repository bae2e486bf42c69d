//! Lifecycle transitions for exercise instances, simulations and the coach
//! sync record. Every status change goes through one of these functions.

use thiserror::Error;

use crate::types::{CoachSyncRecord, ExerciseStatus, SimulationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExerciseEvent {
    Submit,
    Correct,
}

impl ExerciseEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            ExerciseEvent::Submit => "submit",
            ExerciseEvent::Correct => "correct",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationEvent {
    GradeWritten { with_oral: bool },
    CompleteOral,
}

impl SimulationEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            SimulationEvent::GradeWritten { .. } => "grade_written",
            SimulationEvent::CompleteOral => "complete_oral",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("invalid exercise transition from {from:?} on {event}")]
    Exercise {
        from: ExerciseStatus,
        event: &'static str,
    },
    #[error("invalid simulation transition from {from:?} on {event}")]
    Simulation {
        from: SimulationStatus,
        event: &'static str,
    },
}

/// `Corrected -> Corrected` is a regrade; the status is terminal otherwise.
pub fn exercise_transition(
    current: ExerciseStatus,
    event: ExerciseEvent,
) -> Result<ExerciseStatus, TransitionError> {
    match (current, event) {
        (ExerciseStatus::InProgress, ExerciseEvent::Submit) => Ok(ExerciseStatus::Submitted),
        (ExerciseStatus::Submitted, ExerciseEvent::Correct)
        | (ExerciseStatus::Corrected, ExerciseEvent::Correct) => Ok(ExerciseStatus::Corrected),
        (from, event) => Err(TransitionError::Exercise {
            from,
            event: event.as_str(),
        }),
    }
}

pub fn simulation_transition(
    current: SimulationStatus,
    event: SimulationEvent,
) -> Result<SimulationStatus, TransitionError> {
    match (current, event) {
        (SimulationStatus::Taking, SimulationEvent::GradeWritten { with_oral: false }) => {
            Ok(SimulationStatus::Completed)
        }
        (SimulationStatus::Taking, SimulationEvent::GradeWritten { with_oral: true }) => {
            Ok(SimulationStatus::OralPending)
        }
        (SimulationStatus::OralPending, SimulationEvent::CompleteOral) => {
            Ok(SimulationStatus::Completed)
        }
        (from, event) => Err(TransitionError::Simulation {
            from,
            event: event.as_str(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoachSyncState {
    NeverSynced,
    Synced,
}

impl CoachSyncState {
    pub fn of(record: Option<&CoachSyncRecord>) -> Self {
        match record.and_then(|r| r.last_sync_timestamp) {
            Some(_) => CoachSyncState::Synced,
            None => CoachSyncState::NeverSynced,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CoachSyncState::NeverSynced => "NEVER_SYNCED",
            CoachSyncState::Synced => "SYNCED",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task {task_id} is locked until earlier tasks are completed")]
    Locked { task_id: String },
}

/// Index of the first incomplete task, the only one that may be completed.
pub fn active_task_index(record: &CoachSyncRecord) -> Option<usize> {
    record.tasks.iter().position(|t| !t.is_completed)
}

/// Marks `task_id` complete. Returns `Ok(false)` when it already was.
pub fn complete_task(record: &mut CoachSyncRecord, task_id: &str) -> Result<bool, TaskError> {
    let index = record
        .tasks
        .iter()
        .position(|t| t.id == task_id)
        .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

    if record.tasks[index].is_completed {
        return Ok(false);
    }
    if active_task_index(record) != Some(index) {
        return Err(TaskError::Locked {
            task_id: task_id.to_string(),
        });
    }

    record.tasks[index].is_completed = true;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoachTask;

    fn record(done: &[bool]) -> CoachSyncRecord {
        CoachSyncRecord {
            subject_name: "analisi".into(),
            last_sync_timestamp: Some(1),
            tasks: done
                .iter()
                .enumerate()
                .map(|(i, d)| CoachTask {
                    id: format!("t{i}"),
                    text: format!("task {i}"),
                    is_completed: *d,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_exercise_lifecycle() {
        let s = exercise_transition(ExerciseStatus::InProgress, ExerciseEvent::Submit).unwrap();
        assert_eq!(s, ExerciseStatus::Submitted);
        let s = exercise_transition(s, ExerciseEvent::Correct).unwrap();
        assert_eq!(s, ExerciseStatus::Corrected);
        assert_eq!(
            exercise_transition(s, ExerciseEvent::Correct),
            Ok(ExerciseStatus::Corrected)
        );
    }

    #[test]
    fn test_exercise_rejects_illegal() {
        assert!(exercise_transition(ExerciseStatus::InProgress, ExerciseEvent::Correct).is_err());
        assert!(exercise_transition(ExerciseStatus::Corrected, ExerciseEvent::Submit).is_err());
        assert!(exercise_transition(ExerciseStatus::Submitted, ExerciseEvent::Submit).is_err());
    }

    #[test]
    fn test_simulation_lifecycle() {
        assert_eq!(
            simulation_transition(
                SimulationStatus::Taking,
                SimulationEvent::GradeWritten { with_oral: false }
            ),
            Ok(SimulationStatus::Completed)
        );
        let pending = simulation_transition(
            SimulationStatus::Taking,
            SimulationEvent::GradeWritten { with_oral: true },
        )
        .unwrap();
        assert_eq!(pending, SimulationStatus::OralPending);
        assert_eq!(
            simulation_transition(pending, SimulationEvent::CompleteOral),
            Ok(SimulationStatus::Completed)
        );
    }

    #[test]
    fn test_oral_cannot_start_before_written() {
        assert!(simulation_transition(SimulationStatus::Taking, SimulationEvent::CompleteOral).is_err());
        assert!(simulation_transition(
            SimulationStatus::Completed,
            SimulationEvent::GradeWritten { with_oral: false }
        )
        .is_err());
    }

    #[test]
    fn test_sync_state_of_record() {
        assert_eq!(CoachSyncState::of(None), CoachSyncState::NeverSynced);
        let mut r = record(&[]);
        assert_eq!(CoachSyncState::of(Some(&r)), CoachSyncState::Synced);
        r.last_sync_timestamp = None;
        assert_eq!(CoachSyncState::of(Some(&r)), CoachSyncState::NeverSynced);
    }

    #[test]
    fn test_sequential_task_unlock() {
        let mut r = record(&[true, false, false]);
        assert_eq!(active_task_index(&r), Some(1));

        let err = complete_task(&mut r, "t2").unwrap_err();
        assert_eq!(err, TaskError::Locked { task_id: "t2".into() });
        assert!(!r.tasks[2].is_completed);

        assert_eq!(complete_task(&mut r, "t1"), Ok(true));
        assert_eq!(complete_task(&mut r, "t2"), Ok(true));
        assert_eq!(active_task_index(&r), None);
    }

    #[test]
    fn test_complete_task_already_done_and_missing() {
        let mut r = record(&[true, false]);
        assert_eq!(complete_task(&mut r, "t0"), Ok(false));
        assert!(matches!(complete_task(&mut r, "nope"), Err(TaskError::NotFound(_))));
    }
}

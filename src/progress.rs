use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::curriculum::CourseCurriculum;
use crate::models::{Course, Lesson};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub completed: usize,
    pub total: usize,
    pub percentage: u32,
    pub remaining: usize,
}

impl ProgressSummary {
    pub fn calculate(total: usize, completed: usize) -> Self {
        let percentage = if total > 0 {
            ((completed as f64 / total as f64) * 100.0).round() as u32
        } else {
            0
        };

        Self {
            completed,
            total,
            percentage,
            remaining: total.saturating_sub(completed),
        }
    }

    pub fn for_curriculum(curriculum: &CourseCurriculum, completed: &HashSet<i64>) -> Self {
        let done = curriculum
            .lessons()
            .filter(|l| completed.contains(&l.id))
            .count();
        Self::calculate(curriculum.lesson_count(), done)
    }
}

/// First lesson not yet completed in curriculum order. Once everything is
/// done the course starts over from its first lesson.
pub fn next_lesson<'a>(
    curriculum: &'a CourseCurriculum,
    completed: &HashSet<i64>,
) -> Option<&'a Lesson> {
    curriculum
        .lessons()
        .find(|l| !completed.contains(&l.id))
        .or_else(|| curriculum.first_lesson())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub course: Course,
    pub progress: ProgressSummary,
    pub next_lesson: Option<Lesson>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

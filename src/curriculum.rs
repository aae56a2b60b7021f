use serde::{Deserialize, Serialize};

use crate::models::{Category, Course, Lesson, Section, Tag};
use crate::validation::is_valid_video_id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionWithLessons {
    #[serde(flatten)]
    pub section: Section,
    pub lessons: Vec<Lesson>,
}

/// The Course -> Section -> Lesson tree, sorted by `order` at every level.
/// Built once from flat rows when it leaves the database layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseCurriculum {
    pub course: Course,
    pub sections: Vec<SectionWithLessons>,
}

impl CourseCurriculum {
    /// Lessons whose section is not among `sections` are dropped.
    pub fn assemble(course: Course, mut sections: Vec<Section>, mut lessons: Vec<Lesson>) -> Self {
        sections.sort_by_key(|s| s.order);
        lessons.sort_by_key(|l| l.order);

        let sections = sections
            .into_iter()
            .map(|section| {
                let (own, rest): (Vec<Lesson>, Vec<Lesson>) = lessons
                    .drain(..)
                    .partition(|lesson| lesson.section_id == section.id);
                lessons = rest;
                SectionWithLessons {
                    section,
                    lessons: own,
                }
            })
            .collect();

        Self { course, sections }
    }

    pub fn lessons(&self) -> impl Iterator<Item = &Lesson> {
        self.sections.iter().flat_map(|s| s.lessons.iter())
    }

    pub fn lesson_count(&self) -> usize {
        self.sections.iter().map(|s| s.lessons.len()).sum()
    }

    /// The lesson first by (section order, lesson order).
    pub fn first_lesson(&self) -> Option<&Lesson> {
        self.lessons().next()
    }

    pub fn first_lesson_id(&self) -> Option<i64> {
        self.first_lesson().map(|l| l.id)
    }

    pub fn find_lesson(&self, lesson_id: i64) -> Option<(&SectionWithLessons, &Lesson)> {
        self.sections.iter().find_map(|section| {
            section
                .lessons
                .iter()
                .find(|l| l.id == lesson_id)
                .map(|lesson| (section, lesson))
        })
    }

    /// Previous and next lesson inside the lesson's own section.
    pub fn neighbours(&self, lesson_id: i64) -> (Option<&Lesson>, Option<&Lesson>) {
        let Some((section, _)) = self.find_lesson(lesson_id) else {
            return (None, None);
        };

        let Some(index) = section.lessons.iter().position(|l| l.id == lesson_id) else {
            return (None, None);
        };

        let previous = index.checked_sub(1).and_then(|i| section.lessons.get(i));
        let next = section.lessons.get(index + 1);
        (previous, next)
    }
}

/// Embed and poster URLs for a lesson's video. Only built for ids that pass
/// `is_valid_video_id`, whatever the stored row holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPlayer {
    pub embed_url: String,
    pub thumbnail_url: String,
}

impl VideoPlayer {
    pub fn for_video_id(video_id: &str) -> Option<Self> {
        if !is_valid_video_id(video_id) {
            return None;
        }
        Some(Self {
            embed_url: format!("https://www.youtube.com/embed/{}?autoplay=1", video_id),
            thumbnail_url: format!("https://i.ytimg.com/vi/{}/maxresdefault.jpg", video_id),
        })
    }
}

/// Everything the lesson player shows: the lesson, its in-section
/// neighbours and the course outline for navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonView {
    pub course: Course,
    pub section: Section,
    pub lesson: Lesson,
    /// `None` when the stored video id is malformed.
    pub player: Option<VideoPlayer>,
    pub previous: Option<Lesson>,
    pub next: Option<Lesson>,
    pub first_lesson_id: Option<i64>,
    pub sections: Vec<SectionWithLessons>,
}

impl LessonView {
    /// `None` when the lesson is not part of this course.
    pub fn build(curriculum: CourseCurriculum, lesson_id: i64) -> Option<Self> {
        let (section, lesson) = curriculum.find_lesson(lesson_id)?;
        let (previous, next) = curriculum.neighbours(lesson_id);

        let section = section.section.clone();
        let lesson = lesson.clone();
        let player = VideoPlayer::for_video_id(&lesson.youtube_video_id);
        let previous = previous.cloned();
        let next = next.cloned();
        let first_lesson_id = curriculum.first_lesson_id();

        Some(Self {
            course: curriculum.course,
            section,
            lesson,
            player,
            previous,
            next,
            first_lesson_id,
            sections: curriculum.sections,
        })
    }

    pub fn is_first_lesson(&self) -> bool {
        self.first_lesson_id == Some(self.lesson.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseDetail {
    #[serde(flatten)]
    pub curriculum: CourseCurriculum,
    pub category: Option<Category>,
    pub tags: Vec<Tag>,
    pub first_lesson_id: Option<i64>,
    pub lesson_count: usize,
}

impl CourseDetail {
    pub fn new(curriculum: CourseCurriculum, category: Option<Category>, tags: Vec<Tag>) -> Self {
        Self {
            first_lesson_id: curriculum.first_lesson_id(),
            lesson_count: curriculum.lesson_count(),
            curriculum,
            category,
            tags,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonAccess {
    Granted,
    RequiresLogin,
}

/// Anonymous visitors may only play the first lesson of a course.
pub fn lesson_access(is_authenticated: bool, is_first_lesson: bool) -> LessonAccess {
    if is_authenticated || is_first_lesson {
        LessonAccess::Granted
    } else {
        LessonAccess::RequiresLogin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn course() -> Course {
        Course {
            id: 1,
            title: "Rust".to_string(),
            description: "Systems".to_string(),
            thumbnail_url: None,
            category_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn section(id: i64, order: i64) -> Section {
        Section {
            id,
            course_id: 1,
            title: format!("Section {}", id),
            description: None,
            order,
        }
    }

    fn lesson(id: i64, section_id: i64, order: i64) -> Lesson {
        Lesson {
            id,
            section_id,
            title: format!("Lesson {}", id),
            description: None,
            youtube_video_id: "dQw4w9WgXcQ".to_string(),
            order,
        }
    }

    fn sample() -> CourseCurriculum {
        // Section 20 comes first despite being listed second
        CourseCurriculum::assemble(
            course(),
            vec![section(10, 4), section(20, 1)],
            vec![
                lesson(101, 10, 2),
                lesson(100, 10, 1),
                lesson(201, 20, 7),
                lesson(200, 20, 3),
                lesson(999, 30, 1),
            ],
        )
    }

    #[test]
    fn test_assemble_sorts_every_level() {
        let curriculum = sample();
        let section_ids: Vec<i64> = curriculum.sections.iter().map(|s| s.section.id).collect();
        assert_eq!(section_ids, vec![20, 10]);

        let lesson_ids: Vec<i64> = curriculum.lessons().map(|l| l.id).collect();
        assert_eq!(lesson_ids, vec![200, 201, 100, 101]);
        assert_eq!(curriculum.lesson_count(), 4);
    }

    #[test]
    fn test_first_lesson_is_lexicographic() {
        assert_eq!(sample().first_lesson_id(), Some(200));
    }

    #[test]
    fn test_first_lesson_skips_empty_sections() {
        let curriculum = CourseCurriculum::assemble(
            course(),
            vec![section(1, 1), section(2, 2)],
            vec![lesson(5, 2, 1)],
        );
        assert_eq!(curriculum.first_lesson_id(), Some(5));

        let empty = CourseCurriculum::assemble(course(), vec![section(1, 1)], vec![]);
        assert_eq!(empty.first_lesson_id(), None);
    }

    #[test]
    fn test_neighbours_stay_inside_section() {
        let curriculum = sample();

        let (prev, next) = curriculum.neighbours(201);
        assert_eq!(prev.map(|l| l.id), Some(200));
        assert_eq!(next.map(|l| l.id), None);

        let (prev, next) = curriculum.neighbours(100);
        assert_eq!(prev.map(|l| l.id), None);
        assert_eq!(next.map(|l| l.id), Some(101));

        assert_eq!(curriculum.neighbours(12345), (None, None));
    }

    #[test]
    fn test_lesson_view_for_foreign_lesson_is_none() {
        assert!(LessonView::build(sample(), 999).is_none());
        assert!(LessonView::build(sample(), 4242).is_none());
    }

    #[test]
    fn test_lesson_view_knows_first_lesson() {
        let view = LessonView::build(sample(), 200).unwrap();
        assert!(view.is_first_lesson());
        assert_eq!(view.section.id, 20);
        assert_eq!(view.next.map(|l| l.id), Some(201));

        let view = LessonView::build(sample(), 100).unwrap();
        assert!(!view.is_first_lesson());
        assert_eq!(view.first_lesson_id, Some(200));
        assert_eq!(view.sections.len(), 2);
    }

    #[test]
    fn test_lesson_view_withholds_player_for_bad_video_id() {
        let view = LessonView::build(sample(), 200).unwrap();
        let player = view.player.expect("Valid id should get a player");
        assert_eq!(player.embed_url, "https://www.youtube.com/embed/dQw4w9WgXcQ?autoplay=1");

        let mut broken = lesson(300, 20, 9);
        broken.youtube_video_id = "short".to_string();
        let curriculum = CourseCurriculum::assemble(course(), vec![section(20, 1)], vec![broken]);
        let view = LessonView::build(curriculum, 300).unwrap();
        assert_eq!(view.lesson.youtube_video_id, "short");
        assert!(view.player.is_none());
    }

    #[test]
    fn test_lesson_access_gate() {
        assert_eq!(lesson_access(false, true), LessonAccess::Granted);
        assert_eq!(lesson_access(false, false), LessonAccess::RequiresLogin);
        assert_eq!(lesson_access(true, false), LessonAccess::Granted);
        assert_eq!(lesson_access(true, true), LessonAccess::Granted);
    }
}

//! Entity kinds served by the generic CRUD surface.
//!
//! Every record lives in one collection per kind. Routes are derived from
//! [`EntityKind::path`], and "by relation" listings from
//! [`EntityKind::relations`], so adding a kind here is enough to expose it.

use std::fmt;

/// A relation segment in `/{entity}/{relation}/{id}` and the record field it
/// filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub segment: &'static str,
    pub field: &'static str,
}

/// Collection of records exposed over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Users,
    Courses,
    Enrollments,
    CourseDocuments,
    Assignments,
    AssignmentSubmissions,
    AssignmentSubmissionFiles,
    AssignmentDocuments,
    Lessons,
    Comments,
    Grades,
    Submissions,
    Notifications,
}

impl EntityKind {
    pub const ALL: [EntityKind; 13] = [
        EntityKind::Users,
        EntityKind::Courses,
        EntityKind::Enrollments,
        EntityKind::CourseDocuments,
        EntityKind::Assignments,
        EntityKind::AssignmentSubmissions,
        EntityKind::AssignmentSubmissionFiles,
        EntityKind::AssignmentDocuments,
        EntityKind::Lessons,
        EntityKind::Comments,
        EntityKind::Grades,
        EntityKind::Submissions,
        EntityKind::Notifications,
    ];

    /// Route segment, also used as the collection name.
    pub const fn path(self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Courses => "courses",
            EntityKind::Enrollments => "enrollments",
            EntityKind::CourseDocuments => "course-documents",
            EntityKind::Assignments => "assignments",
            EntityKind::AssignmentSubmissions => "assignment-submissions",
            EntityKind::AssignmentSubmissionFiles => "assignment-submission-files",
            EntityKind::AssignmentDocuments => "assignment-documents",
            EntityKind::Lessons => "lessons",
            EntityKind::Comments => "comments",
            EntityKind::Grades => "grades",
            EntityKind::Submissions => "submissions",
            EntityKind::Notifications => "notifications",
        }
    }

    /// Relations listable as `/{entity}/{relation}/{id}`.
    pub const fn relations(self) -> &'static [Relation] {
        const STUDENT: Relation = Relation {
            segment: "student",
            field: "student_id",
        };
        const COURSE: Relation = Relation {
            segment: "course",
            field: "course_id",
        };
        const ASSIGNMENT: Relation = Relation {
            segment: "assignment",
            field: "assignment_id",
        };
        const SUBMISSION: Relation = Relation {
            segment: "submission",
            field: "submission_id",
        };
        const USER: Relation = Relation {
            segment: "user",
            field: "user_id",
        };
        const TEACHER: Relation = Relation {
            segment: "teacher",
            field: "teacher_id",
        };

        match self {
            EntityKind::Users => &[],
            EntityKind::Courses => &[TEACHER],
            EntityKind::Enrollments => &[STUDENT, COURSE],
            EntityKind::CourseDocuments => &[COURSE],
            EntityKind::Assignments => &[COURSE],
            EntityKind::AssignmentSubmissions => &[ASSIGNMENT, STUDENT],
            EntityKind::AssignmentSubmissionFiles => &[SUBMISSION],
            EntityKind::AssignmentDocuments => &[ASSIGNMENT],
            EntityKind::Lessons => &[COURSE],
            EntityKind::Comments => &[USER, SUBMISSION],
            EntityKind::Grades => &[STUDENT, ASSIGNMENT, COURSE],
            EntityKind::Submissions => &[STUDENT],
            EntityKind::Notifications => &[USER],
        }
    }

    /// Fields accepted as equality filters in list query strings.
    pub const fn filterable_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::Users => &["role", "user_name", "email"],
            EntityKind::Notifications => &["user_id", "is_read"],
            _ => &[],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

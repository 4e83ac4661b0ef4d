//! Maps each entity kind to the table that mirrors it.

use lmsbridge_core::lms::EntityKind;

#[derive(Debug, Clone)]
pub struct EntityTableDescriptor {
    pub kind: EntityKind,
    pub table_name: &'static str,
}

pub fn default_entity_tables() -> Vec<EntityTableDescriptor> {
    vec![
        EntityTableDescriptor {
            kind: EntityKind::Course,
            table_name: "lms_courses",
        },
        EntityTableDescriptor {
            kind: EntityKind::Enrollment,
            table_name: "lms_enrollments",
        },
        EntityTableDescriptor {
            kind: EntityKind::Assignment,
            table_name: "lms_assignments",
        },
        EntityTableDescriptor {
            kind: EntityKind::Submission,
            table_name: "lms_submissions",
        },
    ]
}

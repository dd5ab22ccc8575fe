//! Closed vocabularies stored as TEXT columns.

use serde::Serialize;

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Option<Self> {
                match raw.trim().to_ascii_lowercase().as_str() {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Comma-separated list of accepted values, for error messages.
            pub fn expected() -> String {
                Self::ALL
                    .iter()
                    .map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }
    };
}

text_enum!(
    Role {
        Student => "student",
        Teacher => "teacher",
        Parent => "parent",
        Admin => "admin",
    }
);

text_enum!(
    /// `excused` rows are kept but never count for or against a student.
    AttendanceStatus {
        Present => "present",
        Late => "late",
        Absent => "absent",
        Excused => "excused",
    }
);

text_enum!(
    CommentKind {
        Positive => "positive",
        Negative => "negative",
        Neutral => "neutral",
    }
);

text_enum!(
    MaterialKind {
        Document => "document",
        Video => "video",
        Link => "link",
        Image => "image",
    }
);

text_enum!(
    ExamKind {
        Topic => "topic",
        Section => "section",
        Block => "block",
        Modul => "modul",
        Dtm => "dtm",
    }
);

impl Role {
    /// Profile table that holds the role-specific row for a user.
    pub fn profile_table(self) -> &'static str {
        match self {
            Role::Student => "students",
            Role::Teacher => "teachers",
            Role::Parent => "parents",
            Role::Admin => "admins",
        }
    }
}

impl ExamKind {
    pub fn table(self) -> &'static str {
        match self {
            ExamKind::Topic => "topic_tests",
            ExamKind::Section => "section_exams",
            ExamKind::Block => "block_exams",
            ExamKind::Modul => "modul_exams",
            ExamKind::Dtm => "dtm_exams",
        }
    }
}

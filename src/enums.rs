//! Closed vocabularies stored as strings in the database.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $value)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(format!(
                        "valeur invalide '{other}' (attendu: {})",
                        [$($value),+].join(", ")
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    SessionStatus {
        Preparation => "preparation",
        InProgress => "en_cours",
        Finished => "termine",
        Archived => "archive",
    }
);

string_enum!(
    DocumentType {
        General => "general",
        Synthesis => "synthesis",
        Question => "question",
        Comparison => "comparison",
        Annexe => "annexe",
        MeetingNotes => "compte_rendu",
    }
);

string_enum!(
    AnnotationType {
        Comment => "comment",
        Question => "question",
        Suggestion => "suggestion",
        Objection => "objection",
        Validation => "validation",
    }
);

string_enum!(
    AnnotationStatus {
        Open => "open",
        InProgress => "in_progress",
        Resolved => "resolved",
    }
);

string_enum!(
    /// `Valid` and `Postponed` are the two terminal outcomes of a vote.
    DecisionStatus {
        Open => "ouvert",
        InDiscussion => "en_discussion",
        Consensus => "consensus",
        Valid => "valide",
        Postponed => "reporte",
    }
);

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Preparation
    }
}

impl Default for DocumentType {
    fn default() -> Self {
        DocumentType::General
    }
}

impl Default for AnnotationType {
    fn default() -> Self {
        AnnotationType::Comment
    }
}

impl Default for DecisionStatus {
    fn default() -> Self {
        DecisionStatus::Open
    }
}

impl DecisionStatus {
    pub fn is_pending(&self) -> bool {
        !matches!(self, DecisionStatus::Valid | DecisionStatus::Postponed)
    }
}

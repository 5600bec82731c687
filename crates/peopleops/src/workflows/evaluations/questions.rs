use std::collections::BTreeMap;

use serde::Serialize;

use super::domain::{EvaluationSubmission, EvaluationType, Rating};

pub const MAX_EVALUATOR_NAME_CHARS: usize = 120;
pub const MAX_FREE_TEXT_CHARS: usize = 4000;

/// Single prompt on an evaluation form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Question {
    pub key: &'static str,
    pub prompt: &'static str,
}

/// Fixed, versioned form for one evaluation type.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct QuestionSet {
    pub kind: EvaluationType,
    pub version: u16,
    pub questions: &'static [Question],
    pub free_text: &'static [Question],
}

const FREE_TEXT: &[Question] = &[
    Question {
        key: "strengths",
        prompt: "What are this person's main strengths?",
    },
    Question {
        key: "improvements",
        prompt: "Where could this person improve?",
    },
];

static PEER_V1: QuestionSet = QuestionSet {
    kind: EvaluationType::Peer,
    version: 1,
    questions: &[
        Question {
            key: "collaboration",
            prompt: "Collaborates with colleagues to reach shared goals",
        },
        Question {
            key: "communication",
            prompt: "Communicates clearly and respectfully",
        },
        Question {
            key: "reliability",
            prompt: "Delivers what was agreed, on time",
        },
        Question {
            key: "technical_quality",
            prompt: "Quality of the technical work produced",
        },
        Question {
            key: "initiative",
            prompt: "Takes initiative without waiting to be asked",
        },
        Question {
            key: "problem_solving",
            prompt: "Handles problems and unexpected situations",
        },
        Question {
            key: "adaptability",
            prompt: "Adapts to changes in priorities or process",
        },
        Question {
            key: "respect",
            prompt: "Treats everyone with respect and courtesy",
        },
        Question {
            key: "knowledge_sharing",
            prompt: "Shares knowledge and helps others learn",
        },
        Question {
            key: "commitment",
            prompt: "Shows commitment to the team and company",
        },
    ],
    free_text: FREE_TEXT,
};

static MANAGER_V1: QuestionSet = QuestionSet {
    kind: EvaluationType::Manager,
    version: 1,
    questions: &[
        Question {
            key: "goal_delivery",
            prompt: "Achieves the goals set for the period",
        },
        Question {
            key: "work_quality",
            prompt: "Quality and accuracy of deliverables",
        },
        Question {
            key: "autonomy",
            prompt: "Works autonomously within their responsibilities",
        },
        Question {
            key: "accountability",
            prompt: "Owns outcomes, including mistakes",
        },
        Question {
            key: "communication",
            prompt: "Keeps the manager informed of progress and risks",
        },
        Question {
            key: "planning",
            prompt: "Plans and organizes their work",
        },
        Question {
            key: "teamwork",
            prompt: "Contributes to a healthy team environment",
        },
        Question {
            key: "professional_growth",
            prompt: "Seeks to develop new skills",
        },
    ],
    free_text: FREE_TEXT,
};

static SPONSOR_V1: QuestionSet = QuestionSet {
    kind: EvaluationType::Sponsor,
    version: 1,
    questions: &[
        Question {
            key: "leadership_potential",
            prompt: "Shows potential to take on greater responsibility",
        },
        Question {
            key: "strategic_alignment",
            prompt: "Aligns their work with company strategy",
        },
        Question {
            key: "results",
            prompt: "Produces results that matter to the business",
        },
        Question {
            key: "stakeholder_relationships",
            prompt: "Builds productive relationships with stakeholders",
        },
        Question {
            key: "decision_making",
            prompt: "Makes sound decisions with the information available",
        },
        Question {
            key: "values_alignment",
            prompt: "Acts in line with company values",
        },
    ],
    free_text: FREE_TEXT,
};

impl QuestionSet {
    /// Current form for `kind`.
    pub fn for_type(kind: EvaluationType) -> &'static QuestionSet {
        match kind {
            EvaluationType::Peer => &PEER_V1,
            EvaluationType::Manager => &MANAGER_V1,
            EvaluationType::Sponsor => &SPONSOR_V1,
        }
    }

    /// Check a raw submission against this form. The returned answers are the only way to
    /// obtain `CompletedAnswers`, so a persisted evaluation always covers every question.
    pub fn validate_submission(
        &'static self,
        submission: &EvaluationSubmission,
    ) -> Result<CompletedAnswers, ValidationFailure> {
        let evaluator_name = submission.evaluator_name.trim();
        if evaluator_name.is_empty() {
            return Err(ValidationFailure::MissingEvaluatorName);
        }
        if evaluator_name.chars().count() > MAX_EVALUATOR_NAME_CHARS {
            return Err(ValidationFailure::FieldTooLong {
                field: "evaluator_name".to_string(),
                max: MAX_EVALUATOR_NAME_CHARS,
            });
        }

        for (key, text) in &submission.free_text {
            if !self.free_text.iter().any(|question| question.key == key.as_str()) {
                return Err(ValidationFailure::UnknownField { key: key.clone() });
            }
            if text.chars().count() > MAX_FREE_TEXT_CHARS {
                return Err(ValidationFailure::FieldTooLong {
                    field: key.clone(),
                    max: MAX_FREE_TEXT_CHARS,
                });
            }
        }
        if let Some(feedback) = &submission.general_feedback {
            if feedback.chars().count() > MAX_FREE_TEXT_CHARS {
                return Err(ValidationFailure::FieldTooLong {
                    field: "general_feedback".to_string(),
                    max: MAX_FREE_TEXT_CHARS,
                });
            }
        }

        self.collect(&submission.answers)
    }

    /// Map raw answers onto the form, rejecting unknown keys and reporting the first
    /// unanswered question in form order.
    pub fn collect(
        &'static self,
        answers: &BTreeMap<String, Rating>,
    ) -> Result<CompletedAnswers, ValidationFailure> {
        if let Some(unknown) = answers
            .keys()
            .find(|key| !self.questions.iter().any(|question| question.key == key.as_str()))
        {
            return Err(ValidationFailure::UnknownField {
                key: unknown.clone(),
            });
        }

        let mut ratings = Vec::with_capacity(self.questions.len());
        for question in self.questions {
            match answers.get(question.key) {
                Some(rating) => ratings.push((question.key, *rating)),
                None => {
                    return Err(ValidationFailure::MissingAnswer {
                        question: question.key.to_string(),
                        prompt: question.prompt.to_string(),
                    })
                }
            }
        }

        Ok(CompletedAnswers { set: self, ratings })
    }
}

/// Answers covering every question of a specific form version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedAnswers {
    set: &'static QuestionSet,
    ratings: Vec<(&'static str, Rating)>,
}

impl CompletedAnswers {
    pub fn kind(&self) -> EvaluationType {
        self.set.kind
    }

    pub fn version(&self) -> u16 {
        self.set.version
    }

    pub fn ratings(&self) -> impl Iterator<Item = &Rating> + '_ {
        self.ratings.iter().map(|(_, rating)| rating)
    }

    pub fn get(&self, key: &str) -> Option<Rating> {
        self.ratings
            .iter()
            .find(|(question, _)| *question == key)
            .map(|(_, rating)| *rating)
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }
}

impl Serialize for CompletedAnswers {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            question_set_version: u16,
            ratings: BTreeMap<&'a str, Rating>,
        }

        Wire {
            question_set_version: self.set.version,
            ratings: self.ratings.iter().copied().collect(),
        }
        .serialize(serializer)
    }
}

/// Reasons a submission is rejected before anything is persisted. Unlike access failures
/// these are reported to the evaluator verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("please answer \"{prompt}\"")]
    MissingAnswer { question: String, prompt: String },
    #[error("field '{key}' is not part of this evaluation form")]
    UnknownField { key: String },
    #[error("evaluator name is required")]
    MissingEvaluatorName,
    #[error("field '{field}' exceeds {max} characters")]
    FieldTooLong { field: String, max: usize },
}

impl ValidationFailure {
    pub fn field(&self) -> &str {
        match self {
            Self::MissingAnswer { question, .. } => question,
            Self::UnknownField { key } => key,
            Self::MissingEvaluatorName => "evaluator_name",
            Self::FieldTooLong { field, .. } => field,
        }
    }
}

//! Built-in document tasks.
//!
//! Each task pairs a static prompt template with an output mode. Templates carry the
//! [`PROMPT_PLACEHOLDER`](crate::dispatch::PROMPT_PLACEHOLDER) marker where the
//! caller's text is substituted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Resume text → structured JSON profile.
    ParseResume,
    RewriteText,
    ExpandText,
    ContractText,
    /// Assessment of a resume already rendered from JSON into text.
    EvaluateResume,
    PersonalStatement,
    RecommendationLetter,
    NameDocument,
    PersonalStatementProfile,
    ExtractName,
}

impl Task {
    pub const ALL: [Task; 10] = [
        Task::ParseResume,
        Task::RewriteText,
        Task::ExpandText,
        Task::ContractText,
        Task::EvaluateResume,
        Task::PersonalStatement,
        Task::RecommendationLetter,
        Task::NameDocument,
        Task::PersonalStatementProfile,
        Task::ExtractName,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Task::ParseResume => "parse_resume",
            Task::RewriteText => "rewrite_text",
            Task::ExpandText => "expand_text",
            Task::ContractText => "contract_text",
            Task::EvaluateResume => "evaluate_resume",
            Task::PersonalStatement => "personal_statement",
            Task::RecommendationLetter => "recommendation_letter",
            Task::NameDocument => "name_document",
            Task::PersonalStatementProfile => "personal_statement_profile",
            Task::ExtractName => "extract_name",
        }
    }

    /// Whether the model output is parsed as JSON.
    pub fn wants_json(&self) -> bool {
        matches!(
            self,
            Task::ParseResume | Task::PersonalStatement | Task::RecommendationLetter
        )
    }

    pub fn template(&self) -> &'static str {
        match self {
            Task::ParseResume => PARSE_RESUME,
            Task::RewriteText => REWRITE_TEXT,
            Task::ExpandText => EXPAND_TEXT,
            Task::ContractText => CONTRACT_TEXT,
            Task::EvaluateResume => EVALUATE_RESUME,
            Task::PersonalStatement => PERSONAL_STATEMENT,
            Task::RecommendationLetter => RECOMMENDATION_LETTER,
            Task::NameDocument => NAME_DOCUMENT,
            Task::PersonalStatementProfile => PERSONAL_STATEMENT_PROFILE,
            Task::ExtractName => EXTRACT_NAME,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Task::ALL
            .into_iter()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| format!("Unknown task: {}", s))
    }
}

const PARSE_RESUME: &str = r#"## Task
Extract the information in the user's resume into the JSON structure below. Leave a
field empty when the resume does not mention it; never invent facts.

## Output
Return exactly one JSON object, starting with '{' and ending with '}', with no
explanation and no code fences:
{
  "user_name": "",
  "contact": {"email": "", "phone": "", "location": ""},
  "education": [{"school": "", "degree": "", "major": "", "gpa": "", "start": "", "end": ""}],
  "research": [{"title": "", "role": "", "period": "", "details": ""}],
  "experience": [{"organization": "", "position": "", "period": "", "details": ""}],
  "activities": [{"name": "", "role": "", "details": ""}],
  "awards": [""],
  "skills": [""],
  "publications": [""],
  "target": {"program": "", "school": ""}
}

## Input
{{#sys.query#}}"#;

const REWRITE_TEXT: &str = r#"## Task
Rewrite the user's text so it reads more fluently and professionally while keeping its
meaning, facts and length.

## Output
Return only the rewritten text, without explanations, brackets or statistics.

## Input
{{#sys.query#}}"#;

const EXPAND_TEXT: &str = r#"## Task
Expand the user's text with richer detail and smoother transitions. Do not add facts
that the text does not support.

## Output
Return only the expanded text, without explanations, brackets or statistics.

## Input
{{#sys.query#}}"#;

const CONTRACT_TEXT: &str = r#"## Task
Condense the user's text, keeping every key fact and removing redundancy.

## Output
Return only the condensed text, without explanations, brackets or statistics.

## Input
{{#sys.query#}}"#;

const EVALUATE_RESUME: &str = r#"## Task
Evaluate the resume below as an admissions consultant: summarize its strengths, point
out weaknesses and gaps, and give concrete suggestions for improvement.

## Output
Return the evaluation as Markdown text.

## Input
{{#sys.query#}}"#;

const PERSONAL_STATEMENT: &str = r#"You are an experienced study-abroad advisor. Write a persuasive personal statement
of roughly 600-800 words for the applicant described below. Be sincere, specific and
forward-looking: cover motivation, academic and research achievements, leadership,
career plans, personal growth and core skills, and explain why this school and which
faculty fit the applicant's goals. Support every claim with concrete examples.

## Output
Return only one JSON object with exactly these keys and no code fences:
{
  "personal_statement": {
    "introduction_and_goals": "",
    "research_experience": "",
    "activities_and_leadership": "",
    "career_plan": "",
    "reasons_for_school": "",
    "conclusion": ""
  }
}

## Input
{{#sys.query#}}"#;

const RECOMMENDATION_LETTER: &str = r#"You are an experienced academic recommender. Write a formal Letter of
Recommendation in English, addressed to the Admissions Committee, based on the
information about the candidate and the recommender below.

## Input
{{#sys.query#}}

## Output
Return only one JSON object with this structure:
{
  "recommendation_letter": {
    "header": {"institution": "", "department": "", "address": "", "postal_code": "", "country": "", "phone": "", "email": ""},
    "date": "",
    "recipient": {"university": "", "address": ""},
    "salutation": "",
    "body": ["paragraph", "..."],
    "closing": {"sincerely": "", "name": "", "title": "", "department": "", "institution": "", "phone": "", "email": ""}
  }
}

Omit any section the input gives no information for. Never fabricate facts about the
candidate."#;

const NAME_DOCUMENT: &str = r#"## Task
Give the user's resume a short, descriptive title.

## Output
Return only the title, without explanations, brackets or quotes.

## Input
{{#sys.query#}}"#;

const PERSONAL_STATEMENT_PROFILE: &str = r#"You are a senior study-abroad writing mentor. From the user's experience and goals
(Markdown), distill one dense applicant profile for writing a personal statement.

Requirements:
- Output a single Markdown paragraph of about 150-250 words; no code fences, no JSON.
- Cover academic background, research or career interests, core skills and results,
  leadership highlights, motivation and goals, and fit with the target program.
- Use only information present in the input.

Input:
{{#sys.query#}}"#;

const EXTRACT_NAME: &str = r#"Task: extract the candidate's real name from the user's text (Chinese or English).

Output only the name itself: no prefix, suffix, punctuation, code fence or newline.

Priority:
1) Explicit statements such as "Name:", "My name is", "I am", "姓名：", "我叫".
2) A title line such as "Resume of X", "CV of X" or "X的简历"; take X.
3) Drop honorifics and suffixes (Mr., Ms., 同学, 先生, 女士).

Never infer a name from an email address, username, link or file name, and never
guess placeholders. If no name can be determined, return an empty string.

Input:
{{#sys.query#}}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::PROMPT_PLACEHOLDER;

    #[test]
    fn test_every_template_has_placeholder() {
        for task in Task::ALL {
            assert!(
                task.template().contains(PROMPT_PLACEHOLDER),
                "{task} template lacks the placeholder"
            );
        }
    }

    #[test]
    fn test_names_round_trip() {
        for task in Task::ALL {
            assert_eq!(task.name().parse::<Task>().unwrap(), task);
        }
        assert_eq!("Parse-Resume".parse::<Task>().unwrap(), Task::ParseResume);
        assert!("summarize".parse::<Task>().is_err());
    }

    #[test]
    fn test_json_tasks() {
        let json: Vec<Task> = Task::ALL.into_iter().filter(|t| t.wants_json()).collect();
        assert_eq!(
            json,
            vec![Task::ParseResume, Task::PersonalStatement, Task::RecommendationLetter]
        );
    }

    #[test]
    fn test_serde_name_matches_display() {
        let v = serde_json::to_value(Task::PersonalStatementProfile).unwrap();
        assert_eq!(v, Task::PersonalStatementProfile.name());
    }
}

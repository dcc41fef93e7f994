//! The check battery.
//!
//! Pattern tables are `(id, regex)` pairs compiled once when the battery is
//! built. Every pattern runs against lowercased text with curly apostrophes
//! folded to `'`.

use covenant_protocol::CompiledContext;
use covenant_types::{
    ConstitutionalAction, ContentHash, ExecutionContext, GeneratedOutput, OutputFormat, Severity,
    ValidatorId, Violation, ViolationCategory,
};
use regex::Regex;

use crate::error::VerifierError;

type Table = &'static [(&'static str, &'static str)];

/// Directive phrasing: telling the user what to do.
const DIRECTIVE: Table = &[
    ("you_should", r"\byou (really )?(should|must|ought to)\b"),
    ("you_need_to", r"\byou (need|have) to\b"),
    ("i_recommend", r"\bi (would |'d )?(recommend|suggest|advise)\b"),
    ("my_advice", r"\bmy advice\b"),
    ("make_sure", r"\bmake sure\b"),
    ("dont_worry", r"\bdon'?t worry\b"),
    ("best_thing", r"\bthe (best|right) thing (to do )?is\b"),
    ("just_do", r"(^|[.!?]\s+)just (do|go|call|quit|leave|tell)\b"),
];

const DIAGNOSIS: Table = &[
    (
        "you_have_condition",
        r"\byou (probably |clearly |might )?(have|suffer from) (clinical )?(depression|anxiety|adhd|ptsd|ocd|bipolar|bpd|an? (anxiety|panic|personality|mood|eating) disorder)\b",
    ),
    (
        "sounds_like_condition",
        r"\b(sounds|looks) like (clinical )?(depression|adhd|ptsd|bipolar|an? (anxiety|panic|personality|mood) disorder)\b",
    ),
    (
        "you_are_condition",
        r"\byou('re| are) (clinically )?(depressed|bipolar|narcissistic|a narcissist|codependent|autistic)\b",
    ),
    ("diagnose", r"\b(diagnos(e|is|ed)|symptoms of)\b"),
];

const IDENTITY: Table = &[
    (
        "you_are_a",
        r"\byou('re| are) (clearly |obviously |definitely |just |really )?an? (\w+ )?(person|introvert|extrovert|empath|people[- ]pleaser|perfectionist|failure|victim)\b",
    ),
    ("you_are_the_kind", r"\byou('re| are) the (kind|type) of\b"),
    ("true_self", r"\byour (true|real) self\b"),
    ("who_you_are", r"\bthat'?s (just )?who you are\b"),
];

const FORMAT: Table = &[
    ("heading", r"(?m)^\s*#{1,6}\s"),
    ("bullet", r"(?m)^\s*[-*•]\s"),
    ("numbered", r"(?m)^\s*\d+\.\s"),
    ("code_fence", r"```"),
];

/// Markers that an action was taken. Diagnosis and identity assignment have
/// dedicated checks and are not repeated here.
const ACTION_MARKERS: &[(ConstitutionalAction, &str)] = &[
    (
        ConstitutionalAction::GiveAdvice,
        r"\b(my advice|you should|you need to|i('d| would) (advise|suggest))\b",
    ),
    (
        ConstitutionalAction::Recommend,
        r"\bi (would |'d )?recommend\b|\bmy recommendation\b",
    ),
    (
        ConstitutionalAction::MakeDecision,
        r"\b(you should (take|choose|pick|go with|accept|quit|leave|stay)|the right (choice|decision) is|i('d| would) (choose|pick|go with))\b",
    ),
    (
        ConstitutionalAction::ExploreDepth,
        r"\blet'?s (go|dig|look) deeper\b|\blet'?s explore\b",
    ),
    (
        ConstitutionalAction::Interpret,
        r"\bwhat (this|that) (really )?means is\b|\bdeep down,? you\b|\bthe real reason\b",
    ),
    (
        ConstitutionalAction::Presence,
        r"\b(i'?m|i am) (right )?(here|with you)\b|\byou('re| are) not alone\b",
    ),
    (
        ConstitutionalAction::Ground,
        r"\bbreath|\bfeet\b|\bslow(ly| down)?\b|\bnotice\b|\bground",
    ),
    (
        ConstitutionalAction::ReferToSupport,
        r"\b(emergency|crisis|hotline|helpline|988|911|112|someone you trust)\b",
    ),
    (
        ConstitutionalAction::ReturnOwnership,
        r"\byour (decision|choice|call)\b|\b(choice|decision) is yours\b|\bup to you\b|\bwhat feels right to you\b",
    ),
    (ConstitutionalAction::AskOpenQuestion, r"\b(what|how)\b[^?]*\?"),
    (
        ConstitutionalAction::Reflect,
        r"\b(it sounds like|i hear|you'?re saying|you('re| are) noticing)\b",
    ),
    (
        ConstitutionalAction::Validate,
        r"\bmakes sense\b|\bunderstandable\b|\bit'?s (okay|ok)\b|\bthat'?s (hard|a lot)\b",
    ),
    (
        ConstitutionalAction::Summarize,
        r"\b(so far|to sum up|in short|keep coming back|what i'?m hearing)\b",
    ),
];

#[derive(Clone, Debug)]
struct Marker {
    id: &'static str,
    regex: Regex,
}

fn compile(table: Table) -> Result<Vec<Marker>, VerifierError> {
    table
        .iter()
        .map(|(id, pattern)| {
            Regex::new(pattern)
                .map(|regex| Marker { id, regex })
                .map_err(|source| VerifierError::InvalidPattern { id, source })
        })
        .collect()
}

fn matched(markers: &[Marker], text: &str) -> Vec<&'static str> {
    markers
        .iter()
        .filter(|m| m.regex.is_match(text))
        .map(|m| m.id)
        .collect()
}

/// Violations and the checks that produced them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckReport {
    pub checks_run: Vec<ValidatorId>,
    pub violations: Vec<Violation>,
}

impl CheckReport {
    pub fn has_critical(&self) -> bool {
        self.violations.iter().any(Violation::is_critical)
    }

    pub fn has_integrity_failure(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.category == ViolationCategory::Integrity)
    }

    /// Sum of the weights of the non-critical violations.
    pub fn weighted_score(&self) -> f64 {
        self.violations
            .iter()
            .filter(|v| !v.is_critical())
            .map(|v| v.severity.weight())
            .sum()
    }

    /// Most severe violation, if any.
    pub fn worst(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }

    pub(crate) fn run(&mut self, id: ValidatorId) {
        self.checks_run.push(id);
    }

    fn fail(
        &mut self,
        context: &ExecutionContext,
        id: ValidatorId,
        category: ViolationCategory,
        detail: impl Into<String>,
    ) {
        self.violations
            .push(Violation::new(id, category, severity_of(context, id), detail));
    }
}

/// Severity the context assigns to a validator; moderate if unlisted.
pub fn severity_of(context: &ExecutionContext, id: ValidatorId) -> Severity {
    context
        .validators
        .iter()
        .find(|v| v.id == id)
        .map(|v| v.severity)
        .unwrap_or(Severity::Moderate)
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2018}', '\u{2019}'], "'")
}

#[derive(Clone, Debug)]
pub struct CheckBattery {
    directive: Vec<Marker>,
    diagnosis: Vec<Marker>,
    identity: Vec<Marker>,
    format: Vec<Marker>,
    actions: Vec<(ConstitutionalAction, Regex)>,
}

impl CheckBattery {
    pub fn new() -> Result<Self, VerifierError> {
        let actions = ACTION_MARKERS
            .iter()
            .map(|(action, pattern)| {
                Regex::new(pattern)
                    .map(|r| (*action, r))
                    .map_err(|source| VerifierError::InvalidPattern {
                        id: action.as_str(),
                        source,
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            directive: compile(DIRECTIVE)?,
            diagnosis: compile(DIAGNOSIS)?,
            identity: compile(IDENTITY)?,
            format: compile(FORMAT)?,
            actions,
        })
    }

    fn action_matches(&self, action: ConstitutionalAction, text: &str) -> Option<bool> {
        self.actions
            .iter()
            .find(|(a, _)| *a == action)
            .map(|(_, r)| r.is_match(text))
    }

    /// Context hash and audit chain checks.
    pub fn check_integrity(
        &self,
        report: &mut CheckReport,
        context: &CompiledContext,
        previous_hash: &ContentHash,
        chain_head: &ContentHash,
    ) {
        report.run(ValidatorId::ContextIntegrity);
        if !context.verify_integrity() {
            report.violations.push(Violation::new(
                ValidatorId::ContextIntegrity,
                ViolationCategory::Integrity,
                Severity::Critical,
                "execution context no longer matches its sealed hash",
            ));
        }
        report.run(ValidatorId::ChainIntegrity);
        if previous_hash != chain_head {
            report.violations.push(Violation::new(
                ValidatorId::ChainIntegrity,
                ViolationCategory::Integrity,
                Severity::Critical,
                format!("previous hash {previous_hash} does not match chain head {chain_head}"),
            ));
        }
    }

    /// A generation that produced no output at all.
    pub fn check_failure(&self, report: &mut CheckReport, reason: &str) {
        report.run(ValidatorId::Emptiness);
        report.violations.push(Violation::new(
            ValidatorId::Emptiness,
            ViolationCategory::Generation,
            Severity::Critical,
            format!("generation failed: {reason}"),
        ));
    }

    /// Lexical, structural and constitutional checks on output text.
    pub fn check_output(
        &self,
        report: &mut CheckReport,
        context: &ExecutionContext,
        output: &GeneratedOutput,
    ) {
        report.run(ValidatorId::Emptiness);
        if output.text.trim().is_empty() {
            report.fail(
                context,
                ValidatorId::Emptiness,
                ViolationCategory::Generation,
                "empty output",
            );
            return;
        }
        let text = normalize(&output.text);

        report.run(ValidatorId::DirectiveLanguage);
        let hits = matched(&self.directive, &text);
        if !hits.is_empty() {
            report.fail(
                context,
                ValidatorId::DirectiveLanguage,
                ViolationCategory::Prohibition,
                format!("directive phrasing: {}", hits.join(", ")),
            );
        }

        report.run(ValidatorId::Diagnosis);
        let hits = matched(&self.diagnosis, &text);
        if !hits.is_empty() {
            report.fail(
                context,
                ValidatorId::Diagnosis,
                ViolationCategory::Prohibition,
                format!("diagnostic language: {}", hits.join(", ")),
            );
        }

        report.run(ValidatorId::IdentityAssignment);
        let hits = matched(&self.identity, &text);
        if !hits.is_empty() {
            report.fail(
                context,
                ValidatorId::IdentityAssignment,
                ViolationCategory::Prohibition,
                format!("identity assignment: {}", hits.join(", ")),
            );
        }

        report.run(ValidatorId::ForbiddenActions);
        for action in &context.constraints.forbidden {
            if self.action_matches(*action, &text) == Some(true) {
                report.fail(
                    context,
                    ValidatorId::ForbiddenActions,
                    ViolationCategory::Constitutional,
                    format!("forbidden action present: {}", action.as_str()),
                );
            }
        }

        report.run(ValidatorId::RequiredActions);
        for action in &context.constraints.required {
            if self.action_matches(*action, &text) == Some(false) {
                report.fail(
                    context,
                    ValidatorId::RequiredActions,
                    ViolationCategory::Constitutional,
                    format!("required action missing: {}", action.as_str()),
                );
            }
        }

        report.run(ValidatorId::LengthBound);
        let words = output.text.split_whitespace().count() as u32;
        if words > context.output.max_words {
            report.fail(
                context,
                ValidatorId::LengthBound,
                ViolationCategory::Structural,
                format!("{words} words exceeds limit of {}", context.output.max_words),
            );
        }

        report.run(ValidatorId::Format);
        if context.output.format == OutputFormat::PlainText {
            let hits = matched(&self.format, &output.text);
            if !hits.is_empty() {
                report.fail(
                    context,
                    ValidatorId::Format,
                    ViolationCategory::Structural,
                    format!("markup in plain-text output: {}", hits.join(", ")),
                );
            }
        }

        report.run(ValidatorId::Language);
        if !output.language.is_empty() && !same_language(&output.language, &context.output.language)
        {
            report.fail(
                context,
                ValidatorId::Language,
                ViolationCategory::Structural,
                format!(
                    "output language {} differs from {}",
                    output.language, context.output.language
                ),
            );
        }
    }
}

/// Compare primary language subtags, so `en-US` matches `en`.
fn same_language(a: &str, b: &str) -> bool {
    let primary = |s: &str| {
        s.split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    };
    primary(a) == primary(b)
}

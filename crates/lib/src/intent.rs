//! Intent classification for inbound text.
//!
//! Fixed tiers, evaluated top-down on folded text:
//! 1. control table (reset phrases, greetings, help, thanks, farewells),
//! 2. data-inquiry keywords when a dataset is attached,
//! 3. new-item lookup trigger followed by the item name,
//! 4. anything else is a general question.
//!
//! The fixed tiers are a pure function of `(text, has_dataset)`. [`IntentClassifier`] can add a
//! model-backed last tier for messages that fell through to general while a dataset is attached.

use crate::llm::ProviderChain;
use crate::text::fold;

/// Handling category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentCategory {
    General,
    AnalyzeSummary,
    NewItemLookup,
    ResetSession,
    Unrecognized,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::General => "general",
            IntentCategory::AnalyzeSummary => "analyze_summary",
            IntentCategory::NewItemLookup => "new_item_lookup",
            IntentCategory::ResetSession => "reset_session",
            IntentCategory::Unrecognized => "unrecognized",
        }
    }
}

/// Conversational messages answered from canned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmallTalk {
    Greeting,
    Help,
    Thanks,
    Farewell,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("missing parameter: {what}")]
    MissingParameter { what: &'static str },
}

/// Classified message with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// `small_talk` is set when a control rule matched; otherwise the message goes to a model.
    General { small_talk: Option<SmallTalk> },
    AnalyzeSummary,
    NewItemLookup { item: String },
    ResetSession,
    Unrecognized(ClassifyError),
}

impl Intent {
    pub fn category(&self) -> IntentCategory {
        match self {
            Intent::General { .. } => IntentCategory::General,
            Intent::AnalyzeSummary => IntentCategory::AnalyzeSummary,
            Intent::NewItemLookup { .. } => IntentCategory::NewItemLookup,
            Intent::ResetSession => IntentCategory::ResetSession,
            Intent::Unrecognized(_) => IntentCategory::Unrecognized,
        }
    }

    const fn open_question() -> Self {
        Intent::General { small_talk: None }
    }
}

/// How a control keyword is matched against folded text.
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    /// Equals one whitespace-separated word (surrounding punctuation ignored).
    Word(&'static str),
    /// Appears anywhere in the text.
    Phrase(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub enum ControlAction {
    Reset,
    SmallTalk(SmallTalk),
}

#[derive(Debug, Clone, Copy)]
pub struct ControlRule {
    pub matcher: Matcher,
    pub action: ControlAction,
}

const fn rule(matcher: Matcher, action: ControlAction) -> ControlRule {
    ControlRule { matcher, action }
}

use ControlAction::{Reset, SmallTalk as Talk};
use Matcher::{Phrase, Word};

/// Tier 1, first match wins. Entries are already folded (lowercase, Persian letters).
pub const CONTROL_RULES: &[ControlRule] = &[
    rule(Phrase("/reset"), Reset),
    rule(Phrase("/new"), Reset),
    rule(Phrase("فایل جدید"), Reset),
    rule(Phrase("شروع مجدد"), Reset),
    rule(Word("ریست"), Reset),
    rule(Phrase("new file"), Reset),
    rule(Phrase("start over"), Reset),
    rule(Word("reset"), Reset),
    rule(Phrase("/start"), Talk(SmallTalk::Help)),
    rule(Phrase("/help"), Talk(SmallTalk::Help)),
    rule(Word("راهنما"), Talk(SmallTalk::Help)),
    rule(Word("help"), Talk(SmallTalk::Help)),
    rule(Word("سلام"), Talk(SmallTalk::Greeting)),
    rule(Word("درود"), Talk(SmallTalk::Greeting)),
    rule(Word("hi"), Talk(SmallTalk::Greeting)),
    rule(Word("hello"), Talk(SmallTalk::Greeting)),
    rule(Word("hey"), Talk(SmallTalk::Greeting)),
    rule(Word("مرسی"), Talk(SmallTalk::Thanks)),
    rule(Word("ممنون"), Talk(SmallTalk::Thanks)),
    rule(Word("ممنونم"), Talk(SmallTalk::Thanks)),
    rule(Word("متشکرم"), Talk(SmallTalk::Thanks)),
    rule(Word("سپاس"), Talk(SmallTalk::Thanks)),
    rule(Word("thanks"), Talk(SmallTalk::Thanks)),
    rule(Phrase("thank you"), Talk(SmallTalk::Thanks)),
    rule(Word("خداحافظ"), Talk(SmallTalk::Farewell)),
    rule(Word("خدانگهدار"), Talk(SmallTalk::Farewell)),
    rule(Word("bye"), Talk(SmallTalk::Farewell)),
    rule(Word("goodbye"), Talk(SmallTalk::Farewell)),
];

/// Tier 2: substrings that signal a question about the attached data.
pub const DATA_KEYWORDS: &[&str] = &[
    "تحلیل",
    "آنالیز",
    "فروش",
    "کالا",
    "مشتری",
    "آمار",
    "جمع",
    "مجموع",
    "تعداد",
    "کدام",
    "کدوم",
    "چقدر",
    "analy",
    "sales",
    "item",
    "product",
    "customer",
    "statistic",
    "total",
    "count",
    "which",
    "how much",
    "how many",
];

/// Tier 3: lookup trigger; the rest of the message is the item name.
pub const LOOKUP_TRIGGERS: &[&str] = &["داروی جدید", "دارو جدید", "new drug"];

const TRIM_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ':', ';', '-', '«', '»', '"', '\'', '(', ')', '،', '؟', '؛',
];

fn words(folded: &str) -> impl Iterator<Item = &str> {
    folded
        .split_whitespace()
        .map(|w| w.trim_matches(TRIM_PUNCTUATION))
        .filter(|w| !w.is_empty())
}

fn is_boundary(c: char) -> bool {
    c.is_whitespace() || TRIM_PUNCTUATION.contains(&c)
}

/// Text after the first lookup trigger that stands as whole words (boundary or text edge
/// on both sides). "داروی جدیدی" or "new drugs" do not trigger.
fn lookup_remainder(folded: &str) -> Option<&str> {
    LOOKUP_TRIGGERS.iter().find_map(|trigger| {
        folded.match_indices(trigger).find_map(|(at, _)| {
            let rest = &folded[at + trigger.len()..];
            let before_ok = folded[..at].chars().next_back().map_or(true, is_boundary);
            let after_ok = rest.chars().next().map_or(true, is_boundary);
            (before_ok && after_ok).then_some(rest)
        })
    })
}

impl Matcher {
    fn matches(&self, folded: &str) -> bool {
        match self {
            Matcher::Word(w) => words(folded).any(|t| t == *w),
            Matcher::Phrase(p) => folded.contains(p),
        }
    }
}

/// Fixed-rule classification. Pure: the same input always yields the same intent.
pub fn classify(text: &str, has_dataset: bool) -> Intent {
    let folded = fold(text.trim());

    if let Some(rule) = CONTROL_RULES.iter().find(|r| r.matcher.matches(&folded)) {
        return match rule.action {
            ControlAction::Reset => Intent::ResetSession,
            ControlAction::SmallTalk(kind) => Intent::General {
                small_talk: Some(kind),
            },
        };
    }

    if has_dataset && DATA_KEYWORDS.iter().any(|k| folded.contains(k)) {
        return Intent::AnalyzeSummary;
    }

    if let Some(rest) = lookup_remainder(&folded) {
        let item = rest.trim_matches(is_boundary);
        return if item.is_empty() {
            Intent::Unrecognized(ClassifyError::MissingParameter { what: "item name" })
        } else {
            Intent::NewItemLookup {
                item: item.to_string(),
            }
        };
    }

    Intent::open_question()
}

const MODEL_INTENT_INSTRUCTION: &str = "You classify chat messages for a spreadsheet assistant. \
The user has uploaded a sales spreadsheet. Reply with exactly one word: \
`analyze` if the message asks about the data in the spreadsheet (sales, items, customers, totals, counts), \
otherwise `general`.";

/// Read the single-word answer of the model. Only `analyze` upgrades the intent;
/// any other text keeps the message general.
fn parse_model_intent(reply: &str) -> Intent {
    let token = reply
        .trim()
        .trim_matches(|c: char| c == '`' || c == '.' || c == '"' || c == '\'')
        .to_lowercase();
    if token == "analyze" {
        Intent::AnalyzeSummary
    } else {
        if token != "general" {
            log::debug!("intent: unexpected model classification {:?}, keeping general", token);
        }
        Intent::open_question()
    }
}

/// Fixed rules plus an optional model-backed last tier.
#[derive(Clone, Default)]
pub struct IntentClassifier {
    model: Option<ProviderChain>,
}

impl IntentClassifier {
    /// Fixed rules only.
    pub fn rules_only() -> Self {
        Self { model: None }
    }

    /// Ask `chain` about messages no rule matched while a dataset is attached.
    pub fn with_model(chain: ProviderChain) -> Self {
        Self { model: Some(chain) }
    }

    pub async fn classify(&self, text: &str, has_dataset: bool) -> Intent {
        let intent = classify(text, has_dataset);
        let Some(chain) = self.model.as_ref() else {
            return intent;
        };
        if !has_dataset || intent != Intent::open_question() {
            return intent;
        }
        match chain.ask(text, Some(MODEL_INTENT_INSTRUCTION)).await {
            Ok(reply) => parse_model_intent(&reply.text),
            Err(e) => {
                log::debug!("intent: model classification unavailable: {}", e);
                intent
            }
        }
    }
}

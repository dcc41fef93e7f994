//! Weighted pattern tables.
//!
//! Every table is a `&[PatternDef]` of `(id, regex, weight)` triples. A
//! [`PatternGroup`] compiles one table and scores text as the sum of the
//! weights of every matching pattern, saturated at 1.0.
//!
//! Patterns are matched against [`normalize`]d text: lowercased, curly
//! apostrophes folded to `'`, whitespace collapsed.

use regex::Regex;

use crate::error::PerceptionError;

/// A single weighted pattern definition.
#[derive(Clone, Copy, Debug)]
pub struct PatternDef {
    pub id: &'static str,
    pub pattern: &'static str,
    pub weight: f64,
}

const fn p(id: &'static str, pattern: &'static str, weight: f64) -> PatternDef {
    PatternDef {
        id,
        pattern,
        weight,
    }
}

/// A compiled weighted pattern.
#[derive(Clone, Debug)]
pub struct WeightedPattern {
    pub id: &'static str,
    pub weight: f64,
    regex: Regex,
}

impl WeightedPattern {
    pub fn compile(def: &PatternDef) -> Result<Self, PerceptionError> {
        if def.weight.is_nan() || def.weight <= 0.0 {
            return Err(PerceptionError::InvalidWeight {
                id: def.id.to_string(),
                weight: def.weight,
            });
        }
        let regex = Regex::new(def.pattern).map_err(|source| PerceptionError::InvalidPattern {
            id: def.id.to_string(),
            source,
        })?;
        Ok(Self {
            id: def.id,
            weight: def.weight,
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Result of scoring one group against a text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupScore {
    /// Sum of matched weights, saturated at 1.0
    pub score: f64,
    /// Unsaturated sum
    pub raw: f64,
    /// Ids of matched patterns, in table order
    pub matched: Vec<&'static str>,
}

impl GroupScore {
    pub fn fired(&self) -> bool {
        !self.matched.is_empty()
    }
}

/// A compiled pattern table.
#[derive(Clone, Debug, Default)]
pub struct PatternGroup {
    patterns: Vec<WeightedPattern>,
}

impl PatternGroup {
    pub fn compile(defs: &[PatternDef]) -> Result<Self, PerceptionError> {
        let patterns = defs
            .iter()
            .map(WeightedPattern::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Score normalized text.
    pub fn score(&self, text: &str) -> GroupScore {
        let mut result = GroupScore::default();
        for pattern in &self.patterns {
            if pattern.is_match(text) {
                result.raw += pattern.weight;
                result.matched.push(pattern.id);
            }
        }
        result.score = result.raw.min(1.0);
        result
    }
}

/// Lowercase, fold curly quotes and collapse whitespace.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{02BC}' | '`' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when the text carries nothing a pattern could match.
pub fn is_unreadable(text: &str) -> bool {
    !text.chars().any(char::is_alphanumeric)
}

// =========================================================================
// Classifier tables
// =========================================================================

/// D1: acute risk to life. Any single match is sufficient.
pub const D1_ACUTE_RISK: &[PatternDef] = &[
    p("d1.kill_myself", r"\bkill(ing)? my ?self\b", 1.0),
    p("d1.suicide", r"\bsuicid(e|al)\b", 1.0),
    p("d1.end_my_life", r"\bend (my life|it all|things)\b", 1.0),
    p("d1.want_to_die", r"\b(want|wanna|going) (to )?die\b", 1.0),
    p("d1.not_alive", r"\bdon'?t want to (live|be alive|wake up)\b", 1.0),
    p("d1.self_harm", r"\b(hurt|harm|cut(ting)?) my ?self\b|\bself[- ]harm", 1.0),
    p("d1.overdose", r"\boverdos(e|ing)\b|\btake all (my|the) pills\b", 1.0),
    p("d1.better_off", r"\bbetter off (dead|without me)\b", 1.0),
    p("d1.no_reason", r"\bno reason to (live|go on)\b", 1.0),
];

/// D2: delegation of agency to the system.
pub const D2_DELEGATION: &[PatternDef] = &[
    p("d2.decide_for_me", r"\b(decide|choose|pick) for me\b", 0.7),
    p("d2.you_decide", r"\byou (decide|choose|pick)\b", 0.6),
    p("d2.make_it_for_me", r"\bmake (the|this|my) (decision|choice) for me\b", 0.8),
    p("d2.just_tell_me", r"\bjust tell me what to do\b", 0.6),
    p("d2.whatever_you_say", r"\bi('ll| will) do whatever you say\b", 0.8),
    p("d2.handle_it", r"\b(handle|do) (it|this|everything) for me\b", 0.5),
    p("d2.take_over", r"\byou take over\b", 0.5),
];

/// D3: normative decision request.
pub const D3_DECISION_REQUEST: &[PatternDef] = &[
    p("d3.what_should_i_do", r"\bwhat should i do\b", 0.6),
    p("d3.should_i", r"\bshould i\b", 0.5),
    p("d3.do_you_think_i_should", r"\bdo you think i should\b", 0.3),
    p("d3.which_should_i", r"\bwhich (one|option|job|path) should i\b", 0.3),
    p("d3.right_or_wrong", r"\bis it (right|wrong|ok|okay) (to|if)\b", 0.5),
    p("d3.what_would_you_do", r"\bwhat would you do\b", 0.5),
    p("d3.better_to", r"\bis it better (to|if)\b", 0.4),
];

/// D4: identity assignment.
pub const D4_IDENTITY: &[PatternDef] = &[
    p("d4.tell_me_who", r"\btell me who i (am|really am)\b", 0.8),
    p("d4.who_am_i", r"\bwho am i\b", 0.5),
    p(
        "d4.am_i_bad",
        r"\bam i (a )?(bad|good|terrible|horrible|awful|broken|toxic|selfish|narcissist|failure|monster)\b",
        0.7,
    ),
    p("d4.kind_of_person", r"\bwhat (kind|sort) of (a )?person am i\b", 0.7),
    p("d4.wrong_with_me", r"\bwhat('s| is) wrong with me\b", 0.6),
    p("d4.am_i_normal", r"\bam i (normal|crazy|insane)\b", 0.6),
];

/// Normative framing: the request is posed in the abstract.
pub const NORMATIVE_FRAMING: &[PatternDef] = &[
    p("cs.hypothetically", r"\bhypothetical(ly)?\b", 1.0),
    p("cs.in_general", r"\b(in general|generally speaking|in theory)\b", 1.0),
    p("cs.for_a_story", r"\bfor (a|my) (story|novel|book|essay|script|class)\b", 1.0),
    p("cs.for_a_friend", r"\basking for a friend\b", 1.0),
    p("cs.people_in_general", r"\bwhat should (people|someone|one) do\b", 1.0),
];

/// Minimizing or adversarial phrasing.
pub const ADVERSARIAL_PHRASING: &[PatternDef] = &[
    p("cs.jk", r"\bjk\b|\bjust (kidding|joking)\b", 1.0),
    p("cs.lol", r"\b(lol|lmao|haha+)\b", 1.0),
    p("cs.not_serious", r"\bnot (serious|being serious|really)\b", 1.0),
    p("cs.ignore_rules", r"\bignore (your|the|all) (rules|instructions)\b", 1.0),
    p("cs.pretend", r"\bpretend (you|to be)\b", 1.0),
];

// =========================================================================
// Detector tables: vertical bands
// =========================================================================

pub const SOMATIC: &[PatternDef] = &[
    p("v.somatic.breath", r"\b(can'?t|cannot|couldn'?t) breathe\b|\bshort of breath\b", 0.45),
    p("v.somatic.heart", r"\bheart (is )?(pounding|racing|races|beating)\b", 0.35),
    p("v.somatic.chest", r"\bchest (pain|hurts|is tight|tightness)\b", 0.4),
    p("v.somatic.panic", r"\bpanic( attack)?\b", 0.35),
    p("v.somatic.scared", r"\b(scared|terrified|afraid)\b", 0.2),
    p("v.somatic.dizzy", r"\b(dizzy|faint|shaking|trembling|nause(a|ous))\b", 0.3),
    p("v.somatic.pain", r"\b(pain|headache|ache|hurts)\b", 0.2),
    p("v.somatic.sleep", r"\b(sleep|insomnia|exhausted|tired)\b", 0.2),
    p("v.somatic.body", r"\b(body|stomach|breath(ing)?)\b", 0.15),
];

pub const FUNCTIONAL: &[PatternDef] = &[
    p("v.functional.work", r"\b(work|job|boss|office|career|shift)\b", 0.3),
    p("v.functional.task", r"\b(deadline|project|meeting|email|schedule|task|plan)\b", 0.25),
    p("v.functional.money", r"\b(money|rent|bill|bills|budget|pay|salary|debt)\b", 0.25),
    p("v.functional.howto", r"\bhow (do|can|to) (i )?\w+", 0.2),
    p("v.functional.tech", r"\b(code|computer|phone|app|install|fix|error)\b", 0.25),
];

pub const RELATIONAL: &[PatternDef] = &[
    p(
        "v.relational.partner",
        r"\b(partner|wife|husband|boyfriend|girlfriend|spouse|ex)\b",
        0.3,
    ),
    p("v.relational.family", r"\b(mother|mom|father|dad|parents?|family|sister|brother|kids?)\b", 0.3),
    p("v.relational.friend", r"\b(friends?|colleagues?|people)\b", 0.2),
    p("v.relational.relationship", r"\b(relationship|breakup|broke up|divorce|dating)\b", 0.35),
    p("v.relational.love", r"\b(love|miss|crush)\b|\bthink(ing)? (of|about) you\b", 0.3),
    p("v.relational.lonely", r"\b(lonely|alone|rejected|abandoned)\b", 0.3),
];

pub const EXISTENTIAL: &[PatternDef] = &[
    p("v.existential.meaning", r"\b(meaning|meaningless|purpose|pointless)\b", 0.35),
    p("v.existential.point", r"\b(point of (it|life|anything)|why am i here|what'?s the point)\b", 0.4),
    p("v.existential.death", r"\b(death|dying|mortality|die)\b", 0.35),
    p("v.existential.nothing_matters", r"\bnothing (matters|makes sense)\b", 0.4),
    p("v.existential.who_am_i", r"\bwho (am i|i am)\b", 0.3),
    p("v.existential.worth", r"\b(worthless|empty inside|lost myself)\b", 0.35),
    p("v.existential.freedom", r"\b(freedom|choice|responsibility|authentic)\b", 0.15),
];

pub const TRANSCENDENT: &[PatternDef] = &[
    p("v.transcendent.god", r"\b(god|divine|sacred|holy)\b", 0.4),
    p("v.transcendent.soul", r"\b(soul|spirit|spiritual)\b", 0.35),
    p("v.transcendent.faith", r"\b(faith|pray(er|ing)?|worship)\b", 0.3),
    p("v.transcendent.cosmos", r"\b(universe|cosmos|eternity|infinite|afterlife)\b", 0.3),
    p("v.transcendent.oneness", r"\b(oneness|enlighten(ment|ed)|transcend(ence)?)\b", 0.4),
];

// =========================================================================
// Detector tables: horizontal domains
// =========================================================================

pub const H_SURVIVAL: &[PatternDef] = &[
    p("h.survival.food", r"\b(food|hungry|starving|homeless|eviction|evicted)\b", 0.4),
    p("h.survival.danger", r"\b(danger|dangerous|threat(ened)?|attack(ed)?)\b", 0.35),
    p("h.survival.alive", r"\b(survive|alive|die|dying)\b", 0.35),
];

pub const H_SAFETY: &[PatternDef] = &[
    p("h.safety.unsafe", r"\b(unsafe|not safe|scared|afraid|terrified)\b", 0.35),
    p("h.safety.emergency", r"\b(emergency|ambulance|911|112|hospital)\b", 0.45),
    p("h.safety.abuse", r"\b(abuse|abusive|hit me|violence|violent)\b", 0.45),
];

pub const H_BODY: &[PatternDef] = &[
    p("h.body.breath", r"\b(breathe|breathing|breath)\b", 0.35),
    p("h.body.heart", r"\b(heart|chest|pulse)\b", 0.3),
    p("h.body.sick", r"\b(sick|ill|pain|headache|dizzy|nause(a|ous)|body)\b", 0.3),
    p("h.body.sleep", r"\b(sleep|tired|exhausted|insomnia)\b", 0.3),
];

pub const H_EMOTION: &[PatternDef] = &[
    p("h.emotion.fear", r"\b(scared|afraid|anxious|anxiety|panic|fear|terrified)\b", 0.35),
    p("h.emotion.sad", r"\b(sad|depressed|crying|cry|grief|hopeless|down)\b", 0.35),
    p("h.emotion.anger", r"\b(angry|furious|mad|frustrated|resent)\b", 0.35),
    p("h.emotion.feel", r"\bi (feel|felt|am feeling)\b", 0.25),
    p("h.emotion.overwhelmed", r"\b(overwhelmed|stressed|stress)\b", 0.3),
];

pub const H_COGNITION: &[PatternDef] = &[
    p("h.cognition.think", r"\b(think|thinking|thought|analy[sz]e|logic|reason)\b", 0.3),
    p("h.cognition.understand", r"\b(understand|confused|figure out|makes sense)\b", 0.3),
    p("h.cognition.learn", r"\b(learn|explain|study|idea)\b", 0.25),
];

pub const H_MEANING: &[PatternDef] = &[
    p("h.meaning.meaning", r"\b(meaning|meaningful|meaningless|purpose|point)\b", 0.4),
    p("h.meaning.values", r"\b(values|matters|matter|important to me)\b", 0.3),
    p("h.meaning.why", r"\bwhy (am i|do i|does it)\b", 0.25),
];

pub const H_IDENTITY: &[PatternDef] = &[
    p("h.identity.who", r"\bwho (am i|i am|i really am)\b", 0.45),
    p("h.identity.person", r"\b(kind|sort) of person\b|\bam i (a )?\w+ person\b", 0.4),
    p("h.identity.self", r"\b(myself|self|identity|true self)\b", 0.25),
];

pub const H_TEMPORAL: &[PatternDef] = &[
    p("h.temporal.future", r"\b(future|tomorrow|next (week|month|year)|someday)\b", 0.3),
    p("h.temporal.past", r"\b(past|used to|years ago|childhood|regret)\b", 0.3),
    p("h.temporal.time", r"\b(time|running out|too late|deadline)\b", 0.25),
];

pub const H_ATTACHMENT: &[PatternDef] = &[
    p("h.attachment.love", r"\b(love|miss|crush|kiss)\b|\bthink(ing)? (of|about) you\b", 0.4),
    p("h.attachment.partner", r"\b(partner|wife|husband|boyfriend|girlfriend|spouse)\b", 0.35),
    p("h.attachment.loss", r"\b(breakup|broke up|left me|abandoned|divorce)\b", 0.4),
];

pub const H_BELONGING: &[PatternDef] = &[
    p("h.belonging.alone", r"\b(lonely|alone|isolated|left out|outsider)\b", 0.4),
    p("h.belonging.group", r"\b(friends|family|team|community|group)\b", 0.3),
    p("h.belonging.fit", r"\b(fit in|belong|accepted|rejected)\b", 0.4),
];

pub const H_WORK: &[PatternDef] = &[
    p("h.work.job", r"\b(work|job|boss|office|career|colleagues?)\b", 0.4),
    p("h.work.tasks", r"\b(deadline|project|meeting|promotion|fired|interview)\b", 0.35),
    p("h.work.money", r"\b(salary|money|pay|rent|bills?)\b", 0.25),
];

pub const H_DECISION: &[PatternDef] = &[
    p("h.decision.should", r"\bshould i\b|\bwhat should\b", 0.4),
    p("h.decision.choose", r"\b(decide|decision|choose|choice|option|options)\b", 0.4),
    p("h.decision.or", r"\bor (not|should|stay|leave|quit)\b", 0.25),
];

// =========================================================================
// Emergency evidence
// =========================================================================

/// Somatic-panic markers. Ids listed in [`EMERGENCY_INDEPENDENT`] are
/// evidence that a romantic or colloquial reading cannot explain.
pub const EMERGENCY_POSITIVE: &[PatternDef] = &[
    p("em.cant_breathe", r"\b(can'?t|cannot|couldn'?t) breathe\b", 0.4),
    p("em.heart", r"\bheart (is )?(pounding|racing|races|beating (so )?fast)\b", 0.3),
    p("em.chest_pain", r"\bchest (pain|hurts|is tight)\b", 0.4),
    p("em.panic_attack", r"\b(panic attack|panicking)\b", 0.4),
    p("em.scared", r"\b(scared|terrified)\b", 0.2),
    p("em.pass_out", r"\b(pass(ing)? out|going to faint|blacking out)\b", 0.4),
    p("em.help_now", r"\b(help me|call (an )?ambulance|call 911|need help now)\b", 0.3),
    p("em.dying", r"\b(i'?m dying|think i'?m dying|heart attack)\b", 0.4),
];

pub const EMERGENCY_INDEPENDENT: &[&str] =
    &["em.chest_pain", "em.pass_out", "em.help_now", "em.dying"];

/// Romantic and colloquial counter-evidence.
pub const EMERGENCY_COUNTER: &[PatternDef] = &[
    p("em.counter.think_of_you", r"\bthink(ing)? (of|about) (you|him|her)\b", 0.5),
    p("em.counter.love", r"\b(love|crush|kiss|kissed|date|in love)\b", 0.4),
    p("em.counter.see_you", r"\bwhen (i|we) see (you|him|her)\b", 0.4),
    p("em.counter.laughing", r"\b(laughing|laughed|so funny|hilarious)\b", 0.4),
    p("em.counter.lol", r"\b(lol|lmao|haha+)\b", 0.4),
    p("em.counter.excited", r"\b(so excited|can'?t wait)\b", 0.3),
];

// =========================================================================
// Field-state tables
// =========================================================================

pub const POSITIVE_VALENCE: &[PatternDef] = &[
    p("val.pos.happy", r"\b(happy|glad|grateful|excited|joy|relieved|proud)\b", 0.5),
    p("val.pos.good", r"\b(good|great|better|wonderful|love)\b", 0.3),
];

pub const NEGATIVE_VALENCE: &[PatternDef] = &[
    p("val.neg.sad", r"\b(sad|depressed|hopeless|miserable|lonely|grief)\b", 0.5),
    p("val.neg.fear", r"\b(scared|afraid|anxious|terrified|panic)\b", 0.5),
    p("val.neg.anger", r"\b(angry|furious|hate|frustrated)\b", 0.5),
    p("val.neg.bad", r"\b(bad|awful|terrible|worse|worst|can'?t)\b", 0.3),
];

/// First-person markers that the user is deciding for themselves.
pub const DECISION_MARKERS: &[PatternDef] = &[
    p("dm.decided", r"\bi('ve)? (decided|chose|chosen|picked)\b", 1.0),
    p("dm.will", r"\bi('ll| will| am going to|'m going to)\b", 1.0),
    p("dm.my_choice", r"\bmy (choice|decision|call)\b", 1.0),
    p("dm.i_want", r"\bi (want|prefer|need) to\b", 1.0),
];

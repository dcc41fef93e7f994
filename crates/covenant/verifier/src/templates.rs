//! Built-in fallback text.

use covenant_types::{ConstitutionalAction, FallbackLevel, Primitive, ProtocolSelection};

/// Appended whenever the selection requires referring to support.
const SUPPORT_LINE: &str =
    "If you might be in danger, please contact your local emergency number or a crisis line now.";

/// Renders the text released at a template level.
pub trait FallbackRenderer: Send + Sync {
    /// Text for `level`, or `None` when the renderer has nothing for the
    /// level or language. Generator levels always return `None`.
    fn render(
        &self,
        level: FallbackLevel,
        selection: &ProtocolSelection,
        language: &str,
    ) -> Option<String>;
}

/// English templates.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinTemplates;

impl BuiltinTemplates {
    fn medium(primitive: Primitive) -> &'static str {
        match primitive {
            Primitive::Ground => {
                "Let's slow down together. Feel your feet on the floor and take one slow breath. I'm here with you."
            }
            Primitive::Validate => {
                "What you're feeling makes sense. I'm here with you. What feels most present right now?"
            }
            Primitive::Reflect => {
                "It sounds like this touches something important for you. What stands out most as you notice it? Where you go from here is your call."
            }
            Primitive::Open => "I'm here with you. What would you like to look at first?",
            Primitive::Crystallize => {
                "It sounds like we keep coming back to the same place. What feels like the core of it for you?"
            }
            Primitive::Map => {
                "There are a few paths here, and the choice is yours. What matters most to you as you weigh them?"
            }
            Primitive::ReturnAgency => {
                "This is your decision to make, and you know your situation best. What feels right to you?"
            }
            Primitive::Inform => "I can help with that. What part would you like to start with?",
        }
    }
}

impl FallbackRenderer for BuiltinTemplates {
    fn render(
        &self,
        level: FallbackLevel,
        selection: &ProtocolSelection,
        language: &str,
    ) -> Option<String> {
        if !language.to_ascii_lowercase().starts_with("en") {
            return None;
        }
        let base = match level {
            FallbackLevel::Initial | FallbackLevel::Regenerate => return None,
            FallbackLevel::Medium => Self::medium(selection.primitive),
            FallbackLevel::Surface => "I hear you. I'm here with you.",
            FallbackLevel::Presence => "I'm here with you.",
            FallbackLevel::Stop => "I'm going to pause here for now.",
        };
        let mut text = base.to_string();
        if level != FallbackLevel::Stop && selection.requires(ConstitutionalAction::ReferToSupport)
        {
            text.push(' ');
            text.push_str(SUPPORT_LINE);
        }
        Some(text)
    }
}

//! Protocol selector.
//!
//! [`select`] is a pure function of `(field, governor result, knobs)`. It
//! takes the governor's atmosphere and mode as given, picks a primitive,
//! and clips the depth by both the governor ceiling and the meta-kernel
//! ceiling. Nothing here reads a clock, a random source or the network.

use std::collections::BTreeSet;

use covenant_types::{
    Arousal, Atmosphere, ConstitutionalAction, Depth, FieldState, Goal, GovernorResult,
    HorizontalDomain, KnobSettings, Mode, Primitive, ProtocolSelection, ResponseLength, SafetyFlag,
    Tone,
};

/// Domains at or above this salience count as active for dimension gating.
pub const ACTIVE_SALIENCE: f64 = 0.3;

/// Loop count at which a contracting turn crystallizes instead of mapping.
const CRYSTALLIZE_LOOPS: u32 = 3;

/// Depth the field itself asks for, before any ceiling is applied.
pub fn requested_depth(field: &FieldState) -> Depth {
    if field.arousal == Arousal::High {
        return Depth::Surface;
    }
    match field.goal {
        Goal::Explore => Depth::Deep,
        Goal::Process | Goal::Decide | Goal::Connect | Goal::Inform | Goal::Delegate => {
            Depth::Medium
        }
        Goal::Regulate | Goal::Unclear => Depth::Surface,
    }
}

/// Active domains of the field, by [`ACTIVE_SALIENCE`].
pub fn active_domains(field: &FieldState) -> Vec<HorizontalDomain> {
    field
        .domains
        .iter()
        .filter(|d| d.salience >= ACTIVE_SALIENCE)
        .map(|d| d.domain)
        .collect()
}

/// Select the bounded protocol for one turn.
pub fn select(
    field: &FieldState,
    governor: &GovernorResult,
    knobs: &KnobSettings,
) -> ProtocolSelection {
    let effect = &governor.effect;
    let primitive = effect
        .primitive_override
        .unwrap_or_else(|| primitive_for(effect.atmosphere, effect.mode, field));

    let requested = requested_depth(field);
    let mut depth = requested
        .min(effect.depth_ceiling)
        .min(knobs.max_depth_allowed);

    let mut forbidden: BTreeSet<ConstitutionalAction> = effect.forbidden.clone();

    let active = active_domains(field);
    let gated = !active.is_empty()
        && !active.iter().any(|d| knobs.enabled_dimensions.contains(d));
    if gated {
        depth = Depth::Surface;
        forbidden.insert(ConstitutionalAction::ExploreDepth);
    }

    let required: Vec<ConstitutionalAction> = effect
        .required
        .iter()
        .filter(|a| !forbidden.contains(a))
        .copied()
        .collect();
    let forbidden: Vec<ConstitutionalAction> = forbidden.into_iter().collect();

    let pacing = effect.pacing.most_conservative(knobs.pacing);
    let confidence = (1.0 - 0.5 * field.uncertainty).clamp(0.0, 1.0);

    let reasoning = format!(
        "atmosphere={} mode={} primitive={} depth={} (requested={} governor={} kernel={}{}) rules=[{}]",
        effect.atmosphere.as_str(),
        effect.mode.as_str(),
        primitive.as_str(),
        depth.as_str(),
        requested.as_str(),
        effect.depth_ceiling.as_str(),
        knobs.max_depth_allowed.as_str(),
        if gated { " dimensions-gated" } else { "" },
        governor.rules_applied.join(","),
    );

    ProtocolSelection {
        atmosphere: effect.atmosphere,
        mode: effect.mode,
        primitive,
        depth,
        length: ResponseLength::for_depth(depth),
        pacing,
        tone: tone_for(effect.atmosphere),
        forbidden,
        required,
        confidence,
        reasoning,
    }
}

fn primitive_for(atmosphere: Atmosphere, mode: Mode, field: &FieldState) -> Primitive {
    match atmosphere {
        Atmosphere::Emergency => Primitive::Ground,
        Atmosphere::Decision => {
            if field.has(SafetyFlag::DelegationAttempt) {
                Primitive::ReturnAgency
            } else {
                Primitive::Map
            }
        }
        Atmosphere::Existential => Primitive::Reflect,
        Atmosphere::Operational => Primitive::Inform,
        Atmosphere::HumanField => {
            if mode == Mode::Regulate {
                return Primitive::Ground;
            }
            if mode == Mode::Contract && field.loop_count >= CRYSTALLIZE_LOOPS {
                return Primitive::Crystallize;
            }
            match field.goal {
                Goal::Regulate => Primitive::Ground,
                Goal::Process | Goal::Connect => Primitive::Validate,
                Goal::Decide => Primitive::Map,
                Goal::Delegate => Primitive::ReturnAgency,
                Goal::Inform => Primitive::Inform,
                Goal::Explore | Goal::Unclear => Primitive::Open,
            }
        }
    }
}

fn tone_for(atmosphere: Atmosphere) -> Tone {
    match atmosphere {
        Atmosphere::Emergency => Tone::new(5, 2),
        Atmosphere::Existential => Tone::new(4, 2),
        Atmosphere::HumanField => Tone::new(4, 3),
        Atmosphere::Decision => Tone::new(3, 3),
        Atmosphere::Operational => Tone::new(3, 4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_types::{DomainActivation, MergedEffect, Pacing};

    fn field(goal: Goal) -> FieldState {
        let mut f = FieldState::minimal(Some("en".into()));
        f.safety_flags.clear();
        f.goal = goal;
        f.uncertainty = 0.2;
        f
    }

    fn governor(effect: MergedEffect) -> GovernorResult {
        GovernorResult {
            rules_applied: vec!["BASE-HUMAN-FIELD".into()],
            effect,
        }
    }

    #[test]
    fn emergency_grounds_at_surface() {
        let mut f = field(Goal::Regulate);
        f.arousal = Arousal::High;
        let effect = MergedEffect {
            atmosphere: Atmosphere::Emergency,
            mode: Mode::Regulate,
            depth_ceiling: Depth::Surface,
            primitive_override: Some(Primitive::Ground),
            pacing: Pacing::Slow,
            forbidden: [ConstitutionalAction::GiveAdvice].into(),
            required: [ConstitutionalAction::Ground, ConstitutionalAction::Presence].into(),
            ..MergedEffect::default()
        };
        let s = select(&f, &governor(effect), &KnobSettings::default());
        assert_eq!(s.primitive, Primitive::Ground);
        assert_eq!(s.depth, Depth::Surface);
        assert_eq!(s.length, ResponseLength::Minimal);
        assert_eq!(s.pacing, Pacing::Slow);
        assert!(s.forbids(ConstitutionalAction::GiveAdvice));
        assert!(s.requires(ConstitutionalAction::Presence));
        assert_eq!(s.tone, Tone::new(5, 2));
    }

    #[test]
    fn depth_is_clipped_by_both_ceilings() {
        let f = field(Goal::Explore);
        let effect = MergedEffect {
            depth_ceiling: Depth::Deep,
            ..MergedEffect::default()
        };
        let knobs = KnobSettings::default();
        assert_eq!(knobs.max_depth_allowed, Depth::Medium);
        let s = select(&f, &governor(effect.clone()), &knobs);
        assert_eq!(s.depth, Depth::Medium);

        let deep_knobs = KnobSettings {
            max_depth_allowed: Depth::Deep,
            ..KnobSettings::default()
        };
        let s = select(&f, &governor(effect), &deep_knobs);
        assert_eq!(s.depth, Depth::Deep);
        assert_eq!(s.primitive, Primitive::Open);
    }

    #[test]
    fn disabled_dimensions_gate_depth() {
        let mut f = field(Goal::Process);
        f.domains = vec![DomainActivation {
            domain: HorizontalDomain::Work,
            salience: 0.8,
            confidence: None,
            evidence: vec![],
        }];
        let knobs = KnobSettings {
            enabled_dimensions: [HorizontalDomain::Meaning].into(),
            ..KnobSettings::default()
        };
        let s = select(&f, &governor(MergedEffect::default()), &knobs);
        assert_eq!(s.depth, Depth::Surface);
        assert!(s.forbids(ConstitutionalAction::ExploreDepth));
        assert!(s.reasoning.contains("dimensions-gated"));
    }

    #[test]
    fn governor_forbidden_beats_required() {
        let f = field(Goal::Decide);
        let effect = MergedEffect {
            atmosphere: Atmosphere::Decision,
            forbidden: [ConstitutionalAction::MakeDecision].into(),
            required: [ConstitutionalAction::ReturnOwnership].into(),
            ..MergedEffect::default()
        };
        let s = select(&f, &governor(effect), &KnobSettings::default());
        assert_eq!(s.primitive, Primitive::Map);
        assert_eq!(s.required, vec![ConstitutionalAction::ReturnOwnership]);
        assert_eq!(s.forbidden, vec![ConstitutionalAction::MakeDecision]);
    }

    #[test]
    fn delegation_returns_agency() {
        let mut f = field(Goal::Delegate);
        f.safety_flags.insert(SafetyFlag::DelegationAttempt);
        let effect = MergedEffect {
            atmosphere: Atmosphere::Decision,
            mode: Mode::Contract,
            ..MergedEffect::default()
        };
        let s = select(&f, &governor(effect), &KnobSettings::default());
        assert_eq!(s.primitive, Primitive::ReturnAgency);
    }

    #[test]
    fn looping_contract_crystallizes() {
        let mut f = field(Goal::Process);
        f.loop_count = 4;
        let effect = MergedEffect {
            mode: Mode::Contract,
            ..MergedEffect::default()
        };
        let s = select(&f, &governor(effect), &KnobSettings::default());
        assert_eq!(s.primitive, Primitive::Crystallize);
    }

    #[test]
    fn confidence_falls_with_uncertainty() {
        let mut f = field(Goal::Unclear);
        f.uncertainty = 1.0;
        let s = select(&f, &governor(MergedEffect::default()), &KnobSettings::default());
        assert_eq!(s.confidence, 0.5);
        assert_eq!(s.depth, Depth::Surface);
    }
}

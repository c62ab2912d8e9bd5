//! Weighted-random variant selection.
//!
//! Implemented as a pure function over an injected draw so assignment can
//! be unit-tested deterministically.

use rand::Rng;

use cadence_core::types::ExperimentVariant;

/// Pick a variant from the cumulative weight distribution over [0, 100).
///
/// `draw` must be in `[0.0, 100.0)`. When the weights sum to less than
/// 100 and the draw lands past the covered range, the last variant wins,
/// so every draw resolves to some variant.
pub fn pick_variant(variants: &[ExperimentVariant], draw: f64) -> Option<&ExperimentVariant> {
    if variants.is_empty() {
        return None;
    }
    let mut cumulative = 0.0f64;
    for variant in variants {
        cumulative += f64::from(variant.weight);
        if draw < cumulative {
            return Some(variant);
        }
    }
    variants.last()
}

/// Draw uniformly over [0, 100) and pick.
pub fn assign_variant<'a, R: Rng>(
    variants: &'a [ExperimentVariant],
    rng: &mut R,
) -> Option<&'a ExperimentVariant> {
    if variants.is_empty() {
        return None;
    }
    let draw: f64 = rng.gen_range(0.0..100.0);
    pick_variant(variants, draw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    use cadence_core::types::VariantKind;

    fn variant(kind: VariantKind, weight: u32, is_control: bool) -> ExperimentVariant {
        ExperimentVariant {
            id: Uuid::new_v4(),
            test_id: Uuid::new_v4(),
            kind,
            name: format!("{kind:?}"),
            weight,
            is_control,
            overrides: Vec::new(),
        }
    }

    #[test]
    fn test_pick_respects_boundaries() {
        let variants = vec![
            variant(VariantKind::Control, 50, true),
            variant(VariantKind::VariantA, 30, false),
            variant(VariantKind::VariantB, 20, false),
        ];

        assert_eq!(pick_variant(&variants, 0.0).unwrap().id, variants[0].id);
        assert_eq!(pick_variant(&variants, 49.9).unwrap().id, variants[0].id);
        assert_eq!(pick_variant(&variants, 50.0).unwrap().id, variants[1].id);
        assert_eq!(pick_variant(&variants, 79.9).unwrap().id, variants[1].id);
        assert_eq!(pick_variant(&variants, 80.0).unwrap().id, variants[2].id);
        assert_eq!(pick_variant(&variants, 99.9).unwrap().id, variants[2].id);
    }

    #[test]
    fn test_underweighted_tail_goes_to_last() {
        // Weights sum to 60; draws past that resolve to the last variant.
        let variants = vec![
            variant(VariantKind::Control, 30, true),
            variant(VariantKind::VariantA, 30, false),
        ];
        assert_eq!(pick_variant(&variants, 75.0).unwrap().id, variants[1].id);
    }

    #[test]
    fn test_empty_and_deterministic_rng() {
        assert!(pick_variant(&[], 10.0).is_none());

        let variants = vec![
            variant(VariantKind::Control, 50, true),
            variant(VariantKind::VariantA, 50, false),
        ];
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = assign_variant(&variants, &mut rng_a).unwrap().id;
        let b = assign_variant(&variants, &mut rng_b).unwrap().id;
        assert_eq!(a, b);
    }

    #[test]
    fn test_distribution_roughly_matches_weights() {
        let variants = vec![
            variant(VariantKind::Control, 80, true),
            variant(VariantKind::VariantA, 20, false),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let mut control_hits = 0u32;
        for _ in 0..1000 {
            if assign_variant(&variants, &mut rng).unwrap().is_control {
                control_hits += 1;
            }
        }
        // 80% +- a generous margin for 1000 draws.
        assert!((700..=900).contains(&control_hits), "{control_hits}");
    }
}

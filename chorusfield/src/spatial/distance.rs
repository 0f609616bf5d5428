//! Distance attenuation curves for each spatializer tier.

use crate::config::{AudioProperties, DistanceAlgorithm};
use crate::math::project;

/// Inverse distance model used by the directional panners.
///
/// `ref / (ref + rolloff * (max(d, ref) - ref))`
pub fn inverse_distance_gain(distance: f32, reference: f32, rolloff: f32) -> f32 {
    let d = distance.max(reference);
    let denominator = reference + rolloff * (d - reference);
    if denominator <= f32::EPSILON {
        return 1.0;
    }
    (reference / denominator).clamp(0.0, 1.0)
}

/// Gain-only tier curve: full below `min_distance`, silent beyond `max_distance`.
///
/// The logarithmic algorithm takes the square root of the linear curve, which
/// keeps mid-range voices louder.
pub fn gain_only_curve(distance: f32, properties: &AudioProperties) -> f32 {
    let linear = 1.0
        - project(distance, properties.min_distance, properties.max_distance).clamp(0.0, 1.0);
    match properties.algorithm {
        DistanceAlgorithm::Inverse => linear,
        DistanceAlgorithm::Logarithmic => linear.sqrt(),
    }
}

/// Attenuation fed to the ambisonic scene's direct path.
///
/// Inverse uses `rolloff` as an exponent on `min / d`, with `d` held in
/// `[min, max]`; logarithmic uses the gain-only curve.
pub fn scene_attenuation(distance: f32, properties: &AudioProperties) -> f32 {
    match properties.algorithm {
        DistanceAlgorithm::Inverse => {
            if distance <= properties.min_distance || properties.min_distance <= 0.0 {
                return if distance <= properties.min_distance {
                    1.0
                } else {
                    0.0
                };
            }
            let d = distance.min(properties.max_distance.max(properties.min_distance));
            (properties.min_distance / d)
                .powf(properties.rolloff)
                .clamp(0.0, 1.0)
        }
        DistanceAlgorithm::Logarithmic => gain_only_curve(distance, properties),
    }
}

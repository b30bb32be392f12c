//! Association symmetry checks
//!
//! Declared associations must pair up: a belongs_to implies exactly one
//! reciprocal has_one or has_many on the target entity, and a join entity
//! ties its two sides together with belongs_to_many on each. These checks
//! read only the registry, never the database.

use super::DriftError;
use wildebeest_schema::{ModelDeclaration, ModelRegistry};

/// All association drift for one model
pub fn check_associations(registry: &ModelRegistry, model: &ModelDeclaration) -> Vec<DriftError> {
    let mut errors = Vec::new();

    for association in &model.associations.belongs_to {
        let Some(target) = registry.get(&association.entity) else {
            // The registry resolves references at startup; reaching this
            // means the registry and checker disagree on their inputs
            errors.push(DriftError::new(
                &model.table,
                format!(
                    "belongs_to '{}' references an unregistered entity",
                    association.entity
                ),
            ));
            continue;
        };

        let (has_one, has_many) = target.reciprocals_toward(&model.entity);

        // A double declaration is a defect of the target model itself, so
        // the exemption on this side does not silence it
        if has_one > 0 && has_many > 0 {
            errors.push(DriftError::new(
                &model.table,
                format!(
                    "'{}' declares both has_one and has_many toward '{}'; exactly one is allowed",
                    association.entity, model.entity
                ),
            ));
            continue;
        }

        if association.exempt_reciprocal {
            continue;
        }

        if has_one + has_many == 0 {
            errors.push(DriftError::new(
                &model.table,
                format!(
                    "belongs_to '{}' has no reciprocal has_one or has_many declared on '{}'",
                    association.entity, association.entity
                ),
            ));
        }
    }

    if model.join_table {
        errors.extend(check_join_entity(registry, model));
    }

    errors
}

/// Join-entity rules: >= 2 belongs_to, and each side declares the opposite
/// as belongs_to_many through this entity
fn check_join_entity(registry: &ModelRegistry, model: &ModelDeclaration) -> Vec<DriftError> {
    let mut errors = Vec::new();
    let sides = &model.associations.belongs_to;

    if sides.len() < 2 {
        errors.push(DriftError::new(
            &model.table,
            format!(
                "join entity declares {} belongs_to association(s), at least 2 are required",
                sides.len()
            ),
        ));
        return errors;
    }

    for side in sides {
        let Some(owner) = registry.get(&side.entity) else {
            continue;
        };

        for other in sides {
            if other.entity == side.entity {
                continue;
            }

            let through_this = owner
                .associations
                .belongs_to_many
                .iter()
                .any(|assoc| assoc.entity == other.entity && assoc.through == model.entity);

            if !through_this {
                errors.push(DriftError::new(
                    &model.table,
                    format!(
                        "'{}' does not declare belongs_to_many '{}' through '{}'",
                        side.entity, other.entity, model.entity
                    ),
                ));
            }
        }
    }

    errors
}

use thiserror::Error;

/// Errors raised while turning role configuration into bound roles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermError {
    #[error("role `{role}` references unknown entity `{entity}`")]
    UnknownEntity { role: String, entity: String },

    #[error("role `{role}` references unknown field `{entity}.{field}`")]
    UnknownField {
        role: String,
        entity: String,
        field: String,
    },

    #[error("unknown ability: {0}")]
    UnknownAbility(String),

    #[error("role `{role}` is based on unknown role `{parent}`")]
    UnknownParent { role: String, parent: String },

    #[error("role inheritance cycle through `{0}`")]
    CyclicParent(String),
}

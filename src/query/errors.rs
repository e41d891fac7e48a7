#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// Structured errors raised while compiling a query tree into Hive text.
///
/// User-facing variants describe input the dialect cannot express. The
/// variants reported by [`TranslationError::is_internal`] indicate that a
/// rewrite pass left behind a shape it was supposed to eliminate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslationError {
    /// The operator has no Hive rendition.
    #[error("operator '{op}' is not supported: {reason}")]
    UnsupportedOperator { op: &'static str, reason: String },
    /// An expression form has no Hive rendition.
    #[error("unsupported expression in {context}: {detail}")]
    UnsupportedExpression { context: &'static str, detail: String },
    /// A column reference targets an alias that no longer declares it.
    #[error("dangling column reference {alias}.{name}")]
    DanglingColumn { alias: String, name: String },
    /// An apply join reached the formatter.
    #[error("apply join survived rewriting; the pipeline failed to lower it")]
    ApplyJoinSurvived,
    /// A skip reached the formatter.
    #[error("skip survived rewriting; row-number emulation did not run")]
    SkipSurvived,
    /// Aggregate and DISTINCT combination rejected by the dialect.
    #[error("aggregate {func} does not accept {detail}")]
    UnsupportedAggregate { func: &'static str, detail: &'static str },
    /// Literal kind that cannot be inlined as Hive text.
    #[error("literal of kind {kind} cannot be expressed in HiveQL")]
    UnsupportedLiteral { kind: &'static str },
    /// CLUSTER BY and ORDER BY on the same select.
    #[error("CLUSTER BY cannot be combined with ORDER BY")]
    ClusterWithOrder,
    /// Join whose right input is itself a join.
    #[error("right-nested joins are not supported")]
    RightNestedJoin,
    /// A lambda variable was referenced but never introduced.
    #[error("unknown variable '{var}' referenced in {context}")]
    UnknownVariable { var: String, context: &'static str },
    /// A variable name was introduced twice in the same scope.
    #[error("duplicate variable '{var}'")]
    DuplicateVariable { var: String },
    /// A projection declared no fields.
    #[error("{context} requires at least one field")]
    EmptyProjection { context: &'static str },
    /// Expression was used where a different shape was required.
    #[error("type mismatch in {context}: expected {expected}")]
    TypeMismatch { context: &'static str, expected: &'static str },
}

impl TranslationError {
    /// Builds an [`TranslationError::UnknownVariable`] for a specific context.
    pub fn unknown_var(var: impl Into<String>, context: &'static str) -> Self {
        TranslationError::UnknownVariable {
            var: var.into(),
            context,
        }
    }

    /// Builds an [`TranslationError::UnsupportedExpression`].
    pub fn unsupported(context: &'static str, detail: impl Into<String>) -> Self {
        TranslationError::UnsupportedExpression {
            context,
            detail: detail.into(),
        }
    }

    /// True when the error signals a pipeline bug rather than bad input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            TranslationError::ApplyJoinSurvived | TranslationError::SkipSurvived
        )
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            TranslationError::UnsupportedOperator { .. } => "UnsupportedOperator",
            TranslationError::UnsupportedExpression { .. } => "UnsupportedExpression",
            TranslationError::DanglingColumn { .. } => "DanglingColumn",
            TranslationError::ApplyJoinSurvived => "ApplyJoinSurvived",
            TranslationError::SkipSurvived => "SkipSurvived",
            TranslationError::UnsupportedAggregate { .. } => "UnsupportedAggregate",
            TranslationError::UnsupportedLiteral { .. } => "UnsupportedLiteral",
            TranslationError::ClusterWithOrder => "ClusterWithOrder",
            TranslationError::RightNestedJoin => "RightNestedJoin",
            TranslationError::UnknownVariable { .. } => "UnknownVariable",
            TranslationError::DuplicateVariable { .. } => "DuplicateVariable",
            TranslationError::EmptyProjection { .. } => "EmptyProjection",
            TranslationError::TypeMismatch { .. } => "TypeMismatch",
        }
    }
}

/// Errors raised while building or consulting entity mappings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// No descriptor registered under the entity name.
    #[error("unknown entity '{entity}'")]
    UnknownEntity { entity: String },
    /// Entity has no column for the member.
    #[error("entity '{entity}' has no mapped member '{member}'")]
    UnknownMember { entity: String, member: String },
    /// Entity has no association for the member.
    #[error("entity '{entity}' has no association '{member}'")]
    UnknownAssociation { entity: String, member: String },
    /// Entity registered twice.
    #[error("entity '{entity}' is already mapped")]
    DuplicateEntity { entity: String },
    /// Member or column declared twice on one entity.
    #[error("entity '{entity}' declares '{name}' more than once")]
    DuplicateColumn { entity: String, name: String },
    /// Association references a missing target or key.
    #[error("association '{entity}.{member}' is invalid: {reason}")]
    BadAssociation {
        entity: String,
        member: String,
        reason: String,
    },
    /// Entity declares no columns.
    #[error("entity '{entity}' declares no columns")]
    EmptyEntity { entity: String },
    /// Declarative mapping input could not be decoded.
    #[error("mapping input could not be decoded: {0}")]
    Decode(String),
}

impl MappingError {
    /// Builds an [`MappingError::UnknownMember`].
    pub fn unknown_member(entity: impl Into<String>, member: impl Into<String>) -> Self {
        MappingError::UnknownMember {
            entity: entity.into(),
            member: member.into(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            MappingError::UnknownEntity { .. } => "UnknownEntity",
            MappingError::UnknownMember { .. } => "UnknownMember",
            MappingError::UnknownAssociation { .. } => "UnknownAssociation",
            MappingError::DuplicateEntity { .. } => "DuplicateEntity",
            MappingError::DuplicateColumn { .. } => "DuplicateColumn",
            MappingError::BadAssociation { .. } => "BadAssociation",
            MappingError::EmptyEntity { .. } => "EmptyEntity",
            MappingError::Decode(_) => "Decode",
        }
    }
}

/// Convenience wrapper that formats errors with their codes.
pub struct ErrorWithCode<'a>(pub &'a crate::types::HiveError);

impl fmt::Display for ErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

//! Error types for the injection container

use thiserror::Error;

/// The member or parameter through which a dependency was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectSite {
    /// A property injection point, by member name
    Property(&'static str),
    /// A method (or constructor) injection point, by method name and
    /// 1-based parameter position
    Parameter {
        method: &'static str,
        position: usize,
    },
}

impl std::fmt::Display for InjectSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectSite::Property(name) => write!(f, "property \"{name}\""),
            InjectSite::Parameter { method, position } => {
                write!(f, "method \"{method}\", parameter {position}")
            }
        }
    }
}

/// Errors that can occur while mapping or resolving dependencies
#[derive(Error, Debug, Clone)]
pub enum InjectError {
    /// No scope in the chain has a result for the requested type
    #[error("no mapping defined for type {type_name}{}", format_name(.name))]
    MissingMapping { type_name: &'static str, name: String },

    /// A required injection-point dependency resolved to nothing
    #[error(
        "injector is missing a rule to handle injection into target {target}. \
         Target dependency: {dependency}{}, {site}",
        format_name(.name)
    )]
    MissingDependency {
        target: &'static str,
        dependency: &'static str,
        name: String,
        site: InjectSite,
    },

    /// `unmap` was called for a key this scope never mapped
    #[error("cannot unmap type {type_name}{}: no mapping defined", format_name(.name))]
    UnmapMissing { type_name: &'static str, name: String },
}

fn format_name(name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!(" named \"{name}\"")
    }
}

impl InjectError {
    /// Create a MissingMapping error for a type
    #[inline]
    pub fn missing_mapping<T: ?Sized + 'static>(name: &str) -> Self {
        Self::MissingMapping {
            type_name: std::any::type_name::<T>(),
            name: name.to_owned(),
        }
    }

    /// Create an UnmapMissing error for a type
    #[inline]
    pub fn unmap_missing<T: ?Sized + 'static>(name: &str) -> Self {
        Self::UnmapMissing {
            type_name: std::any::type_name::<T>(),
            name: name.to_owned(),
        }
    }
}

/// Result type alias for injection operations
pub type Result<T> = std::result::Result<T, InjectError>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    #[test]
    fn missing_mapping_message_names_the_type() {
        let err = InjectError::missing_mapping::<Widget>("");
        let text = err.to_string();
        assert!(text.contains("Widget"), "unexpected message: {text}");
        assert!(!text.contains("named"));
    }

    #[test]
    fn named_mapping_message_includes_the_name() {
        let err = InjectError::missing_mapping::<Widget>("primary");
        assert!(err.to_string().contains("named \"primary\""));
    }

    #[test]
    fn dependency_message_names_site_and_position() {
        let err = InjectError::MissingDependency {
            target: "app::SearchCommand",
            dependency: "alloc::string::String",
            name: String::new(),
            site: InjectSite::Parameter {
                method: "new",
                position: 2,
            },
        };
        let text = err.to_string();
        assert!(text.contains("SearchCommand"));
        assert!(text.contains("parameter 2"));
    }
}

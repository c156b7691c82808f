//! Status transition tables
//!
//! Every lifecycle status enum lists its legal successors. Validating a
//! transition is a single table lookup; terminal statuses have no successors.

use std::fmt::{Debug, Display};
use std::str::FromStr;

/// A status enum with an explicit transition table
pub trait Lifecycle:
    Copy + Eq + Debug + Display + FromStr + Send + Sync + 'static
{
    /// Statuses reachable in one step from `self`
    fn successors(self) -> &'static [Self];

    fn as_str(self) -> &'static str;

    fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    /// Sinks: no transition leaves a terminal status
    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

/// Error returned when parsing an unknown status label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

/// Derives `as_str`, `Display` and `FromStr` for a status enum from its
/// persisted labels.
#[macro_export]
macro_rules! status_labels {
    ($ty:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn label(self) -> &'static str {
                match self {
                    $($ty::$variant => $label),+
                }
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.label())
            }
        }

        impl ::std::str::FromStr for $ty {
            type Err = $crate::domain::lifecycle::UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($ty::$variant),)+
                    other => Err($crate::domain::lifecycle::UnknownStatus(other.to_string())),
                }
            }
        }
    };
}

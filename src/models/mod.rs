// src/models/mod.rs

/// Enums persisted as lowercase text columns.
///
/// Generates `as_str`, `FromStr` and `Display` so the Postgres store can map
/// rows without custom database types.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_enum;

pub mod alert;
pub mod audit;
pub mod auth;
pub mod chat;
pub mod chatbot;
pub mod dashboard;
pub mod message;
pub mod patient;
pub mod session_note;
pub mod therapist;
pub mod validation;

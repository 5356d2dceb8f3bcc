use std::collections::HashSet;

use crate::config::Config;
use crate::error::ApiError;
use crate::model::{RawInput, ResourceKind};

/// An input refused before any remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub name: String,
    pub error: ApiError,
}

/// Outcome of screening one batch.
#[derive(Debug, Default)]
pub struct Screened {
    pub accepted: Vec<RawInput>,
    pub rejected: Vec<Rejection>,
    /// Inputs whose name collides with an existing resource. They wait for a
    /// user decision and are not uploaded.
    pub conflicts: Vec<RawInput>,
}

/// Size and content-type rules for a single input.
pub fn validate(input: &RawInput, config: &Config) -> Result<(), ApiError> {
    let profile = config.profile(input.kind);
    if input.name.trim().is_empty() {
        return Err(ApiError::validation("input has no name"));
    }
    if input.size > profile.max_bytes {
        return Err(ApiError::Validation {
            message: format!(
                "{} is {} bytes, larger than the {} byte limit",
                input.name, input.size, profile.max_bytes
            ),
            reasons: vec!["max_size".to_owned()],
        });
    }
    if !profile.accepts_type(input.content_type.as_deref()) {
        return Err(ApiError::Validation {
            message: format!(
                "{} has unsupported type {}",
                input.name,
                input.content_type.as_deref().unwrap_or("(unknown)")
            ),
            reasons: vec!["content_type".to_owned()],
        });
    }
    Ok(())
}

/// Split a batch into accepted, rejected and conflicting inputs.
///
/// `existing` yields the names already present per kind. It is only consulted for
/// kinds whose profile enables duplicate detection. A name repeated inside the batch
/// conflicts from its second occurrence on.
pub fn screen(
    inputs: Vec<RawInput>,
    config: &Config,
    existing: impl Fn(ResourceKind) -> HashSet<String>,
) -> Screened {
    let mut screened = Screened::default();
    let mut known: Vec<(ResourceKind, HashSet<String>)> = Vec::new();

    for input in inputs {
        if let Err(error) = validate(&input, config) {
            screened.rejected.push(Rejection {
                name: input.name.clone(),
                error,
            });
            continue;
        }

        if config.profile(input.kind).detect_duplicates {
            let names = match known.iter().position(|(kind, _)| *kind == input.kind) {
                Some(index) => &mut known[index].1,
                None => {
                    known.push((input.kind, existing(input.kind)));
                    let last = known.len() - 1;
                    &mut known[last].1
                }
            };
            if !names.insert(input.name.clone()) {
                screened.conflicts.push(input);
                continue;
            }
        }

        screened.accepted.push(input);
    }

    screened
}

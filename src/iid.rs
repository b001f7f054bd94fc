use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::resources::ResourceType;

/// Length of the generated suffix appended to caller names, `-` included.
pub const ENCODED_SUFFIX_LEN: usize = 21;
/// Longest encoded name sent to a backend. Kept under the common 63-char
/// display-name cap so every supported backend accepts generated names.
pub const MAX_ENCODED_LEN: usize = 63;
const MAX_BASE_LEN: usize = MAX_ENCODED_LEN - ENCODED_SUFFIX_LEN;

static ENCODED_NAME_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-[0-9a-f]{20}$").expect("cannot compile encoded name suffix regex"));

/// Dual-key resource identity: the caller-chosen name and the
/// backend-assigned opaque identifier. At least one field is non-empty
/// wherever an identity addresses a resource.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Iid {
    pub name_id: String,
    pub system_id: String,
}

impl Iid {
    pub fn new(name_id: &str, system_id: &str) -> Self {
        Iid {
            name_id: name_id.to_string(),
            system_id: system_id.to_string(),
        }
    }

    pub fn from_name(name_id: &str) -> Self {
        Iid::new(name_id, "")
    }

    pub fn from_system_id(system_id: &str) -> Self {
        Iid::new("", system_id)
    }

    /// Identity for a sub-resource the backend only reports an opaque id for
    /// (e.g. an auto-generated boot disk). Several operations key off
    /// `name_id`, so it gets a synthetic placeholder instead of staying empty.
    pub fn synthetic(system_id: &str) -> Self {
        Iid::new(&format!("auto-{}", normalize_system_id(system_id)), system_id)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name_id.is_empty() && self.system_id.is_empty() {
            return Err(EngineError::new_validation(
                "identity must carry a NameId or a SystemId".to_string(),
            ));
        }
        Ok(())
    }

    /// Human-facing name: the original caller name recovered from an encoded one.
    pub fn display_name(&self) -> String {
        derive_original_name(&self.name_id)
    }
}

impl Display for Iid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}, {}}}", self.name_id, self.system_id)
    }
}

/// Encodes a caller-chosen name into the form actually sent to a backend:
/// `<base>-<20 hex chars>`. Some backends reject display names over a length
/// limit, so `base` is truncated until the encoded form fits MAX_ENCODED_LEN.
pub fn encode_name(name: &str) -> String {
    let suffix = &Uuid::new_v4().simple().to_string()[..ENCODED_SUFFIX_LEN - 1];
    let base: String = name.chars().take(MAX_BASE_LEN).collect();
    format!("{base}-{suffix}")
}

/// Reverses `encode_name` by stripping the fixed-length generated suffix.
/// Best-effort display convenience: lossy for names truncated at encoding
/// time, and never used for identity equality checks.
pub fn derive_original_name(encoded: &str) -> String {
    match ENCODED_NAME_SUFFIX.find(encoded) {
        Some(m) if m.start() > 0 => encoded[..m.start()].to_string(),
        _ => encoded.to_string(),
    }
}

/// Some backends return hierarchical, path-style system ids
/// (`/subscriptions/…/loadBalancers/lb-01`). Comparisons and synthetic names
/// use the trailing segment.
pub fn normalize_system_id(system_id: &str) -> &str {
    match system_id.rsplit_once('/') {
        Some((_, tail)) if !tail.is_empty() => tail,
        _ => system_id,
    }
}

/// Fills in whichever of `name_id`/`system_id` is missing by matching the
/// known field against backend-listed identities. Pure and side-effect free;
/// callers fetch `candidates` through the adapter's list operation.
pub fn resolve(resource_type: ResourceType, partial: &Iid, candidates: &[Iid]) -> Result<Iid, EngineError> {
    partial.validate()?;

    if !partial.system_id.is_empty() {
        let wanted = normalize_system_id(&partial.system_id);
        let matches: Vec<&Iid> = candidates
            .iter()
            .filter(|c| normalize_system_id(&c.system_id) == wanted)
            .collect();
        return match matches.as_slice() {
            [] => Err(EngineError::new_not_found(resource_type, &partial.system_id)),
            [one] => {
                let name_id = if one.name_id.is_empty() {
                    Iid::synthetic(&one.system_id).name_id
                } else {
                    one.display_name()
                };
                Ok(Iid::new(&name_id, &one.system_id))
            }
            many => Err(EngineError::Ambiguous {
                resource_type,
                name: partial.system_id.clone(),
                matches: many.len(),
            }),
        };
    }

    // Names are not guaranteed unique at the backend; both the raw and the
    // encoded form of a candidate name are considered.
    let matches: Vec<&Iid> = candidates
        .iter()
        .filter(|c| c.name_id == partial.name_id || c.display_name() == partial.name_id)
        .collect();
    match matches.as_slice() {
        [] => Err(EngineError::new_not_found(resource_type, &partial.name_id)),
        [one] => Ok(Iid::new(&partial.name_id, &one.system_id)),
        many => Err(EngineError::Ambiguous {
            resource_type,
            name: partial.name_id.clone(),
            matches: many.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_name_appends_fixed_length_suffix() {
        let encoded = encode_name("vm-01");
        assert_eq!(encoded.len(), "vm-01".len() + ENCODED_SUFFIX_LEN);
        assert!(ENCODED_NAME_SUFFIX.is_match(&encoded));
    }

    #[test]
    fn test_derive_original_name_round_trips_below_threshold() {
        for name in ["vm-01", "a", "my-long-service-name", "UPPER-case-Name"] {
            assert_eq!(derive_original_name(&encode_name(name)), name);
        }
    }

    #[test]
    fn test_derive_original_name_recovers_prefix_at_threshold() {
        // setup: a name long enough to get truncated at encoding time
        let name = "x".repeat(MAX_ENCODED_LEN + 10);

        // execute:
        let encoded = encode_name(&name);
        let recovered = derive_original_name(&encoded);

        // verify: the encoded form fits the cap and the prefix survives
        assert_eq!(encoded.len(), MAX_ENCODED_LEN);
        assert_eq!(recovered, name[..MAX_ENCODED_LEN - ENCODED_SUFFIX_LEN]);
        assert!(name.starts_with(&recovered));
    }

    #[test]
    fn test_derive_original_name_is_idempotent() {
        let encoded = encode_name("web-frontend");
        let once = derive_original_name(&encoded);
        assert_eq!(derive_original_name(&once), once);

        // a name that never went through encoding is left untouched
        assert_eq!(derive_original_name("plain-name"), "plain-name");
    }

    #[test]
    fn test_normalize_system_id_keeps_tail_segment() {
        assert_eq!(
            normalize_system_id("/subscriptions/a20f/providers/Network/loadBalancers/lb-01"),
            "lb-01"
        );
        assert_eq!(normalize_system_id("i-0bc7123b7e5cbf79d"), "i-0bc7123b7e5cbf79d");
    }

    #[test]
    fn test_resolve_fills_name_from_system_id() {
        // setup:
        let encoded = encode_name("vm-01");
        let candidates = vec![
            Iid::new(&encoded, "i-111"),
            Iid::new(&encode_name("vm-02"), "i-222"),
        ];

        // execute:
        let resolved = resolve(ResourceType::Vm, &Iid::from_system_id("i-111"), &candidates).unwrap();

        // verify:
        assert_eq!(resolved, Iid::new("vm-01", "i-111"));
    }

    #[test]
    fn test_resolve_fills_system_id_from_name() {
        let candidates = vec![Iid::new(&encode_name("vm-01"), "i-111")];
        let resolved = resolve(ResourceType::Vm, &Iid::from_name("vm-01"), &candidates).unwrap();
        assert_eq!(resolved.system_id, "i-111");
        assert_eq!(resolved.name_id, "vm-01");
    }

    #[test]
    fn test_resolve_not_found_and_ambiguous() {
        let candidates = vec![
            Iid::new(&encode_name("vm-01"), "i-111"),
            Iid::new(&encode_name("vm-01"), "i-222"),
        ];

        assert!(matches!(
            resolve(ResourceType::Vm, &Iid::from_name("vm-09"), &candidates),
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            resolve(ResourceType::Vm, &Iid::from_name("vm-01"), &candidates),
            Err(EngineError::Ambiguous { matches: 2, .. })
        ));
    }

    #[test]
    fn test_resolve_synthesizes_placeholder_for_anonymous_resources() {
        // an auto-created boot disk only has a backend id
        let candidates = vec![Iid::from_system_id("vol-0abc")];
        let resolved = resolve(ResourceType::Disk, &Iid::from_system_id("vol-0abc"), &candidates).unwrap();
        assert_eq!(resolved.name_id, "auto-vol-0abc");
    }

    #[test]
    fn test_resolve_rejects_empty_identity() {
        assert!(matches!(
            resolve(ResourceType::Vm, &Iid::default(), &[]),
            Err(EngineError::Validation { .. })
        ));
    }
}

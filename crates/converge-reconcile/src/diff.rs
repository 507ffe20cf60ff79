//! Drift detection.
//!
//! Compares the desired attributes of a resource with what was last observed
//! and produces the minimal set of field updates, or the list of fields that
//! cannot be changed in place.
//!
//! # Example
//!
//! ```
//! use converge_core::AttributeMap;
//! use converge_reconcile::diff::diff;
//! use converge_reconcile::schema::ResourceSchema;
//!
//! let schema = ResourceSchema::new("db").mutable("name").immutable("zone");
//! let observed = AttributeMap::new().with("name", "a").with("zone", "z1");
//! let desired = AttributeMap::new().with("name", "b").with("zone", "z1");
//!
//! let result = diff(&desired, &observed, &schema).unwrap();
//! assert_eq!(result.updates.len(), 1);
//! assert!(result.violations.is_empty());
//! ```

use serde::{Deserialize, Serialize};

use converge_core::{AttributeMap, Value};

use crate::error::DiffError;
use crate::schema::{FieldClassification, ResourceSchema};

/// One field that must be sent to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUpdate {
    /// Name of the changed field.
    pub field: String,
    /// Value the comparison was made against, if any.
    pub old: Option<Value>,
    /// Desired value to send.
    pub new: Value,
}

/// Desired change to a field that can only be set at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenFieldViolation {
    /// Name of the creation-only field.
    pub field: String,
    /// Value in the baseline, as observed or as last applied.
    pub current: Value,
    /// Value the caller asked for.
    pub desired: Value,
}

impl std::fmt::Display for FrozenFieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "argument `{}` cannot be changed ({} -> {})",
            self.field, self.current, self.desired
        )
    }
}

/// Result of a diff, both lists ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDiff {
    pub updates: Vec<FieldUpdate>,
    pub violations: Vec<FrozenFieldViolation>,
}

impl FieldDiff {
    /// Check if nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.violations.is_empty()
    }

    /// Check if the desired state can be applied in place.
    #[must_use]
    pub fn is_applicable(&self) -> bool {
        self.violations.is_empty()
    }

    /// Names of the fields that would be updated.
    pub fn updated_fields(&self) -> impl Iterator<Item = &str> {
        self.updates.iter().map(|u| u.field.as_str())
    }
}

/// State a desired map is compared against.
#[derive(Debug, Clone, Copy)]
pub struct Baseline<'a> {
    /// Attributes from the latest read.
    pub observed: &'a AttributeMap,
    /// Desired attributes applied by the previous successful reconcile.
    pub applied: Option<&'a AttributeMap>,
}

impl<'a> Baseline<'a> {
    /// Baseline with observed attributes only.
    #[must_use]
    pub fn observed(observed: &'a AttributeMap) -> Self {
        Self {
            observed,
            applied: None,
        }
    }

    /// Baseline with observed attributes and the previously applied ones.
    #[must_use]
    pub fn with_applied(observed: &'a AttributeMap, applied: &'a AttributeMap) -> Self {
        Self {
            observed,
            applied: Some(applied),
        }
    }

    fn is_initial(&self) -> bool {
        self.observed.is_empty() && self.applied.map_or(true, AttributeMap::is_empty)
    }
}

/// Diff `desired` against the last observed attributes.
pub fn diff(
    desired: &AttributeMap,
    last_observed: &AttributeMap,
    schema: &ResourceSchema,
) -> Result<FieldDiff, DiffError> {
    diff_against(desired, &Baseline::observed(last_observed), schema)
}

/// Diff `desired` against a baseline.
///
/// - computed fields are skipped;
/// - an immutable field yields a violation when the baseline holds a
///   different value, and never an update; nothing is checked on the initial
///   create, when the baseline is empty;
/// - a mutable field yields an update when its value differs from the
///   baseline or the baseline lacks it;
/// - write-only fields are compared with the applied state, and skipped when
///   there is none.
pub fn diff_against(
    desired: &AttributeMap,
    baseline: &Baseline<'_>,
    schema: &ResourceSchema,
) -> Result<FieldDiff, DiffError> {
    let initial = baseline.is_initial();
    let mut result = FieldDiff::default();

    // AttributeMap iterates in key order, so both lists come out sorted.
    for (name, want) in desired.iter() {
        let field = schema.get(name).ok_or_else(|| DiffError::UnknownField {
            resource_type: schema.resource_type.clone(),
            field: name.clone(),
        })?;

        let applied = baseline.applied.and_then(|a| a.get(name));
        let current = if field.write_only {
            if baseline.applied.is_none() {
                continue;
            }
            applied
        } else {
            match field.classification {
                FieldClassification::Immutable => baseline.observed.get(name).or(applied),
                _ => baseline.observed.get(name),
            }
        };

        match field.classification {
            FieldClassification::Computed => {}
            FieldClassification::Immutable => {
                if initial {
                    continue;
                }
                if let Some(current) = current {
                    if !current.equivalent(want, field.compare) {
                        result.violations.push(FrozenFieldViolation {
                            field: name.clone(),
                            current: current.clone(),
                            desired: want.clone(),
                        });
                    }
                }
            }
            FieldClassification::Mutable => {
                let unchanged = current.is_some_and(|c| c.equivalent(want, field.compare));
                if !unchanged {
                    result.updates.push(FieldUpdate {
                        field: name.clone(),
                        old: current.cloned(),
                        new: want.clone(),
                    });
                }
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("cdwpg_instance")
            .mutable("instance_name")
            .mutable("node_count")
            .immutable("zone")
            .computed("status")
            .field("security_group_ids", FieldSchema::mutable().unordered())
            .field("subnet_ids", FieldSchema::mutable())
            .field("admin_password", FieldSchema::immutable().write_only())
            .field("api_secret", FieldSchema::mutable().write_only())
    }

    fn observed() -> AttributeMap {
        AttributeMap::new()
            .with("instance_name", "analytics")
            .with("node_count", 3)
            .with("zone", "ap-guangzhou-3")
            .with("status", "Running")
            .with("security_group_ids", vec!["sg-1", "sg-2"])
            .with("subnet_ids", vec!["subnet-1", "subnet-2"])
    }

    #[test]
    fn test_no_changes() {
        let result = diff(&observed(), &observed(), &schema()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_mutable_changes_are_ordered_by_field() {
        let desired = observed()
            .with("node_count", 5)
            .with("instance_name", "analytics-v2");
        let result = diff(&desired, &observed(), &schema()).unwrap();

        let fields: Vec<_> = result.updated_fields().collect();
        assert_eq!(fields, vec!["instance_name", "node_count"]);
        assert_eq!(result.updates[1].old, Some(Value::Int(3)));
        assert_eq!(result.updates[1].new, Value::Int(5));
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_immutable_change_is_violation_not_update() {
        let desired = observed().with("zone", "ap-guangzhou-4");
        let result = diff(&desired, &observed(), &schema()).unwrap();

        assert!(result.updates.is_empty());
        assert_eq!(result.violations.len(), 1);
        let violation = &result.violations[0];
        assert_eq!(violation.field, "zone");
        assert_eq!(violation.current, Value::from("ap-guangzhou-3"));
        assert_eq!(violation.desired, Value::from("ap-guangzhou-4"));
        assert!(violation.to_string().contains("cannot be changed"));
    }

    #[test]
    fn test_initial_create_has_no_violations() {
        let desired = observed().with("zone", "ap-guangzhou-4");
        let result = diff(&desired, &AttributeMap::new(), &schema()).unwrap();
        assert!(result.violations.is_empty());
        assert!(!result.updates.is_empty());
    }

    #[test]
    fn test_computed_fields_ignored() {
        let desired = observed().with("status", "Isolated");
        assert!(diff(&desired, &observed(), &schema()).unwrap().is_empty());
    }

    #[test]
    fn test_unordered_list_comparison() {
        let desired = observed().with("security_group_ids", vec!["sg-2", "sg-1"]);
        assert!(diff(&desired, &observed(), &schema()).unwrap().is_empty());

        let desired = observed().with("subnet_ids", vec!["subnet-2", "subnet-1"]);
        let result = diff(&desired, &observed(), &schema()).unwrap();
        assert_eq!(result.updated_fields().collect::<Vec<_>>(), vec!["subnet_ids"]);
    }

    #[test]
    fn test_field_missing_from_observed_is_update() {
        let mut current = observed();
        current.remove("instance_name");
        let result = diff(&observed(), &current, &schema()).unwrap();
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.updates[0].old, None);
    }

    #[test]
    fn test_unknown_field_is_error() {
        let desired = observed().with("colour", "blue");
        let err = diff(&desired, &observed(), &schema()).unwrap_err();
        assert_eq!(
            err,
            DiffError::UnknownField {
                resource_type: "cdwpg_instance".to_string(),
                field: "colour".to_string(),
            }
        );
    }

    mod write_only {
        use super::*;

        #[test]
        fn test_skipped_without_applied_state() {
            let desired = observed().with("api_secret", "s3cret");
            assert!(diff(&desired, &observed(), &schema()).unwrap().is_empty());
        }

        #[test]
        fn test_compared_with_applied_state() {
            let applied = observed().with("api_secret", "old").with("admin_password", "pw1");
            let desired = observed().with("api_secret", "new").with("admin_password", "pw1");
            let current = observed();

            let result =
                diff_against(&desired, &Baseline::with_applied(&current, &applied), &schema())
                    .unwrap();
            assert_eq!(result.updated_fields().collect::<Vec<_>>(), vec!["api_secret"]);
            assert!(result.violations.is_empty());
        }

        #[test]
        fn test_immutable_write_only_change_is_violation() {
            let applied = observed().with("admin_password", "pw1");
            let desired = observed().with("admin_password", "pw2");
            let current = observed();

            let result =
                diff_against(&desired, &Baseline::with_applied(&current, &applied), &schema())
                    .unwrap();
            assert_eq!(result.violations.len(), 1);
            assert_eq!(result.violations[0].field, "admin_password");
        }
    }

    #[test]
    fn test_immutable_falls_back_to_applied() {
        let applied = AttributeMap::new().with("zone", "ap-guangzhou-3");
        let mut current = observed();
        current.remove("zone");
        let desired = observed().with("zone", "ap-guangzhou-4");

        let result =
            diff_against(&desired, &Baseline::with_applied(&current, &applied), &schema()).unwrap();
        assert_eq!(result.violations.len(), 1);
    }
}

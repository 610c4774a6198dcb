//! Merge policy for objects that collide on their primary key.
//!
//! Two objects with different content but the same primary key describe
//! the same logical item. Every replica must pick the same survivor, so the
//! policy only looks at the two objects themselves and ranks them by
//! `(modification date, digest)`, where a missing date ranks below every
//! date. The higher rank wins. Because the rank is a total order, the
//! survivor of a group of colliding objects does not depend on the order
//! they arrive in.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use mansync_core::{canonical_bytes, Object, Value};

use crate::traits::MergeOutcome;

/// Default primary-key attribute.
pub const DEFAULT_PRIMARY_KEY: &str = "key";

/// Default modification-date attribute.
pub const DEFAULT_MODIFICATION_DATE: &str = "mdat";

/// Encoded primary key of an object.
///
/// This is the canonical encoding of the object's primary-key attributes,
/// so equal keys compare equal regardless of attribute types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryKey(Vec<u8>);

/// Which attributes identify an object and how collisions are resolved.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    primary_key: Vec<String>,
    modification_date: String,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            primary_key: vec![DEFAULT_PRIMARY_KEY.to_string()],
            modification_date: DEFAULT_MODIFICATION_DATE.to_string(),
        }
    }
}

impl MergePolicy {
    /// Create the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the primary-key attribute names.
    pub fn with_primary_key<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the modification-date attribute name.
    pub fn with_modification_date(mut self, attribute: impl Into<String>) -> Self {
        self.modification_date = attribute.into();
        self
    }

    /// Primary-key attribute names.
    pub fn primary_key_attributes(&self) -> &[String] {
        &self.primary_key
    }

    /// The primary key of `object`.
    ///
    /// Returns `None` when the policy has no key attributes or the object
    /// lacks any of them; such objects never collide.
    pub fn primary_key(&self, object: &Object) -> Option<PrimaryKey> {
        if self.primary_key.is_empty() {
            return None;
        }

        let mut key = BTreeMap::new();
        for attribute in &self.primary_key {
            let value = object.get(attribute)?;
            key.insert(attribute.clone(), value.clone());
        }
        Some(PrimaryKey(canonical_bytes(&Object::new(key))))
    }

    /// Modification date of `object`, if it carries one.
    pub fn modification_date(&self, object: &Object) -> Option<i64> {
        object.get(&self.modification_date).and_then(Value::as_date)
    }

    /// Resolve two distinct objects sharing a primary key.
    ///
    /// Returns the surviving object and whether the collision was a clean
    /// [`MergeOutcome::Merged`] or a [`MergeOutcome::Conflict`] (a side had
    /// no modification date).
    pub fn merged_object(&self, existing: &Object, incoming: &Object) -> (Object, MergeOutcome) {
        let ours = self.modification_date(existing);
        let theirs = self.modification_date(incoming);
        let outcome = if ours.is_some() && theirs.is_some() {
            MergeOutcome::Merged
        } else {
            MergeOutcome::Conflict
        };

        let ordering = theirs
            .cmp(&ours)
            .then_with(|| incoming.digest().cmp(&existing.digest()));
        let winner = match ordering {
            Ordering::Greater => incoming,
            Ordering::Less | Ordering::Equal => existing,
        };
        (winner.clone(), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item(key: &str, mdat: Option<i64>, payload: &str) -> Object {
        let mut builder = Object::builder().attr("key", key).attr("v_Data", payload);
        if let Some(secs) = mdat {
            builder = builder.date("mdat", secs);
        }
        builder.build()
    }

    #[test]
    fn test_later_modification_wins() {
        let policy = MergePolicy::default();
        let old = item("a", Some(100), "old");
        let new = item("a", Some(200), "new");

        assert_eq!(policy.merged_object(&old, &new), (new.clone(), MergeOutcome::Merged));
        assert_eq!(policy.merged_object(&new, &old), (new, MergeOutcome::Merged));
    }

    #[test]
    fn test_tie_broken_by_digest() {
        let policy = MergePolicy::default();
        let a = item("a", Some(100), "one");
        let b = item("a", Some(100), "two");
        let expected = if a.digest() > b.digest() { &a } else { &b };

        assert_eq!(&policy.merged_object(&a, &b).0, expected);
        assert_eq!(&policy.merged_object(&b, &a).0, expected);
    }

    #[test]
    fn test_missing_date_is_conflict_but_deterministic() {
        let policy = MergePolicy::default();
        let a = item("a", None, "one");
        let b = item("a", Some(100), "two");

        let (left, outcome) = policy.merged_object(&a, &b);
        let (right, _) = policy.merged_object(&b, &a);
        assert_eq!(outcome, MergeOutcome::Conflict);
        assert_eq!(left, right);
    }

    #[test]
    fn test_dated_object_beats_undated() {
        let policy = MergePolicy::default();
        let undated = item("a", None, "one");
        let dated = item("a", Some(0), "two");

        assert_eq!(policy.merged_object(&undated, &dated).0, dated);
        assert_eq!(policy.merged_object(&dated, &undated).0, dated);
    }

    #[test]
    fn test_primary_key_requires_all_attributes() {
        let policy = MergePolicy::new().with_primary_key(["key", "account"]);
        let partial = Object::builder().attr("key", "a").build();
        let full = Object::builder().attr("key", "a").attr("account", "x").build();
        let other = Object::builder()
            .attr("key", "a")
            .attr("account", "x")
            .attr("extra", 1i64)
            .build();

        assert!(policy.primary_key(&partial).is_none());
        assert_eq!(policy.primary_key(&full), policy.primary_key(&other));
    }

    #[test]
    fn test_custom_modification_date() {
        let policy = MergePolicy::new().with_modification_date("changed");
        let obj = Object::builder().date("changed", 5).date("mdat", 9).build();
        assert_eq!(policy.modification_date(&obj), Some(5));
    }

    #[test]
    fn test_empty_primary_key_never_collides() {
        let policy = MergePolicy::new().with_primary_key(Vec::<String>::new());
        assert!(policy.primary_key_attributes().is_empty());
        assert!(policy.primary_key(&item("a", None, "x")).is_none());
    }

    fn arb_version() -> impl Strategy<Value = Object> {
        (prop::option::of(0i64..3), 0u8..4)
            .prop_map(|(mdat, payload)| item("k", mdat, &payload.to_string()))
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in arb_version(), b in arb_version()) {
            let policy = MergePolicy::default();
            let (left, left_outcome) = policy.merged_object(&a, &b);
            let (right, right_outcome) = policy.merged_object(&b, &a);
            prop_assert_eq!(left, right);
            prop_assert_eq!(left_outcome, right_outcome);
        }

        #[test]
        fn merge_survivor_ignores_arrival_order(
            a in arb_version(),
            b in arb_version(),
            c in arb_version(),
        ) {
            let policy = MergePolicy::default();
            let fold = |first: &Object, second: &Object, third: &Object| {
                let (partial, _) = policy.merged_object(first, second);
                policy.merged_object(&partial, third).0
            };
            let expected = fold(&a, &b, &c);
            prop_assert_eq!(&fold(&b, &c, &a), &expected);
            prop_assert_eq!(&fold(&c, &a, &b), &expected);
            prop_assert_eq!(&fold(&a, &c, &b), &expected);
        }
    }
}
